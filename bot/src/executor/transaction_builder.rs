// bot/src/executor/transaction_builder.rs
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use solana_sdk::{
    address_lookup_table::state::AddressLookupTable,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    message::{v0, AddressLookupTableAccount, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::BuildError,
    ledger::LedgerClient,
    quote::{InstructionDescriptor, Quote, QuoteProvider, SwapInstructions},
};

/// Подписанная транзакция, готовая к отправке
#[derive(Debug, Clone)]
pub struct SignedSwap {
    pub transaction: VersionedTransaction,
    pub wire: Vec<u8>,
    pub signature: Signature,
}

pub struct TransactionBuilder {
    ledger: Arc<dyn LedgerClient>,
    quotes: Arc<dyn QuoteProvider>,
    keypair: Arc<Keypair>,
}

/* ---------------- impl ---------------- */
impl TransactionBuilder {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        quotes: Arc<dyn QuoteProvider>,
        keypair: Arc<Keypair>,
    ) -> Self {
        Self {
            ledger,
            quotes,
            keypair,
        }
    }

    /* ---------- публичный API ---------- */
    pub async fn build(&self, quote: &Quote, recent_blockhash: Hash) -> Result<SignedSwap, BuildError> {
        let payer = self.keypair.pubkey();

        let fragments = self.quotes.swap_instructions(quote, &payer).await?;
        let instructions = collect_instructions(&fragments)?;
        info!("🔨 Строим транзакцию: {} инструкций", instructions.len());

        let lookup_tables = self
            .resolve_lookup_tables(&fragments.address_lookup_table_addresses)
            .await?;

        /* ----- финальный tx ----- */
        let message = v0::Message::try_compile(&payer, &instructions, &lookup_tables, recent_blockhash)
            .map_err(|e| BuildError::Compile(e.to_string()))?;

        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[self.keypair.as_ref()])
                .map_err(|e| BuildError::Sign(e.to_string()))?;

        let signature = *transaction
            .signatures
            .first()
            .ok_or_else(|| BuildError::Sign("транзакция без подписи".to_string()))?;

        let wire = bincode::serialize(&transaction).map_err(|e| BuildError::Serialize(e.to_string()))?;
        debug!("   Размер транзакции: {} байт", wire.len());

        Ok(SignedSwap {
            transaction,
            wire,
            signature,
        })
    }

    /* ---------- helpers ---------- */

    /// Батч-загрузка lookup-таблиц. Отсутствующие и нечитаемые таблицы пропускаются:
    /// закрытая таблица не должна блокировать отправку.
    async fn resolve_lookup_tables(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressLookupTableAccount>, BuildError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let keys = addresses
            .iter()
            .map(|address| parse_pubkey("addressLookupTableAddresses", address))
            .collect::<Result<Vec<_>, _>>()?;

        let accounts = self
            .ledger
            .get_multiple_accounts(&keys)
            .await
            .map_err(|e| BuildError::LookupTables(format!("{:#}", e)))?;

        let mut tables = Vec::with_capacity(keys.len());
        for (key, account) in keys.iter().zip(accounts) {
            let Some(account) = account else {
                debug!("   Lookup-таблица {} не найдена, пропускаем", key);
                continue;
            };
            match AddressLookupTable::deserialize(&account.data) {
                Ok(table) => tables.push(AddressLookupTableAccount {
                    key: *key,
                    addresses: table.addresses.to_vec(),
                }),
                Err(e) => debug!("   Lookup-таблица {} не читается ({}), пропускаем", key, e),
            }
        }

        Ok(tables)
    }
}

/// Сборка инструкций в порядке исполнения. Отсутствующие фрагменты отбрасываются,
/// но сама инструкция свопа обязательна.
pub fn collect_instructions(fragments: &SwapInstructions) -> Result<Vec<Instruction>, BuildError> {
    let swap = fragments
        .swap_instruction
        .as_ref()
        .ok_or_else(|| BuildError::MalformedInstruction {
            label: "swapInstruction".to_string(),
            reason: "отсутствует".to_string(),
        })?;

    let ordered = fragments
        .compute_budget_instructions
        .iter()
        .map(|ix| ("computeBudgetInstructions", Some(ix)))
        .chain(fragments.other_instructions.iter().map(|ix| ("otherInstructions", Some(ix))))
        .chain(std::iter::once(("tokenLedgerInstruction", fragments.token_ledger_instruction.as_ref())))
        .chain(fragments.setup_instructions.iter().map(|ix| ("setupInstructions", Some(ix))))
        .chain(std::iter::once(("swapInstruction", Some(swap))))
        .chain(std::iter::once(("cleanupInstruction", fragments.cleanup_instruction.as_ref())));

    ordered
        .filter_map(|(label, ix)| ix.map(|ix| to_instruction(label, ix)))
        .collect()
}

/// Конвертация описания инструкции из формата сервиса в нативную инструкцию
pub fn to_instruction(label: &str, descriptor: &InstructionDescriptor) -> Result<Instruction, BuildError> {
    let program_id = parse_pubkey(label, &descriptor.program_id)?;

    let accounts = descriptor
        .accounts
        .iter()
        .map(|account| {
            Ok(AccountMeta {
                pubkey: parse_pubkey(label, &account.pubkey)?,
                is_signer: account.is_signer,
                is_writable: account.is_writable,
            })
        })
        .collect::<Result<Vec<_>, BuildError>>()?;

    let data = BASE64
        .decode(&descriptor.data)
        .map_err(|e| BuildError::MalformedInstruction {
            label: label.to_string(),
            reason: format!("data не base64: {}", e),
        })?;

    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

fn parse_pubkey(label: &str, value: &str) -> Result<Pubkey, BuildError> {
    Pubkey::from_str(value).map_err(|_| BuildError::MalformedInstruction {
        label: label.to_string(),
        reason: format!("неверный адрес {}", value),
    })
}
