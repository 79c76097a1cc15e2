// bot/src/executor/mod.rs

pub mod transaction_builder;

use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::sync::Arc;
use tracing::info;

use crate::error::SwapError;
use crate::ledger::{LedgerClient, SubmitOptions};
use crate::quote::{Quote, QuoteProvider};
use transaction_builder::TransactionBuilder;

/// Подтверждённый своп: суммы берутся из исполненной котировки
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedSwap {
    pub signature: Signature,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
}

impl ExecutedSwap {
    pub fn from_quote(quote: &Quote, signature: Signature) -> Self {
        Self {
            signature,
            input_mint: quote.input_mint,
            output_mint: quote.output_mint,
            in_amount: quote.in_amount,
            out_amount: quote.out_amount,
        }
    }
}

/// Одна попытка свопа: инструкции, свежий blockhash, отправка, подтверждение.
/// Ничего не повторяет сам: следующая выгодная котировка начнёт заново.
pub struct SwapExecutor {
    ledger: Arc<dyn LedgerClient>,
    builder: TransactionBuilder,
    submit_options: SubmitOptions,
}

impl SwapExecutor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        quotes: Arc<dyn QuoteProvider>,
        keypair: Arc<Keypair>,
    ) -> Self {
        Self {
            builder: TransactionBuilder::new(ledger.clone(), quotes, keypair),
            ledger,
            submit_options: SubmitOptions::default(),
        }
    }

    pub async fn execute(&self, quote: Quote) -> Result<ExecutedSwap, SwapError> {
        let (blockhash, last_valid_block_height) = self.ledger.get_latest_blockhash().await?;

        let signed = self.builder.build(&quote, blockhash).await?;

        info!("📤 Отправка транзакции...");
        let signature = self.ledger.submit(&signed.wire, self.submit_options).await?;

        let confirmation = self
            .ledger
            .confirm(
                &signature,
                &blockhash,
                last_valid_block_height,
                CommitmentConfig::confirmed(),
            )
            .await?;

        if let Some(reason) = confirmation.err {
            return Err(SwapError::Failed { signature, reason });
        }

        info!("✅ Транзакция подтверждена: {}", signature);
        Ok(ExecutedSwap::from_quote(&quote, signature))
    }
}
