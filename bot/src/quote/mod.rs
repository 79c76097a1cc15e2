// bot/src/quote/mod.rs
// Контракт внешнего сервиса котировок и маршрутизации

pub mod jupiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use crate::error::QuoteError;

pub use jupiter::JupiterClient;

/// Запрос котировки для текущей ноги
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteRequest {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount: u64,
}

/// Котировка. `raw` хранит ответ сервиса целиком: маршрутные поля
/// непрозрачны для агента и возвращаются в запрос инструкций как есть.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub in_amount: u64,
    pub out_amount: u64,
    pub raw: Value,
}

impl Quote {
    /// Разбор ответа `/quote` (суммы приходят строками)
    pub fn from_response(raw: Value) -> Result<Self, QuoteError> {
        let field = |name: &str| -> Result<&str, QuoteError> {
            raw.get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| QuoteError::Decode(format!("нет поля {}", name)))
        };
        let amount = |name: &str| -> Result<u64, QuoteError> {
            match raw.get(name) {
                Some(Value::String(s)) => s
                    .parse()
                    .map_err(|_| QuoteError::Decode(format!("{} не число: {}", name, s))),
                Some(Value::Number(n)) => n
                    .as_u64()
                    .ok_or_else(|| QuoteError::Decode(format!("{} не u64: {}", name, n))),
                _ => Err(QuoteError::Decode(format!("нет поля {}", name))),
            }
        };
        let mint = |name: &str| -> Result<Pubkey, QuoteError> {
            let value = field(name)?;
            Pubkey::from_str(value)
                .map_err(|_| QuoteError::Decode(format!("{} не адрес: {}", name, value)))
        };

        Ok(Self {
            input_mint: mint("inputMint")?,
            output_mint: mint("outputMint")?,
            in_amount: amount("inAmount")?,
            out_amount: amount("outAmount")?,
            raw: raw.clone(),
        })
    }

    /// Котировка относится именно к запрошенной ноге: та же пара и та же сумма входа
    pub fn matches(&self, request: &QuoteRequest) -> bool {
        self.input_mint == request.input_mint
            && self.output_mint == request.output_mint
            && self.in_amount == request.amount
    }
}

/// Аккаунт инструкции в формате сервиса
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDescriptor {
    pub pubkey: String,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// Инструкция в формате сервиса: данные в base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionDescriptor {
    pub program_id: String,
    pub accounts: Vec<AccountDescriptor>,
    pub data: String,
}

/// Ответ `/swap-instructions`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInstructions {
    #[serde(default)]
    pub token_ledger_instruction: Option<InstructionDescriptor>,
    #[serde(default)]
    pub compute_budget_instructions: Vec<InstructionDescriptor>,
    #[serde(default)]
    pub other_instructions: Vec<InstructionDescriptor>,
    #[serde(default)]
    pub setup_instructions: Vec<InstructionDescriptor>,
    pub swap_instruction: Option<InstructionDescriptor>,
    #[serde(default)]
    pub cleanup_instruction: Option<InstructionDescriptor>,
    #[serde(default)]
    pub address_lookup_table_addresses: Vec<String>,
}

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;

    async fn swap_instructions(
        &self,
        quote: &Quote,
        wallet: &Pubkey,
    ) -> Result<SwapInstructions, QuoteError>;
}
