// bot/src/ledger/mod.rs
// Контракт RPC леджера, которым пользуется агент

pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature,
};

pub use rpc::RpcLedgerClient;

/// Параметры отправки транзакции
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    pub max_retries: usize,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            max_retries: 2,
        }
    }
}

/// Результат подтверждения. `err` заполнен, если транзакция упала или blockhash истёк.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    pub err: Option<String>,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64>;

    /// Баланс токен-аккаунта в базовых единицах; 0, если аккаунта нет
    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<u64>;

    /// (blockhash, last_valid_block_height)
    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)>;

    async fn submit(&self, raw_transaction: &[u8], options: SubmitOptions) -> Result<Signature>;

    /// Ожидание подтверждения, ограниченное высотой истечения blockhash
    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        last_valid_block_height: u64,
        commitment: CommitmentConfig,
    ) -> Result<Confirmation>;

    /// Ответ выровнен по `keys`, отсутствующие аккаунты = None
    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>>;
}
