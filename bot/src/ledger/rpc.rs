// bot/src/ledger/rpc.rs
// Реализация LedgerClient поверх nonblocking RpcClient с ограниченными ретраями

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig,
    rpc_request::RpcRequest,
};
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature,
};
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{Confirmation, LedgerClient, SubmitOptions};

/// Конфигурация ретраев для RPC запросов
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    /// Расчёт задержки с exponential backoff
    fn delay(&self, attempt: usize) -> Duration {
        let ms = if self.exponential_backoff {
            self.base_delay_ms * 2_u64.pow(attempt as u32)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(ms)
    }
}

/// Интервал опроса статуса подписи
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct RpcLedgerClient {
    client: RpcClient,
    retry_config: RetryConfig,
}

impl RpcLedgerClient {
    pub fn new(url: String) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url, CommitmentConfig::confirmed()),
            retry_config: RetryConfig::default(),
        }
    }
}

/// RPC отвечает ошибкой, а не нулём, когда ATA ещё не создан
fn is_missing_account(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("could not find account") || message.contains("invalid param")
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        self.client
            .get_balance(pubkey)
            .await
            .with_context(|| format!("RPC getBalance {}", pubkey))
    }

    async fn get_token_account_balance(&self, account: &Pubkey) -> Result<u64> {
        match self.client.get_token_account_balance(account).await {
            Ok(amount) => amount
                .amount
                .parse::<u64>()
                .with_context(|| format!("Некорректный amount токен-аккаунта {}", account)),
            Err(e) if is_missing_account(&e.to_string()) => {
                debug!("Токен-аккаунт {} не найден, баланс 0", account);
                Ok(0)
            }
            Err(e) => Err(e).with_context(|| format!("RPC getTokenAccountBalance {}", account)),
        }
    }

    async fn get_latest_blockhash(&self) -> Result<(Hash, u64)> {
        self.client
            .get_latest_blockhash_with_commitment(self.client.commitment())
            .await
            .context("RPC getLatestBlockhash")
    }

    async fn submit(&self, raw_transaction: &[u8], options: SubmitOptions) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(self.client.commitment().commitment),
            encoding: Some(UiTransactionEncoding::Base64),
            max_retries: Some(options.max_retries),
            ..Default::default()
        };
        let params = serde_json::json!([BASE64.encode(raw_transaction), config]);

        let mut last_error = None;

        // Повторная отправка тех же байт безопасна: подпись одна и та же
        for attempt in 0..self.retry_config.max_retries {
            match self
                .client
                .send::<String>(RpcRequest::SendTransaction, params.clone())
                .await
            {
                Ok(signature) => {
                    debug!("Транзакция отправлена: {} (попытка {})", signature, attempt + 1);
                    return Signature::from_str(&signature)
                        .with_context(|| format!("RPC вернул некорректную подпись {}", signature));
                }
                Err(e) => {
                    warn!("Ошибка отправки (попытка {}): {}", attempt + 1, e);
                    last_error = Some(e);

                    if attempt < self.retry_config.max_retries - 1 {
                        sleep(self.retry_config.delay(attempt)).await;
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Не удалось отправить транзакцию после {} попыток: {:?}",
            self.retry_config.max_retries,
            last_error
        ))
    }

    async fn confirm(
        &self,
        signature: &Signature,
        blockhash: &Hash,
        last_valid_block_height: u64,
        commitment: CommitmentConfig,
    ) -> Result<Confirmation> {
        loop {
            match self
                .client
                .get_signature_status_with_commitment(signature, commitment)
                .await
            {
                Ok(Some(Ok(()))) => return Ok(Confirmation { err: None }),
                Ok(Some(Err(e))) => {
                    return Ok(Confirmation {
                        err: Some(format!("{:?}", e)),
                    })
                }
                Ok(None) => {}
                Err(e) => debug!("Статус {} недоступен: {}", signature, e),
            }

            let block_height = self
                .client
                .get_block_height_with_commitment(commitment)
                .await
                .context("RPC getBlockHeight")?;
            if block_height > last_valid_block_height {
                return Ok(Confirmation {
                    err: Some(format!(
                        "blockhash {} истёк на высоте {} (последняя валидная {})",
                        blockhash, block_height, last_valid_block_height
                    )),
                });
            }

            sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }

    async fn get_multiple_accounts(&self, keys: &[Pubkey]) -> Result<Vec<Option<Account>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.client
            .get_multiple_accounts(keys)
            .await
            .context("RPC getMultipleAccounts")
    }
}
