// bot/src/config.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AgentError;
use crate::types::{AgentRecord, TradeSide};
use crate::utils::math::PriceThreshold;
use crate::utils::{self, LAMPORTS_PER_SOL};

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEFAULT_QUOTE_API_URL: &str = "https://quote-api.jup.ag/v6";
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// 0.01 SOL: ниже этого резерва агенту нечем платить комиссии
pub const MIN_RESERVE_LAMPORTS: u64 = LAMPORTS_PER_SOL / 100;

/// Значения по умолчанию, которые супервизор передаёт каждому воркеру
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    pub ledger_endpoint: String,
    pub quote_endpoint: String,
    pub trades_path: PathBuf,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            ledger_endpoint: DEFAULT_RPC_URL.to_string(),
            quote_endpoint: DEFAULT_QUOTE_API_URL.to_string(),
            trades_path: PathBuf::from("trades.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    /// Отдельный процесс ОС (по умолчанию)
    Process,
    /// Отдельный поток ОС со своим runtime
    Thread,
}

impl std::str::FromStr for WorkerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(WorkerMode::Process),
            "thread" => Ok(WorkerMode::Thread),
            other => anyhow::bail!("Неизвестный WORKER_MODE: {}", other),
        }
    }
}

/// Конфигурация супервизора, собирается из окружения
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub defaults: AgentDefaults,
    pub store_path: PathBuf,
    pub log_path: PathBuf,
    pub worker_mode: WorkerMode,
    pub stop_grace: Duration,
    pub log_level: String,
}

impl SupervisorConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let env_or = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        Ok(Self {
            defaults: AgentDefaults {
                ledger_endpoint: env_or("SOLANA_RPC_URL", DEFAULT_RPC_URL),
                quote_endpoint: env_or("QUOTE_API_URL", DEFAULT_QUOTE_API_URL),
                trades_path: utils::expand_path(&env_or("TRADES_PATH", "trades.json")),
            },
            store_path: utils::expand_path(&env_or("AGENT_STORE_PATH", "agents.json")),
            log_path: utils::expand_path(&env_or("AGENT_LOG_PATH", "agent_logs.jsonl")),
            worker_mode: env_or("WORKER_MODE", "process").parse()?,
            stop_grace: Duration::from_millis(
                env_or("STOP_GRACE_MS", "3000")
                    .parse()
                    .context("Invalid STOP_GRACE_MS")?,
            ),
            log_level: env_or("LOG_LEVEL", "info"),
        })
    }
}

/// Пара минтов агента. Порядок фиксирован: base = первый минт записи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintPair {
    pub base: Pubkey,
    pub quote: Pubkey,
}

impl MintPair {
    pub fn mint(&self, side: TradeSide) -> Pubkey {
        match side {
            TradeSide::Base => self.base,
            TradeSide::Quote => self.quote,
        }
    }
}

/// Неизменяемая конфигурация одного агента
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub ledger_endpoint: String,
    pub quote_endpoint: String,
    pub keypair: Arc<Keypair>,
    pub mints: MintPair,
    pub initial_side: TradeSide,
    pub initial_amount: u64,
    pub initial_price_threshold: PriceThreshold,
    pub target_gain_percentage: f64,
    pub check_interval: Duration,
    pub min_reserve_lamports: u64,
    pub trades_path: PathBuf,
}

impl AgentConfig {
    /// Валидация записи и построение конфигурации. Сеть не используется.
    pub fn from_record(
        record: &AgentRecord,
        defaults: &AgentDefaults,
    ) -> std::result::Result<Self, AgentError> {
        let invalid = |e: anyhow::Error| AgentError::InvalidConfig(format!("{:#}", e));

        let base = utils::parse_pubkey(&record.base_mint)
            .context("base mint")
            .map_err(invalid)?;
        let quote = utils::parse_pubkey(&record.quote_mint)
            .context("quote mint")
            .map_err(invalid)?;
        if base == quote {
            return Err(AgentError::InvalidConfig(
                "base и quote минты совпадают".to_string(),
            ));
        }

        let keypair = utils::decode_keypair(&record.secret_key).map_err(invalid)?;

        if record.initial_amount == 0 {
            return Err(AgentError::InvalidConfig(
                "initialAmount должен быть больше нуля".to_string(),
            ));
        }
        if record.initial_price_threshold == 0 {
            return Err(AgentError::InvalidConfig(
                "initialPriceThreshold должен быть больше нуля".to_string(),
            ));
        }
        if !record.target_gain_percentage.is_finite() || record.target_gain_percentage < 0.0 {
            return Err(AgentError::InvalidConfig(format!(
                "Недопустимый targetGainPercentage: {}",
                record.target_gain_percentage
            )));
        }

        let check_interval = match record.poll_interval_ms {
            Some(0) => {
                return Err(AgentError::InvalidConfig(
                    "pollIntervalMs должен быть больше нуля".to_string(),
                ))
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_CHECK_INTERVAL,
        };

        Ok(Self {
            agent_id: record.id.clone(),
            ledger_endpoint: record
                .ledger_endpoint
                .clone()
                .unwrap_or_else(|| defaults.ledger_endpoint.clone()),
            quote_endpoint: record
                .quote_endpoint
                .clone()
                .unwrap_or_else(|| defaults.quote_endpoint.clone()),
            keypair: Arc::new(keypair),
            mints: MintPair { base, quote },
            initial_side: record.initial_side,
            initial_amount: record.initial_amount,
            initial_price_threshold: PriceThreshold::from_amount(record.initial_price_threshold),
            target_gain_percentage: record.target_gain_percentage,
            check_interval,
            min_reserve_lamports: MIN_RESERVE_LAMPORTS,
            trades_path: agent_trades_path(&defaults.trades_path, &record.id),
        })
    }

    pub fn wallet(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

/// У каждого агента свой файл сделок: `trades.json` -> `trades-<id>.json`
fn agent_trades_path(base: &Path, agent_id: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trades".to_string());
    let file_name = match base.extension() {
        Some(ext) => format!("{}-{}.{}", stem, agent_id, ext.to_string_lossy()),
        None => format!("{}-{}", stem, agent_id),
    };
    base.with_file_name(file_name)
}
