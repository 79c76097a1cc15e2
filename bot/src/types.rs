// bot/src/types.rs
// Общие типы: запись агента, статусы, балансы, события журнала

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Какой из двух минтов продаётся в текущей ноге
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Продаём базовый минт (первый минт записи)
    #[default]
    Base,
    /// Продаём котируемый минт (второй минт записи)
    Quote,
}

impl TradeSide {
    pub fn opposite(self) -> Self {
        match self {
            TradeSide::Base => TradeSide::Quote,
            TradeSide::Quote => TradeSide::Base,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeSide::Base => write!(f, "base"),
            TradeSide::Quote => write!(f, "quote"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Active,
    #[default]
    Deactivated,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Active => write!(f, "ACTIVE"),
            AgentStatus::Deactivated => write!(f, "DEACTIVATED"),
        }
    }
}

/// Идентификатор изолированного воркера
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerHandle {
    Process { pid: u32 },
    Thread { name: String },
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerHandle::Process { pid } => write!(f, "pid {}", pid),
            WorkerHandle::Thread { name } => write!(f, "thread {}", name),
        }
    }
}

/// Балансы кошелька агента в базовых единицах
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    /// Нативный баланс в lamports (резерв на комиссии)
    pub native: u64,
    /// ATA базового минта
    pub base: u64,
    /// ATA котируемого минта
    pub quote: u64,
}

/// Запись конфигурации агента из внешнего хранилища.
///
/// Конечные точки необязательны: при отсутствии берутся значения по умолчанию
/// супервизора (`AgentDefaults`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,
    #[serde(default)]
    pub ledger_endpoint: Option<String>,
    #[serde(default)]
    pub quote_endpoint: Option<String>,
    /// JSON-массив байт ключа (или base58-строка)
    pub secret_key: String,
    pub base_mint: String,
    pub quote_mint: String,
    #[serde(default)]
    pub initial_side: TradeSide,
    pub initial_amount: u64,
    pub initial_price_threshold: u64,
    #[serde(default = "default_target_gain")]
    pub target_gain_percentage: f64,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub worker: Option<WorkerHandle>,
    #[serde(default)]
    pub last_balances: Option<Balances>,
}

fn default_target_gain() -> f64 {
    1.0
}

impl AgentRecord {
    /// Применение обновления состояния запуска к записи
    pub fn apply(&mut self, update: &RunStateUpdate) {
        match update {
            RunStateUpdate::Activated { worker } => {
                self.status = AgentStatus::Active;
                self.worker = Some(worker.clone());
            }
            RunStateUpdate::Deactivated => {
                self.status = AgentStatus::Deactivated;
                self.worker = None;
            }
            RunStateUpdate::Balances(balances) => {
                self.last_balances = Some(*balances);
            }
        }
    }
}

// Секретный ключ не должен попадать в логи
impl fmt::Debug for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRecord")
            .field("id", &self.id)
            .field("base_mint", &self.base_mint)
            .field("quote_mint", &self.quote_mint)
            .field("initial_side", &self.initial_side)
            .field("initial_amount", &self.initial_amount)
            .field("initial_price_threshold", &self.initial_price_threshold)
            .field("target_gain_percentage", &self.target_gain_percentage)
            .field("status", &self.status)
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

/// Изменение сохранённого состояния запуска агента
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunStateUpdate {
    Activated { worker: WorkerHandle },
    Deactivated,
    Balances(Balances),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMetadata {
    pub log_func: String,
}

/// Структурированное событие журнала агента
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub metadata: LogMetadata,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        log_func: &str,
        agent_id: &str,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            metadata: LogMetadata { log_func: log_func.to_string() },
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}
