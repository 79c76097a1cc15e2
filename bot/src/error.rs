// bot/src/error.rs
// Типизированные ошибки там, где вызывающий код ветвится по виду ошибки

use solana_sdk::signature::Signature;
use thiserror::Error;

/// Ошибка построения агента из записи конфигурации
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("Неверная конфигурация агента: {0}")]
    InvalidConfig(String),
}

/// Ошибки сервиса котировок
#[derive(Debug, Clone, Error)]
pub enum QuoteError {
    /// Структурированный ответ "маршрут не найден"
    #[error("Маршрут не найден: {0}")]
    NoRoute(String),

    #[error("Сервис котировок вернул ошибку {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Сетевая ошибка сервиса котировок: {0}")]
    Transport(String),

    #[error("Некорректный ответ сервиса котировок: {0}")]
    Decode(String),
}

/// Ошибки сборки транзакции
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Не удалось получить инструкции свопа: {0}")]
    Instructions(#[from] QuoteError),

    #[error("Некорректная инструкция {label}: {reason}")]
    MalformedInstruction { label: String, reason: String },

    #[error("Не удалось загрузить lookup-таблицы: {0}")]
    LookupTables(String),

    #[error("Не удалось скомпилировать сообщение v0: {0}")]
    Compile(String),

    #[error("Не удалось подписать транзакцию: {0}")]
    Sign(String),

    #[error("Не удалось сериализовать транзакцию: {0}")]
    Serialize(String),
}

/// Итог неудачной попытки свопа. Состояние агента при этом не меняется.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Ошибка RPC: {0:#}")]
    Ledger(#[from] anyhow::Error),

    #[error("Транзакция {signature} не прошла: {reason}")]
    Failed { signature: Signature, reason: String },
}

/// Ошибки жизненного цикла воркеров
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Агент {0} уже запущен")]
    AlreadyRunning(String),

    #[error("Агент {0} не найден")]
    UnknownAgent(String),

    #[error("Агент {agent_id} не запустился: {reason}")]
    StartFailed { agent_id: String, reason: String },

    #[error("Воркер агента {agent_id} завершился аварийно: {detail}")]
    WorkerCrashed { agent_id: String, detail: String },

    #[error("Не удалось запустить воркер: {0:#}")]
    Launch(anyhow::Error),

    #[error("Не удалось отправить сигнал воркеру {agent_id}: {detail}")]
    Signal { agent_id: String, detail: String },
}
