// bot/src/supervisor/protocol.rs
// Сообщения между супервизором и воркером. В режиме процесса: JSON по строке.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::config::AgentDefaults;
use crate::types::{AgentRecord, LogEvent, RunStateUpdate};

/// Всё, что нужно воркеру для построения агента
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSeed {
    pub record: AgentRecord,
    pub defaults: AgentDefaults,
}

/// Супервизор -> воркер
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ControlMessage {
    Start(WorkerSeed),
    Stop,
}

/// Первый ответ воркера после запуска
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkerOutcome {
    Started { wallet: String },
    Failed { error: String },
}

/// Воркер -> супервизор
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum WorkerMessage {
    Outcome(WorkerOutcome),
    Log(LogEvent),
    RunState(RunStateUpdate),
    Stopped { reason: String },
}

/// Кодирование сообщения в одну строку с переводом строки
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message).context("Не удалось сериализовать сообщение")?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim()).with_context(|| format!("Неверное сообщение: {}", line.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_record;
    use crate::types::{Balances, LogLevel};

    #[test]
    fn test_start_message_carries_record_and_defaults() {
        let seed = WorkerSeed {
            record: sample_record("agent-1"),
            defaults: AgentDefaults::default(),
        };
        let line = encode_line(&ControlMessage::Start(seed.clone())).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        match decode_line::<ControlMessage>(&line).unwrap() {
            ControlMessage::Start(decoded) => {
                assert_eq!(decoded.record.id, "agent-1");
                assert_eq!(decoded.record.secret_key, seed.record.secret_key);
                assert_eq!(decoded.defaults, seed.defaults);
            }
            ControlMessage::Stop => panic!("expected start"),
        }
    }

    #[test]
    fn test_multiline_log_stays_on_one_line() {
        let message = WorkerMessage::Log(LogEvent::new(
            LogLevel::Info,
            "🏦 Текущие балансы:\nSOL 1",
            "init",
            "a",
        ));
        let line = encode_line(&message).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line::<WorkerMessage>(&line).unwrap(), message);
    }

    #[test]
    fn test_run_state_wire_shape() {
        let message = WorkerMessage::RunState(RunStateUpdate::Balances(Balances { native: 1, base: 2, quote: 3 }));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "runState");
        assert_eq!(value["payload"]["type"], "balances");
    }

    #[test]
    fn test_garbage_line_is_error() {
        assert!(decode_line::<ControlMessage>("not json").is_err());
    }
}
