// bot/src/store.rs
// Внешние коллабораторы: журнал событий агентов и хранилище записей агентов

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use crate::types::{AgentRecord, LogEvent, RunStateUpdate};

/// Append-only журнал структурированных событий
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, event: LogEvent) -> Result<()>;
}

/// Узкий интерфейс обновления сохранённого состояния запуска агента
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn update_run_state(&self, agent_id: &str, update: RunStateUpdate) -> Result<()>;
}

// ============================================================================
// JSONL ЖУРНАЛ
// ============================================================================

/// Журнал в файле: одна JSON-строка на событие
pub struct JsonlLogSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Последние `limit` событий агента, новые первыми
    pub async fn recent(&self, agent_id: &str, limit: usize) -> Result<Vec<LogEvent>> {
        let _guard = self.lock.lock().await;

        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Не удалось прочитать журнал {}", self.path.display()))
            }
        };

        let mut events: Vec<LogEvent> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<LogEvent>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("Пропускаем повреждённую строку журнала: {}", e);
                    None
                }
            })
            .filter(|event| event.agent_id == agent_id)
            .collect();

        events.reverse();
        events.truncate(limit);
        Ok(events)
    }
}

#[async_trait]
impl LogSink for JsonlLogSink {
    async fn append(&self, event: LogEvent) -> Result<()> {
        let mut line = serde_json::to_string(&event).context("Не удалось сериализовать событие")?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Не удалось открыть журнал {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

// ============================================================================
// ХРАНИЛИЩЕ ЗАПИСЕЙ (JSON МАССИВ)
// ============================================================================

/// Записи агентов в одном JSON файле, read-modify-write под мьютексом
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Result<Vec<AgentRecord>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|r| r.id == agent_id))
    }

    /// Вставка или замена записи по id
    pub async fn upsert(&self, record: AgentRecord) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(&records).await
    }

    async fn load(&self) -> Result<Vec<AgentRecord>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Vec::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("Неверный формат {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Не удалось прочитать {}", self.path.display())),
        }
    }

    async fn save(&self, records: &[AgentRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records).context("Не удалось сериализовать записи")?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Не удалось записать {}", self.path.display()))
    }
}

#[async_trait]
impl AgentStore for JsonFileStore {
    async fn update_run_state(&self, agent_id: &str, update: RunStateUpdate) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let record = records
            .iter_mut()
            .find(|r| r.id == agent_id)
            .with_context(|| format!("Агент {} не найден", agent_id))?;
        record.apply(&update);
        self.save(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_record;
    use crate::types::{AgentStatus, Balances, LogLevel, WorkerHandle};

    #[tokio::test]
    async fn test_jsonl_sink_recent_is_newest_first_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlLogSink::new(dir.path().join("logs.jsonl"));

        for i in 0..5 {
            sink.append(LogEvent::new(LogLevel::Info, format!("a{}", i), "test", "agent-a"))
                .await
                .unwrap();
        }
        sink.append(LogEvent::new(LogLevel::Error, "b0", "test", "agent-b"))
            .await
            .unwrap();

        let recent = sink.recent("agent-a", 3).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a4", "a3", "a2"]);

        let other = sink.recent("agent-b", 100).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].level, LogLevel::Error);
    }

    #[tokio::test]
    async fn test_jsonl_sink_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlLogSink::new(dir.path().join("absent.jsonl"));
        assert!(sink.recent("x", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_round_trip_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("agents.json"));

        store.upsert(sample_record("agent-1")).await.unwrap();
        store.upsert(sample_record("agent-2")).await.unwrap();

        store
            .update_run_state("agent-1", RunStateUpdate::Activated { worker: WorkerHandle::Process { pid: 7 } })
            .await
            .unwrap();
        store
            .update_run_state("agent-1", RunStateUpdate::Balances(Balances { native: 1, base: 2, quote: 3 }))
            .await
            .unwrap();

        let record = store.get("agent-1").await.unwrap().unwrap();
        assert_eq!(record.status, AgentStatus::Active);
        assert_eq!(record.worker, Some(WorkerHandle::Process { pid: 7 }));
        assert_eq!(record.last_balances.unwrap().base, 2);

        let untouched = store.get("agent-2").await.unwrap().unwrap();
        assert_eq!(untouched.status, AgentStatus::Deactivated);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_store_unknown_agent_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("agents.json"));

        assert!(store
            .update_run_state("ghost", RunStateUpdate::Deactivated)
            .await
            .is_err());
    }
}
