// bot/src/worker.rs
// Сторона воркера: строит агента из записи и гоняет его цикл,
// всё наружу уходит сообщениями супервизору

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::agent::{AgentExit, ArbAgent};
use crate::config::AgentConfig;
use crate::ledger::RpcLedgerClient;
use crate::quote::JupiterClient;
use crate::store::{AgentStore, LogSink};
use crate::supervisor::protocol::{
    decode_line, encode_line, ControlMessage, WorkerMessage, WorkerOutcome, WorkerSeed,
};
use crate::types::{LogEvent, RunStateUpdate};

/// Журнал агента, пересылаемый супервизору
pub struct ChannelLogSink {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ChannelLogSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LogSink for ChannelLogSink {
    async fn append(&self, event: LogEvent) -> Result<()> {
        self.tx
            .send(WorkerMessage::Log(event))
            .map_err(|_| anyhow!("Канал супервизора закрыт"))
    }
}

/// Обновления состояния запуска; id агента супервизор знает сам
pub struct ChannelStore {
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl ChannelStore {
    pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AgentStore for ChannelStore {
    async fn update_run_state(&self, _agent_id: &str, update: RunStateUpdate) -> Result<()> {
        self.tx
            .send(WorkerMessage::RunState(update))
            .map_err(|_| anyhow!("Канал супервизора закрыт"))
    }
}

/// Жизнь одного воркера: конфигурация, init, `Started`, цикл, `Stopped`.
/// Ошибка конфигурации уходит как `Failed` и возвращается наружу.
pub async fn run_worker(
    seed: WorkerSeed,
    tx: mpsc::UnboundedSender<WorkerMessage>,
    shutdown: watch::Receiver<bool>,
) -> Result<AgentExit> {
    let config = match AgentConfig::from_record(&seed.record, &seed.defaults) {
        Ok(config) => config,
        Err(e) => {
            let _ = tx.send(WorkerMessage::Outcome(WorkerOutcome::Failed { error: e.to_string() }));
            return Err(e.into());
        }
    };

    info!("🌐 [{}] RPC: {}, котировки: {}", config.agent_id, config.ledger_endpoint, config.quote_endpoint);
    let ledger = Arc::new(RpcLedgerClient::new(config.ledger_endpoint.clone()));
    let quotes = Arc::new(JupiterClient::new(config.quote_endpoint.clone()));

    let mut agent = ArbAgent::new(
        config,
        ledger,
        quotes,
        Arc::new(ChannelLogSink::new(tx.clone())),
        Arc::new(ChannelStore::new(tx.clone())),
    );

    agent.init().await;
    let _ = tx.send(WorkerMessage::Outcome(WorkerOutcome::Started {
        wallet: agent.wallet().to_string(),
    }));

    let exit = agent.run_loop(shutdown).await;
    let _ = tx.send(WorkerMessage::Stopped {
        reason: exit.reason().to_string(),
    });
    Ok(exit)
}

/// Точка входа процесса-воркера: первая строка stdin: `Start`,
/// дальше `Stop` или EOF означают остановку.
pub async fn run_process_worker() -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let first = lines
        .next_line()
        .await
        .context("Не удалось прочитать stdin")?
        .context("stdin закрыт до стартового сообщения")?;
    let seed = match decode_line::<ControlMessage>(&first)? {
        ControlMessage::Start(seed) => seed,
        ControlMessage::Stop => {
            info!("Остановка до запуска агента");
            return Ok(());
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Сообщения -> stdout, по одному JSON на строку
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = rx.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!("{:#}", e);
                    continue;
                }
            };
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let control_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match decode_line::<ControlMessage>(&line) {
                    Ok(ControlMessage::Stop) => break,
                    Ok(ControlMessage::Start(_)) => warn!("Повторный Start игнорируется"),
                    Err(e) => warn!("{:#}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Ошибка чтения stdin: {}", e);
                    break;
                }
            }
        }
        control_tx.send_replace(true);
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_tx.send_replace(true);
        }
    });

    let result = run_worker(seed, tx, shutdown_rx).await;
    writer.await.context("Задача вывода воркера упала")?;
    result.map(|exit| info!("Воркер завершён: {}", exit.reason()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentDefaults;
    use crate::test_support::sample_record;
    use crate::types::{Balances, LogLevel};

    #[tokio::test]
    async fn test_channel_collaborators_forward_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelLogSink::new(tx.clone());
        let store = ChannelStore::new(tx);

        sink.append(LogEvent::new(LogLevel::Info, "hello", "init", "agent-1"))
            .await
            .unwrap();
        store
            .update_run_state("agent-1", RunStateUpdate::Balances(Balances::default()))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(WorkerMessage::Log(e)) if e.message == "hello"));
        assert!(matches!(rx.recv().await, Some(WorkerMessage::RunState(RunStateUpdate::Balances(_)))));

        drop(rx);
        assert!(sink
            .append(LogEvent::new(LogLevel::Info, "lost", "init", "agent-1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_invalid_record_reports_failed_outcome() {
        let mut record = sample_record("agent-1");
        record.secret_key = "[1,2,3]".to_string();
        let seed = WorkerSeed {
            record,
            defaults: AgentDefaults::default(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);

        assert!(run_worker(seed, tx, stop_rx).await.is_err());
        match rx.recv().await {
            Some(WorkerMessage::Outcome(WorkerOutcome::Failed { error })) => {
                assert!(error.contains("конфигурация"))
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }
}
