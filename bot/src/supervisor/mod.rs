// bot/src/supervisor/mod.rs
// Супервизор: по воркеру на агента, старт/стоп, сверка состояния после выхода

pub mod launcher;
pub mod protocol;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::config::AgentDefaults;
use crate::error::SupervisorError;
use crate::store::{AgentStore, LogSink};
use crate::types::{AgentRecord, LogEvent, LogLevel, RunStateUpdate, WorkerHandle};
use launcher::{WorkerChannels, WorkerControl, WorkerExit, WorkerLauncher};
use protocol::{WorkerMessage, WorkerOutcome, WorkerSeed};

/// Результат успешного старта
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedAgent {
    pub agent_id: String,
    pub handle: WorkerHandle,
    pub wallet: String,
}

struct RunningWorker {
    handle: WorkerHandle,
    control: Arc<dyn WorkerControl>,
    exit: watch::Receiver<Option<WorkerExit>>,
    stopping: Arc<AtomicBool>,
}

pub struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    sink: Arc<dyn LogSink>,
    store: Arc<dyn AgentStore>,
    defaults: AgentDefaults,
    stop_grace: Duration,
    workers: Arc<DashMap<String, RunningWorker>>,
    finished: Arc<DashMap<String, WorkerExit>>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn WorkerLauncher>,
        sink: Arc<dyn LogSink>,
        store: Arc<dyn AgentStore>,
        defaults: AgentDefaults,
        stop_grace: Duration,
    ) -> Self {
        Self {
            launcher,
            sink,
            store,
            defaults,
            stop_grace,
            workers: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
        }
    }

    /// Запуск воркера. Запись сразу помечается активной, затем ждём первый
    /// ответ воркера.
    pub async fn start(&self, record: AgentRecord) -> Result<StartedAgent, SupervisorError> {
        let agent_id = record.id.clone();
        if self.workers.contains_key(&agent_id) {
            return Err(SupervisorError::AlreadyRunning(agent_id));
        }

        info!("🚀 Запуск агента {}", agent_id);
        let seed = WorkerSeed {
            record,
            defaults: self.defaults.clone(),
        };
        let WorkerChannels {
            handle,
            messages,
            control,
            exit,
        } = self.launcher.launch(seed).await.map_err(SupervisorError::Launch)?;

        let (exit_tx, mut exit_rx) = watch::channel(None);
        let stopping = Arc::new(AtomicBool::new(false));

        match self.workers.entry(agent_id.clone()) {
            Entry::Occupied(_) => {
                // параллельный старт того же агента успел раньше
                let _ = control.kill();
                return Err(SupervisorError::AlreadyRunning(agent_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(RunningWorker {
                    handle: handle.clone(),
                    control,
                    exit: exit_rx.clone(),
                    stopping: stopping.clone(),
                });
            }
        }
        self.finished.remove(&agent_id);

        if let Err(e) = self
            .store
            .update_run_state(&agent_id, RunStateUpdate::Activated { worker: handle.clone() })
            .await
        {
            warn!("⚠️ Не удалось сохранить статус агента {}: {:#}", agent_id, e);
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(pump(PumpContext {
            agent_id: agent_id.clone(),
            sink: self.sink.clone(),
            store: self.store.clone(),
            workers: self.workers.clone(),
            finished: self.finished.clone(),
            stopping,
            exit_tx,
            outcome_tx,
            messages,
            exit,
        }));

        match outcome_rx.await {
            Ok(WorkerOutcome::Started { wallet }) => {
                info!("✅ Агент {} запущен ({}), кошелёк {}", agent_id, handle, wallet);
                Ok(StartedAgent {
                    agent_id,
                    handle,
                    wallet,
                })
            }
            Ok(WorkerOutcome::Failed { error }) => Err(SupervisorError::StartFailed {
                agent_id,
                reason: error,
            }),
            Err(_) => {
                let detail = match wait_exit(&mut exit_rx).await {
                    Some(WorkerExit::Failed(detail)) => detail,
                    Some(WorkerExit::Clean) => "воркер вышел без ответа".to_string(),
                    None => "воркер пропал без статуса".to_string(),
                };
                Err(SupervisorError::WorkerCrashed { agent_id, detail })
            }
        }
    }

    /// Кооперативная остановка, после `stop_grace` принудительная.
    /// Без воркера ничего не делает.
    pub async fn stop(&self, agent_id: &str) -> Result<(), SupervisorError> {
        let (control, mut exit_rx, stopping) = match self.workers.get(agent_id) {
            Some(worker) => (worker.control.clone(), worker.exit.clone(), worker.stopping.clone()),
            None => {
                info!("Агент {} не запущен, останавливать нечего", agent_id);
                return Ok(());
            }
        };

        info!("🛑 Остановка агента {}", agent_id);
        stopping.store(true, Ordering::SeqCst);
        if let Err(e) = control.request_stop() {
            warn!("Агент {}: {:#}", agent_id, e);
        }

        let exited = tokio::time::timeout(self.stop_grace, wait_exit(&mut exit_rx))
            .await
            .is_ok();
        if !exited {
            warn!(
                "⚠️ Агент {} не остановился за {:?}, принудительное завершение",
                agent_id, self.stop_grace
            );
            control.kill().map_err(|e| SupervisorError::Signal {
                agent_id: agent_id.to_string(),
                detail: format!("{:#}", e),
            })?;
            if tokio::time::timeout(self.stop_grace, wait_exit(&mut exit_rx))
                .await
                .is_err()
            {
                error!("❌ Агент {} не завершился после принудительной остановки", agent_id);
            }
        }

        if let Err(e) = self
            .store
            .update_run_state(agent_id, RunStateUpdate::Deactivated)
            .await
        {
            warn!("⚠️ Не удалось сохранить статус агента {}: {:#}", agent_id, e);
        }
        Ok(())
    }

    /// Ожидание выхода воркера; аварийный выход возвращается ошибкой
    pub async fn wait(&self, agent_id: &str) -> Result<(), SupervisorError> {
        let running = self.workers.get(agent_id).map(|worker| worker.exit.clone());
        let exit = match running {
            Some(mut exit_rx) => wait_exit(&mut exit_rx).await,
            None => match self.finished.get(agent_id) {
                Some(exit) => Some(exit.clone()),
                None => return Err(SupervisorError::UnknownAgent(agent_id.to_string())),
            },
        };

        match exit {
            Some(WorkerExit::Clean) => Ok(()),
            Some(WorkerExit::Failed(detail)) => Err(SupervisorError::WorkerCrashed {
                agent_id: agent_id.to_string(),
                detail,
            }),
            None => Err(SupervisorError::WorkerCrashed {
                agent_id: agent_id.to_string(),
                detail: "воркер пропал без статуса".to_string(),
            }),
        }
    }

    /// Запущенные воркеры
    pub fn status(&self) -> Vec<(String, WorkerHandle)> {
        let mut running: Vec<_> = self
            .workers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.clone()))
            .collect();
        running.sort_by(|a, b| a.0.cmp(&b.0));
        running
    }

    pub fn is_running(&self, agent_id: &str) -> bool {
        self.workers.contains_key(agent_id)
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        for agent_id in ids {
            if let Err(e) = self.stop(&agent_id).await {
                error!("❌ {}", e);
            }
        }
    }
}

async fn wait_exit(exit_rx: &mut watch::Receiver<Option<WorkerExit>>) -> Option<WorkerExit> {
    match exit_rx.wait_for(Option::is_some).await {
        Ok(exit) => exit.clone(),
        Err(_) => None,
    }
}

struct PumpContext {
    agent_id: String,
    sink: Arc<dyn LogSink>,
    store: Arc<dyn AgentStore>,
    workers: Arc<DashMap<String, RunningWorker>>,
    finished: Arc<DashMap<String, WorkerExit>>,
    stopping: Arc<AtomicBool>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
    outcome_tx: oneshot::Sender<WorkerOutcome>,
    messages: mpsc::UnboundedReceiver<WorkerMessage>,
    exit: oneshot::Receiver<WorkerExit>,
}

/// Пересылка сообщений воркера в журнал и хранилище, сверка записи после выхода
async fn pump(ctx: PumpContext) {
    let PumpContext {
        agent_id,
        sink,
        store,
        workers,
        finished,
        stopping,
        exit_tx,
        outcome_tx,
        mut messages,
        exit,
    } = ctx;
    let mut outcome_tx = Some(outcome_tx);

    while let Some(message) = messages.recv().await {
        match message {
            WorkerMessage::Outcome(outcome) => match outcome_tx.take() {
                Some(tx) => {
                    let _ = tx.send(outcome);
                }
                None => warn!("[{}] Повторный ответ о запуске игнорируется", agent_id),
            },
            WorkerMessage::Log(event) => {
                if let Err(e) = sink.append(event).await {
                    warn!("[{}] Не удалось записать событие: {:#}", agent_id, e);
                }
            }
            WorkerMessage::RunState(update) => {
                if let Err(e) = store.update_run_state(&agent_id, update).await {
                    warn!("[{}] Не удалось обновить запись: {:#}", agent_id, e);
                }
            }
            WorkerMessage::Stopped { reason } => {
                info!("[{}] Воркер сообщил об остановке: {}", agent_id, reason);
            }
        }
    }

    let exit = exit
        .await
        .unwrap_or_else(|_| WorkerExit::Failed("воркер пропал без статуса".to_string()));

    if let WorkerExit::Failed(detail) = &exit {
        if !stopping.load(Ordering::SeqCst) {
            error!("❌ Воркер агента {} завершился аварийно: {}", agent_id, detail);
            let event = LogEvent::new(
                LogLevel::Error,
                format!("Воркер завершился аварийно: {}", detail),
                "supervisor",
                &agent_id,
            );
            if let Err(e) = sink.append(event).await {
                warn!("[{}] Не удалось записать событие: {:#}", agent_id, e);
            }
        }
    }

    if let Err(e) = store.update_run_state(&agent_id, RunStateUpdate::Deactivated).await {
        warn!("[{}] Не удалось сохранить статус: {:#}", agent_id, e);
    }

    finished.insert(agent_id.clone(), exit.clone());
    workers.remove(&agent_id);
    exit_tx.send_replace(Some(exit));
}
