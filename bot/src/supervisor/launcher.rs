// bot/src/supervisor/launcher.rs
// Изолированный воркер с обменом сообщениями: отдельный процесс или отдельный поток

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::protocol::{decode_line, encode_line, ControlMessage, WorkerMessage, WorkerSeed};
use crate::types::WorkerHandle;
use crate::worker::run_worker;

/// Как завершился воркер
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Код 0 / поток вернулся без ошибки
    Clean,
    Failed(String),
}

/// Сигналы воркеру. `kill` не ждёт сотрудничества воркера.
pub trait WorkerControl: Send + Sync {
    fn request_stop(&self) -> Result<()>;
    fn kill(&self) -> Result<()>;
}

/// Запущенный воркер глазами супервизора
pub struct WorkerChannels {
    pub handle: WorkerHandle,
    pub messages: mpsc::UnboundedReceiver<WorkerMessage>,
    pub control: Arc<dyn WorkerControl>,
    pub exit: oneshot::Receiver<WorkerExit>,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, seed: WorkerSeed) -> Result<WorkerChannels>;
}

// ============================================================================
// ПРОЦЕСС
// ============================================================================

/// Перезапуск текущего бинарника с подкомандой `worker`.
/// stdin: управляющие сообщения, stdout: сообщения воркера, stderr: логи.
pub struct ProcessLauncher {
    program: PathBuf,
}

enum ProcessCommand {
    Stop,
    Kill,
}

struct ProcessControl {
    commands: mpsc::UnboundedSender<ProcessCommand>,
}

impl WorkerControl for ProcessControl {
    fn request_stop(&self) -> Result<()> {
        self.commands
            .send(ProcessCommand::Stop)
            .map_err(|_| anyhow!("Процесс воркера уже завершён"))
    }

    fn kill(&self) -> Result<()> {
        self.commands
            .send(ProcessCommand::Kill)
            .map_err(|_| anyhow!("Процесс воркера уже завершён"))
    }
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("Не удалось определить путь к бинарнику")?;
        Ok(Self::new(program))
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, seed: WorkerSeed) -> Result<WorkerChannels> {
        let agent_id = seed.record.id.clone();

        let mut child = Command::new(&self.program)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Не удалось запустить {}", self.program.display()))?;

        let pid = child.id().context("Процесс воркера завершился сразу после запуска")?;
        let mut stdin = child.stdin.take().context("Нет stdin у процесса воркера")?;
        let stdout = child.stdout.take().context("Нет stdout у процесса воркера")?;

        let start = encode_line(&ControlMessage::Start(seed))?;
        stdin
            .write_all(start.as_bytes())
            .await
            .context("Не удалось передать запись воркеру")?;
        stdin.flush().await?;

        // stdout -> канал сообщений; EOF означает, что процесс закрыл вывод
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let reader_agent = agent_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match decode_line::<WorkerMessage>(&line) {
                        Ok(message) => {
                            if message_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("[{}] Пропускаем строку воркера: {:#}", reader_agent, e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("[{}] Ошибка чтения stdout воркера: {}", reader_agent, e);
                        break;
                    }
                }
            }
        });

        // Владелец процесса: ждёт выхода и исполняет команды остановки
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut stdin = Some(stdin);
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(command) = command_rx.recv() => match command {
                        ProcessCommand::Stop => {
                            if let Some(mut pipe) = stdin.take() {
                                if let Ok(line) = encode_line(&ControlMessage::Stop) {
                                    let _ = pipe.write_all(line.as_bytes()).await;
                                    let _ = pipe.flush().await;
                                }
                            }
                        }
                        ProcessCommand::Kill => {
                            if let Err(e) = child.start_kill() {
                                warn!("[{}] Не удалось убить процесс воркера: {}", agent_id, e);
                            }
                        }
                    },
                }
            };

            let exit = match status {
                Ok(status) if status.success() => WorkerExit::Clean,
                Ok(status) => WorkerExit::Failed(format!("процесс завершился: {}", status)),
                Err(e) => WorkerExit::Failed(format!("не удалось дождаться процесса: {}", e)),
            };
            debug!("[{}] Процесс воркера завершён: {:?}", agent_id, exit);
            let _ = exit_tx.send(exit);
        });

        Ok(WorkerChannels {
            handle: WorkerHandle::Process { pid },
            messages: message_rx,
            control: Arc::new(ProcessControl { commands: command_tx }),
            exit: exit_rx,
        })
    }
}

// ============================================================================
// ПОТОК
// ============================================================================

/// Отдельный поток ОС со своим current-thread runtime. Паника ловится
/// и становится аварийным выходом.
#[derive(Debug, Default)]
pub struct ThreadLauncher;

struct ThreadControl {
    stop: watch::Sender<bool>,
}

impl WorkerControl for ThreadControl {
    fn request_stop(&self) -> Result<()> {
        self.stop.send_replace(true);
        Ok(())
    }

    // Поток нельзя прервать снаружи: остаётся только кооперативная остановка
    fn kill(&self) -> Result<()> {
        warn!("Поток воркера нельзя убить, повторяем запрос остановки");
        self.request_stop()
    }
}

#[async_trait]
impl WorkerLauncher for ThreadLauncher {
    async fn launch(&self, seed: WorkerSeed) -> Result<WorkerChannels> {
        let name = format!("agent-{}", seed.record.id);

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .context("Не удалось создать runtime воркера")?;
                    runtime.block_on(run_worker(seed, message_tx, stop_rx))?;
                    Ok(())
                }));

                let exit = match result {
                    Ok(Ok(())) => WorkerExit::Clean,
                    Ok(Err(e)) => WorkerExit::Failed(format!("{:#}", e)),
                    Err(panic) => WorkerExit::Failed(format!("паника: {}", panic_message(panic.as_ref()))),
                };
                let _ = exit_tx.send(exit);
            })
            .with_context(|| format!("Не удалось создать поток {}", name))?;

        Ok(WorkerChannels {
            handle: WorkerHandle::Thread { name },
            messages: message_rx,
            control: Arc::new(ThreadControl { stop: stop_tx }),
            exit: exit_rx,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "неизвестная паника".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extracts_payload() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 7");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "неизвестная паника");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::supervisor::protocol::WorkerOutcome;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use std::time::Duration;
        use tokio::time::timeout;

        /// Воркер на sh: сохраняет стартовую строку, отвечает `Started`
        /// и выходит с кодом 0 по `Stop` или EOF
        const COOPERATIVE: &str = r#"#!/bin/sh
read -r start
printf '%s\n' "$start" > "$0.seed"
echo '{"type":"outcome","payload":{"status":"started","wallet":"W1"}}'
echo '{"type":"stopped","payload":{"reason":"ready"}}'
while read -r line; do
  case "$line" in
    *'"stop"'*) exit 0 ;;
  esac
done
exit 0
"#;

        /// Воркер, который игнорирует остановку
        const STUBBORN: &str = r#"#!/bin/sh
read -r start
echo '{"type":"outcome","payload":{"status":"started","wallet":"W2"}}'
exec sleep 600
"#;

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn seed(agent_id: &str) -> WorkerSeed {
            WorkerSeed {
                record: crate::test_support::sample_record(agent_id),
                defaults: crate::config::AgentDefaults::default(),
            }
        }

        async fn next_message(channels: &mut WorkerChannels) -> WorkerMessage {
            timeout(Duration::from_secs(5), channels.messages.recv())
                .await
                .expect("worker message timed out")
                .expect("worker closed stdout")
        }

        #[tokio::test]
        async fn test_process_worker_start_and_cooperative_stop() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "worker.sh", COOPERATIVE);

            let mut channels = ProcessLauncher::new(&script).launch(seed("agent-p")).await.unwrap();
            assert!(matches!(channels.handle, WorkerHandle::Process { .. }));

            assert_eq!(
                next_message(&mut channels).await,
                WorkerMessage::Outcome(WorkerOutcome::Started { wallet: "W1".into() })
            );
            assert!(matches!(next_message(&mut channels).await, WorkerMessage::Stopped { .. }));

            // `.seed` записан до первого ответа
            let start_line = std::fs::read_to_string(script.with_extension("sh.seed")).unwrap();
            match decode_line::<ControlMessage>(&start_line).unwrap() {
                ControlMessage::Start(received) => assert_eq!(received.record.id, "agent-p"),
                ControlMessage::Stop => panic!("expected start message"),
            }

            channels.control.request_stop().unwrap();
            let exit = timeout(Duration::from_secs(5), channels.exit).await.unwrap().unwrap();
            assert_eq!(exit, WorkerExit::Clean);
        }

        #[tokio::test]
        async fn test_process_worker_ignoring_stop_is_killed() {
            let dir = tempfile::tempdir().unwrap();
            let script = write_script(dir.path(), "stubborn.sh", STUBBORN);

            let mut channels = ProcessLauncher::new(&script).launch(seed("agent-s")).await.unwrap();
            assert_eq!(
                next_message(&mut channels).await,
                WorkerMessage::Outcome(WorkerOutcome::Started { wallet: "W2".into() })
            );

            channels.control.request_stop().unwrap();
            let mut exit = channels.exit;
            assert!(timeout(Duration::from_millis(500), &mut exit).await.is_err());

            channels.control.kill().unwrap();
            let exit = timeout(Duration::from_secs(5), exit).await.unwrap().unwrap();
            assert!(matches!(exit, WorkerExit::Failed(_)));
        }
    }

    #[tokio::test]
    async fn test_thread_worker_with_invalid_record_fails_fast() {
        let mut record = crate::test_support::sample_record("broken");
        record.base_mint = "not-a-mint".to_string();
        let seed = WorkerSeed {
            record,
            defaults: crate::config::AgentDefaults::default(),
        };

        let mut channels = ThreadLauncher.launch(seed).await.unwrap();
        assert_eq!(channels.handle, WorkerHandle::Thread { name: "agent-broken".into() });

        let first = channels.messages.recv().await.unwrap();
        assert!(matches!(
            first,
            WorkerMessage::Outcome(crate::supervisor::protocol::WorkerOutcome::Failed { .. })
        ));
        assert!(matches!(channels.exit.await.unwrap(), WorkerExit::Failed(_)));
    }
}
