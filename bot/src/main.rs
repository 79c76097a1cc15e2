// bot/src/main.rs
// Точка входа: супервизор ping-pong агентов, консоль оператора и режим воркера
mod agent;
mod config;
mod error;
mod executor;
mod ledger;
mod quote;
mod store;
mod supervisor;
mod trade_history;
mod types;
mod utils;
mod worker;

#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{AgentConfig, AgentDefaults, SupervisorConfig, WorkerMode};
use store::{AgentStore, JsonFileStore, JsonlLogSink};
use supervisor::launcher::{ProcessLauncher, ThreadLauncher, WorkerLauncher};
use supervisor::Supervisor;
use types::{AgentRecord, AgentStatus, RunStateUpdate};

/// Ping-pong арбитраж на Solana: агенты и их супервизор
#[derive(Parser, Debug)]
#[command(name = "pingpong-arb", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Супервизор с консолью оператора (start <id>, stop <id>, status, logs <id>, quit)
    Serve,

    /// Запустить одного агента и ждать его завершения (Ctrl+C останавливает)
    Start {
        /// Идентификатор записи агента
        agent_id: String,
    },

    /// Список записей агентов
    List,

    /// Добавить или заменить запись агента из JSON файла
    Add {
        /// Файл с одной записью агента
        file: PathBuf,
    },

    /// Последние события агента, новые первыми
    Logs {
        agent_id: String,

        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Процесс-воркер: протокол на stdin/stdout
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SupervisorConfig::load()?;

    if let Commands::Worker = cli.command {
        // stdout занят протоколом
        init_logging(&config.log_level, true);
        let code = match worker::run_process_worker().await {
            Ok(()) => 0,
            Err(e) => {
                error!("❌ Воркер завершился с ошибкой: {:#}", e);
                1
            }
        };
        // чтение stdin в tokio не отменяется, runtime не дождётся его при выходе
        std::process::exit(code);
    }

    init_logging(&config.log_level, false);

    match cli.command {
        Commands::Serve => {
            serve(&config).await?;
            std::process::exit(0);
        }
        Commands::Start { agent_id } => run_single(&config, &agent_id).await,
        Commands::List => list_agents(&config).await,
        Commands::Add { file } => add_agent(&config, &file).await,
        Commands::Logs { agent_id, limit } => print_logs(&config, &agent_id, limit).await,
        Commands::Worker => Ok(()),
    }
}

struct Runtime {
    supervisor: Supervisor,
    store: Arc<JsonFileStore>,
    sink: Arc<JsonlLogSink>,
}

fn build_runtime(config: &SupervisorConfig) -> Result<Runtime> {
    let store = Arc::new(JsonFileStore::new(config.store_path.clone()));
    let sink = Arc::new(JsonlLogSink::new(config.log_path.clone()));

    let launcher: Arc<dyn WorkerLauncher> = match config.worker_mode {
        WorkerMode::Process => Arc::new(ProcessLauncher::current_exe()?),
        WorkerMode::Thread => Arc::new(ThreadLauncher),
    };

    let supervisor = Supervisor::new(
        launcher,
        sink.clone(),
        store.clone(),
        config.defaults.clone(),
        config.stop_grace,
    );

    Ok(Runtime {
        supervisor,
        store,
        sink,
    })
}

/// Записи ACTIVE от прошлого запуска: воркеров у них уже нет
async fn reset_stale_records(store: &JsonFileStore) -> Result<()> {
    for record in store.list().await? {
        if record.status == AgentStatus::Active {
            warn!("⚠️ Агент {} помечен активным без воркера, сбрасываем", record.id);
            store
                .update_run_state(&record.id, RunStateUpdate::Deactivated)
                .await?;
        }
    }
    Ok(())
}

async fn serve(config: &SupervisorConfig) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════════╗");
    println!("║    PING-PONG ARB SUPERVISOR                                   ║");
    println!("║    Команды: start <id> | stop <id> | status | logs <id> | quit ║");
    println!("╚════════════════════════════════════════════════════════════════╝\n");

    info!("📋 Хранилище агентов: {}", config.store_path.display());
    info!("📝 Журнал событий: {}", config.log_path.display());
    info!("🔧 Режим воркеров: {:?}", config.worker_mode);

    let runtime = build_runtime(config)?;
    reset_stale_records(&runtime.store).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut console_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if console_open => match line {
                Ok(Some(line)) => {
                    if !handle_command(&runtime, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Консоль закрыта, ждём Ctrl+C");
                    console_open = false;
                }
                Err(e) => {
                    warn!("Ошибка чтения консоли: {}", e);
                    console_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Получен Ctrl+C");
                break;
            }
        }
    }

    info!("Остановка всех агентов...");
    runtime.supervisor.stop_all().await;
    Ok(())
}

/// Одна команда консоли. false = выход.
async fn handle_command(runtime: &Runtime, line: &str) -> bool {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let argument = parts.next();

    match (command, argument) {
        ("", _) => {}
        ("start", Some(agent_id)) => match runtime.store.get(agent_id).await {
            Ok(Some(record)) => match runtime.supervisor.start(record).await {
                Ok(started) => info!("✅ {} запущен: {}", started.agent_id, started.handle),
                Err(e) => error!("❌ {}", e),
            },
            Ok(None) => error!("❌ {}", error::SupervisorError::UnknownAgent(agent_id.to_string())),
            Err(e) => error!("❌ {:#}", e),
        },
        ("stop", Some(agent_id)) => {
            if !runtime.supervisor.is_running(agent_id) {
                info!("Агент {} не запущен", agent_id);
            } else if let Err(e) = runtime.supervisor.stop(agent_id).await {
                error!("❌ {}", e);
            }
        }
        ("status", _) => {
            let running = runtime.supervisor.status();
            if running.is_empty() {
                info!("Запущенных агентов нет");
            }
            for (agent_id, handle) in running {
                info!("   {} -> {}", agent_id, handle);
            }
        }
        ("logs", Some(agent_id)) => {
            let limit = parts.next().and_then(|n| n.parse().ok()).unwrap_or(20);
            match runtime.sink.recent(agent_id, limit).await {
                Ok(events) => {
                    for event in events {
                        info!("   [{}] {} {}", event.timestamp.format("%H:%M:%S"), event.level, event.message);
                    }
                }
                Err(e) => error!("❌ {:#}", e),
            }
        }
        ("quit" | "exit", _) => return false,
        _ => warn!("Неизвестная команда: {}", line),
    }
    true
}

async fn run_single(config: &SupervisorConfig, agent_id: &str) -> Result<()> {
    let runtime = build_runtime(config)?;
    let record = runtime
        .store
        .get(agent_id)
        .await?
        .with_context(|| format!("Агент {} не найден в {}", agent_id, config.store_path.display()))?;

    let started = runtime.supervisor.start(record).await?;
    info!("✅ Агент {} работает ({}), Ctrl+C для остановки", started.agent_id, started.handle);

    tokio::select! {
        result = runtime.supervisor.wait(agent_id) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Получен Ctrl+C");
            runtime.supervisor.stop(agent_id).await?;
        }
    }
    Ok(())
}

async fn list_agents(config: &SupervisorConfig) -> Result<()> {
    let store = JsonFileStore::new(config.store_path.clone());
    let records = store.list().await?;

    if records.is_empty() {
        println!("Агентов нет ({})", store.path().display());
        return Ok(());
    }

    println!("{}", "═".repeat(80));
    for record in records {
        println!(
            "{:<20} {:<12} продаёт {:<5} сумма {:<14} цель +{}%",
            record.id, record.status, record.initial_side, record.initial_amount, record.target_gain_percentage
        );
        if let Some(worker) = &record.worker {
            println!("{:<20} воркер: {}", "", worker);
        }
        if let Some(balances) = record.last_balances {
            println!(
                "{:<20} SOL {} | base {} | quote {}",
                "",
                utils::lamports_to_sol(balances.native, 4),
                balances.base,
                balances.quote
            );
        }
    }
    println!("{}", "═".repeat(80));
    Ok(())
}

async fn add_agent(config: &SupervisorConfig, file: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Не удалось прочитать {}", file.display()))?;
    let record: AgentRecord = serde_json::from_str(&contents)
        .with_context(|| format!("Неверная запись агента в {}", file.display()))?;

    let store = JsonFileStore::new(config.store_path.clone());
    let agent_id = record.id.clone();
    register_agent(&store, &config.defaults, record).await?;
    println!("✅ Агент {} сохранён в {}", agent_id, store.path().display());
    Ok(())
}

/// Запись проверяется так же, как при запуске, и сохраняется неактивной.
/// Запись работающего агента не заменяется.
async fn register_agent(
    store: &JsonFileStore,
    defaults: &AgentDefaults,
    mut record: AgentRecord,
) -> Result<()> {
    AgentConfig::from_record(&record, defaults)?;

    if let Some(existing) = store.get(&record.id).await? {
        if existing.status == AgentStatus::Active {
            anyhow::bail!("Агент {} сейчас активен, сначала остановите его", record.id);
        }
    }

    record.status = AgentStatus::Deactivated;
    record.worker = None;
    store.upsert(record).await
}

async fn print_logs(config: &SupervisorConfig, agent_id: &str, limit: usize) -> Result<()> {
    let sink = JsonlLogSink::new(config.log_path.clone());
    for event in sink.recent(agent_id, limit).await? {
        println!(
            "{} [{}] {}: {}",
            event.timestamp.to_rfc3339(),
            event.level,
            event.metadata.log_func,
            event.message
        );
    }
    Ok(())
}

/// Инициализация системы логирования
fn init_logging(log_level: &str, to_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if to_stderr {
        registry
            .with(tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_line_number(false)
                .with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_line_number(false))
            .init();
    }
}
