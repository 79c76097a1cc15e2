// bot/src/agent/mod.rs
// Агент ping-pong арбитража: опрос котировки, оценка, своп, переход на следующую ногу

pub mod state;

use chrono::Utc;
use futures::future::BoxFuture;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::AgentConfig;
use crate::error::{QuoteError, SwapError};
use crate::executor::{ExecutedSwap, SwapExecutor};
use crate::ledger::LedgerClient;
use crate::quote::{Quote, QuoteProvider};
use crate::store::{AgentStore, LogSink};
use crate::trade_history::{TradeHistory, TradeLegRecord};
use crate::types::{Balances, LogEvent, LogLevel, RunStateUpdate};
use crate::utils::{self, lamports_to_sol};
use state::{AgentRuntimeState, PendingTrade, ShutdownReason};

/// Пауза перед выходом, чтобы журнал успел дописаться
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type Execution = BoxFuture<'static, Result<ExecutedSwap, SwapError>>;

/// Чем закончился цикл агента
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// Остановлен по запросу
    Stopped,
    /// Остановился сам: резерв ниже минимума
    LowBalance,
}

impl AgentExit {
    pub fn reason(&self) -> &'static str {
        match self {
            AgentExit::Stopped => "stopped",
            AgentExit::LowBalance => "low_balance",
        }
    }
}

/// Неизменяемые коллабораторы агента. Делятся с future исполнения.
struct AgentContext {
    config: AgentConfig,
    ledger: Arc<dyn LedgerClient>,
    executor: SwapExecutor,
    quotes: Arc<dyn QuoteProvider>,
    sink: Arc<dyn LogSink>,
    store: Arc<dyn AgentStore>,
    trades: TradeHistory,
    wallet: Pubkey,
    base_account: Pubkey,
    quote_account: Pubkey,
}

impl AgentContext {
    /// Событие уходит и в tracing, и в журнал агента.
    /// Ошибка журнала не должна останавливать агента.
    async fn log(&self, level: LogLevel, message: String, log_func: &str) {
        match level {
            LogLevel::Info => info!("[{}] {}", self.config.agent_id, message),
            LogLevel::Warning => warn!("[{}] {}", self.config.agent_id, message),
            LogLevel::Error => error!("[{}] {}", self.config.agent_id, message),
        }

        let event = LogEvent::new(level, message, log_func, &self.config.agent_id);
        if let Err(e) = self.sink.append(event).await {
            warn!("[{}] Не удалось записать событие в журнал: {:#}", self.config.agent_id, e);
        }
    }
}

pub struct ArbAgent {
    ctx: Arc<AgentContext>,
    state: AgentRuntimeState,
}

impl ArbAgent {
    /// ATA выводятся локально, без сети
    pub fn new(
        config: AgentConfig,
        ledger: Arc<dyn LedgerClient>,
        quotes: Arc<dyn QuoteProvider>,
        sink: Arc<dyn LogSink>,
        store: Arc<dyn AgentStore>,
    ) -> Self {
        let wallet = config.wallet();
        let base_account = utils::associated_token_address(&wallet, &config.mints.base);
        let quote_account = utils::associated_token_address(&wallet, &config.mints.quote);

        let pending_trade = PendingTrade::new(
            config.mints,
            config.initial_side,
            config.initial_amount,
            config.initial_price_threshold,
        );

        let executor = SwapExecutor::new(ledger.clone(), quotes.clone(), config.keypair.clone());
        let trades = TradeHistory::new(config.trades_path.clone());

        Self {
            ctx: Arc::new(AgentContext {
                config,
                ledger,
                executor,
                quotes,
                sink,
                store,
                trades,
                wallet,
                base_account,
                quote_account,
            }),
            state: AgentRuntimeState::new(pending_trade),
        }
    }

    pub fn wallet(&self) -> Pubkey {
        self.ctx.wallet
    }

    pub fn state(&self) -> &AgentRuntimeState {
        &self.state
    }

    /// Стартовое обновление балансов. Сеть может быть недоступна: это не фатально.
    pub async fn init(&mut self) {
        self.ctx
            .log(
                LogLevel::Info,
                format!("🤖 Запуск агента для кошелька: {}", self.ctx.wallet),
                "init",
            )
            .await;

        self.refresh_balances().await;

        let balances = self.state.balances;
        self.ctx
            .log(
                LogLevel::Info,
                format!(
                    "🏦 Текущие балансы: SOL {}, base {}, quote {}",
                    lamports_to_sol(balances.native, 9),
                    balances.base,
                    balances.quote
                ),
                "init",
            )
            .await;
        self.ctx
            .log(
                LogLevel::Info,
                format!("🎯 Первая нога: {}", self.state.pending_trade),
                "init",
            )
            .await;
    }

    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> AgentExit {
        self.init().await;
        self.run_loop(shutdown).await
    }

    /// Основной цикл. Таймер, исполнение свопа и сигнал остановки опрашиваются
    /// в одной задаче: тик во время подтверждения видит `in_flight` и пропускается.
    pub async fn run_loop(&mut self, mut shutdown: watch::Receiver<bool>) -> AgentExit {
        let mut ticker = interval(self.ctx.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut execution: Option<Execution> = None;
        let mut stop_seen = false;

        if *shutdown.borrow() {
            self.state.begin_shutdown(ShutdownReason::Requested);
            stop_seen = true;
        }

        loop {
            if execution.is_none() {
                if let Some(reason) = self.state.shutdown_reason() {
                    return self.terminate(reason).await;
                }
            }

            tokio::select! {
                result = drive(&mut execution), if execution.is_some() => {
                    execution = None;
                    self.complete(result).await;
                }
                deadline = ticker.tick() => {
                    if self.state.shutdown_reason().is_some() {
                        continue;
                    }
                    if let Some(quote) = self.on_tick(deadline).await {
                        execution = Some(self.start_execution(quote).await);
                    }
                }
                changed = shutdown.changed(), if !stop_seen => {
                    if changed.is_err() || *shutdown.borrow() {
                        stop_seen = true;
                        self.state.begin_shutdown(ShutdownReason::Requested);
                        if self.state.in_flight {
                            self.ctx
                                .log(
                                    LogLevel::Info,
                                    "⏳ Остановка после завершения текущего свопа".to_string(),
                                    "run",
                                )
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// Один тик: котировка для текущей ноги и оценка. Возвращает котировку,
    /// если её надо исполнять. Темп задаёт только таймер.
    async fn on_tick(&mut self, deadline: Instant) -> Option<Quote> {
        self.state.last_poll_at = Some(deadline);

        if self.state.in_flight {
            self.ctx
                .log(
                    LogLevel::Info,
                    "⏳ Ожидание подтверждения предыдущей транзакции...".to_string(),
                    "priceWatch",
                )
                .await;
            return None;
        }

        let request = self.state.pending_trade.to_request();
        let quote = match self.ctx.quotes.quote(&request).await {
            Ok(quote) => quote,
            Err(QuoteError::NoRoute(detail)) => {
                self.ctx
                    .log(LogLevel::Warning, format!("🚫 Маршрут не найден: {}", detail), "getQuote")
                    .await;
                return None;
            }
            Err(e) => {
                self.ctx
                    .log(LogLevel::Error, format!("Ошибка получения котировки: {}", e), "getQuote")
                    .await;
                return None;
            }
        };

        if !quote.matches(&request) {
            self.ctx
                .log(
                    LogLevel::Warning,
                    format!(
                        "Котировка не для текущей ноги: {} {} -> {}, пропускаем",
                        quote.in_amount, quote.input_mint, quote.output_mint
                    ),
                    "getQuote",
                )
                .await;
            return None;
        }

        let evaluation = self.state.pending_trade.evaluate(&quote);
        let delta = evaluation.delta();
        self.ctx
            .log(
                LogLevel::Info,
                format!(
                    "📈 Текущая цена: {} {} порога {} на {:.2}%",
                    quote.out_amount,
                    if delta > 0.0 { "выше" } else { "ниже" },
                    self.state.pending_trade.price_threshold(),
                    (delta * 100.0).abs()
                ),
                "evaluateQuoteAndSwap",
            )
            .await;

        evaluation.is_profitable().then_some(quote)
    }

    async fn start_execution(&mut self, quote: Quote) -> Execution {
        self.state.in_flight = true;
        self.ctx
            .log(
                LogLevel::Info,
                format!(
                    "🚀 Исполняем своп: {} {} -> {} {}",
                    quote.in_amount, quote.input_mint, quote.out_amount, quote.output_mint
                ),
                "executeSwap",
            )
            .await;

        let ctx = Arc::clone(&self.ctx);
        Box::pin(async move { ctx.executor.execute(quote).await })
    }

    /// Итог исполнения. `in_flight` снимается на любом пути;
    /// при ошибке нога и балансы не меняются.
    async fn complete(&mut self, result: Result<ExecutedSwap, SwapError>) {
        self.state.in_flight = false;

        let executed = match result {
            Ok(executed) => executed,
            Err(e) => {
                self.ctx
                    .log(LogLevel::Error, format!("Ошибка исполнения свопа: {}", e), "executeSwap")
                    .await;
                return;
            }
        };

        self.state.pending_trade = self
            .state
            .pending_trade
            .rolled_over(&executed, self.ctx.config.target_gain_percentage);
        self.ctx
            .log(
                LogLevel::Info,
                format!("🔁 Следующая нога: {}", self.state.pending_trade),
                "postTransactionProcessing",
            )
            .await;

        self.refresh_balances().await;
        self.record_trade(&executed).await;
    }

    async fn record_trade(&self, executed: &ExecutedSwap) {
        let record = TradeLegRecord::from_swap(executed, Utc::now());
        match self.ctx.trades.append(record).await {
            Ok(_) => {
                self.ctx
                    .log(
                        LogLevel::Info,
                        format!(
                            "✅ Своп записан: {} {} -> {} {}, TX: {}",
                            executed.in_amount,
                            executed.input_mint,
                            executed.out_amount,
                            executed.output_mint,
                            executed.signature
                        ),
                        "logSwap",
                    )
                    .await;
            }
            Err(e) => {
                self.ctx
                    .log(LogLevel::Error, format!("Ошибка записи свопа: {:#}", e), "logSwap")
                    .await;
            }
        }
    }

    /// Нативный и токен-балансы запрашиваются параллельно.
    /// Ошибка токен-аккаунта читается как 0; ошибка нативного баланса
    /// оставляет прежнее значение и не запускает проверку резерва.
    async fn refresh_balances(&mut self) {
        let ctx = &self.ctx;
        let (native, base, quote) = tokio::join!(
            ctx.ledger.get_balance(&ctx.wallet),
            ctx.ledger.get_token_account_balance(&ctx.base_account),
            ctx.ledger.get_token_account_balance(&ctx.quote_account),
        );

        let native_fetched = match native {
            Ok(lamports) => {
                self.state.balances.native = lamports;
                true
            }
            Err(e) => {
                ctx.log(
                    LogLevel::Error,
                    format!("Ошибка получения баланса SOL: {:#}", e),
                    "refreshBalances",
                )
                .await;
                false
            }
        };
        self.state.balances.base = base.unwrap_or(0);
        self.state.balances.quote = quote.unwrap_or(0);

        if let Err(e) = ctx
            .store
            .update_run_state(&ctx.config.agent_id, RunStateUpdate::Balances(self.state.balances))
            .await
        {
            warn!("[{}] Не удалось сохранить балансы: {:#}", ctx.config.agent_id, e);
        }

        if native_fetched && self.state.balances.native < ctx.config.min_reserve_lamports {
            ctx.log(
                LogLevel::Warning,
                format!(
                    "⚠️ Баланс SOL {} ниже резерва {}",
                    lamports_to_sol(self.state.balances.native, 9),
                    lamports_to_sol(ctx.config.min_reserve_lamports, 9)
                ),
                "refreshBalances",
            )
            .await;
            self.state.begin_shutdown(ShutdownReason::LowBalance);
        }
    }

    async fn terminate(&mut self, reason: ShutdownReason) -> AgentExit {
        let level = match reason {
            ShutdownReason::LowBalance => LogLevel::Warning,
            ShutdownReason::Requested => LogLevel::Info,
        };
        self.ctx
            .log(level, format!("❌ Завершение работы агента... {}", reason), "terminateSession")
            .await;

        let Balances { native, base, quote } = self.state.balances;
        self.ctx
            .log(
                LogLevel::Info,
                format!(
                    "Итоговые балансы: SOL {}, base {}, quote {}",
                    lamports_to_sol(native, 9),
                    base,
                    quote
                ),
                "terminateSession",
            )
            .await;

        let exit = match reason {
            ShutdownReason::LowBalance => {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                AgentExit::LowBalance
            }
            ShutdownReason::Requested => AgentExit::Stopped,
        };

        self.ctx
            .log(LogLevel::Info, "Агент остановлен.".to_string(), "terminateSession")
            .await;
        exit
    }
}

/// Ожидание текущего исполнения; без исполнения не завершается никогда
async fn drive(execution: &mut Option<Execution>) -> Result<ExecutedSwap, SwapError> {
    match execution {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
