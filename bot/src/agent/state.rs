// bot/src/agent/state.rs
// Состояние агента во время работы. Единственный писатель: цикл самого агента.

use solana_sdk::pubkey::Pubkey;
use std::fmt;
use tokio::time::Instant;

use crate::config::MintPair;
use crate::executor::ExecutedSwap;
use crate::quote::{Quote, QuoteRequest};
use crate::types::{Balances, TradeSide};
use crate::utils::math::{self, PriceThreshold};

/// Следующая нога. Минты выводятся из `side`, поэтому пара всегда
/// {base, quote} и вход никогда не совпадает с выходом.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTrade {
    mints: MintPair,
    side: TradeSide,
    amount: u64,
    price_threshold: PriceThreshold,
}

impl PendingTrade {
    pub fn new(mints: MintPair, side: TradeSide, amount: u64, price_threshold: PriceThreshold) -> Self {
        Self {
            mints,
            side,
            amount,
            price_threshold,
        }
    }

    pub fn input_mint(&self) -> Pubkey {
        self.mints.mint(self.side)
    }

    pub fn output_mint(&self) -> Pubkey {
        self.mints.mint(self.side.opposite())
    }

    pub fn side(&self) -> TradeSide {
        self.side
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn price_threshold(&self) -> PriceThreshold {
        self.price_threshold
    }

    pub fn to_request(&self) -> QuoteRequest {
        QuoteRequest {
            input_mint: self.input_mint(),
            output_mint: self.output_mint(),
            amount: self.amount,
        }
    }

    pub fn evaluate(&self, quote: &Quote) -> Evaluation {
        let delta = math::relative_delta(quote.out_amount, self.price_threshold);
        if self.price_threshold.is_exceeded_by(quote.out_amount) {
            Evaluation::Profitable { delta }
        } else {
            Evaluation::BelowThreshold { delta }
        }
    }

    /// Переход на следующую ногу после подтверждённого свопа:
    /// направление меняется, сумма = фактический выход, порог = вход * (1 + g/100)
    pub fn rolled_over(&self, executed: &ExecutedSwap, target_gain_percentage: f64) -> Self {
        Self {
            mints: self.mints,
            side: self.side.opposite(),
            amount: executed.out_amount,
            price_threshold: PriceThreshold::after_leg(executed.in_amount, target_gain_percentage),
        }
    }
}

impl fmt::Display for PendingTrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {} (порог {})",
            self.amount,
            self.input_mint(),
            self.output_mint(),
            self.price_threshold
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Profitable { delta: f64 },
    BelowThreshold { delta: f64 },
}

impl Evaluation {
    pub fn delta(&self) -> f64 {
        match self {
            Evaluation::Profitable { delta } | Evaluation::BelowThreshold { delta } => *delta,
        }
    }

    pub fn is_profitable(&self) -> bool {
        matches!(self, Evaluation::Profitable { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Нативного баланса не хватает на комиссии
    LowBalance,
    /// Остановка по запросу оператора
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::LowBalance => write!(f, "Низкий баланс SOL."),
            ShutdownReason::Requested => write!(f, "Запрошена остановка."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Running,
    ShuttingDown(ShutdownReason),
}

#[derive(Debug, Clone)]
pub struct AgentRuntimeState {
    pub balances: Balances,
    pub pending_trade: PendingTrade,
    pub in_flight: bool,
    /// Срок последнего обработанного тика таймера
    pub last_poll_at: Option<Instant>,
    pub lifecycle: Lifecycle,
}

impl AgentRuntimeState {
    pub fn new(pending_trade: PendingTrade) -> Self {
        Self {
            balances: Balances::default(),
            pending_trade,
            in_flight: false,
            last_poll_at: None,
            lifecycle: Lifecycle::Running,
        }
    }

    /// Запрос остановки не отменяет уже принятую причину
    pub fn begin_shutdown(&mut self, reason: ShutdownReason) {
        if self.lifecycle == Lifecycle::Running {
            self.lifecycle = Lifecycle::ShuttingDown(reason);
        }
    }

    pub fn shutdown_reason(&self) -> Option<ShutdownReason> {
        match self.lifecycle {
            Lifecycle::Running => None,
            Lifecycle::ShuttingDown(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_quote;
    use solana_sdk::signature::Signature;

    fn mints() -> MintPair {
        MintPair {
            base: Pubkey::new_unique(),
            quote: Pubkey::new_unique(),
        }
    }

    fn executed(trade: &PendingTrade, in_amount: u64, out_amount: u64) -> ExecutedSwap {
        ExecutedSwap {
            signature: Signature::new_unique(),
            input_mint: trade.input_mint(),
            output_mint: trade.output_mint(),
            in_amount,
            out_amount,
        }
    }

    #[test]
    fn test_two_mint_invariant_holds_across_rollovers() {
        let pair = mints();
        let mut trade = PendingTrade::new(pair, TradeSide::Quote, 1_000, PriceThreshold::from_amount(2_000));

        for round in 0..6u64 {
            let legs = [trade.input_mint(), trade.output_mint()];
            assert_ne!(legs[0], legs[1]);
            assert!(legs.contains(&pair.base) && legs.contains(&pair.quote));

            let swap = executed(&trade, 1_000 + round, 2_000 + round);
            trade = trade.rolled_over(&swap, 1.0);
        }
    }

    #[test]
    fn test_rollover_law() {
        let pair = mints();
        let trade = PendingTrade::new(pair, TradeSide::Base, 700, PriceThreshold::from_amount(10));

        let next = trade.rolled_over(&executed(&trade, 4_000, 9_000), 2.5);
        assert_eq!(next.amount(), 9_000);
        assert_eq!(next.price_threshold(), PriceThreshold::from_amount(4_100));
        assert_eq!(next.input_mint(), trade.output_mint());
        assert_eq!(next.output_mint(), trade.input_mint());
    }

    #[test]
    fn test_evaluate_threshold_boundary() {
        let pair = mints();
        let trade = PendingTrade::new(pair, TradeSide::Base, 1, PriceThreshold::from_amount(2_000_000));

        let equal = sample_quote(trade.input_mint(), trade.output_mint(), 1, 2_000_000);
        assert!(!trade.evaluate(&equal).is_profitable());
        assert_eq!(trade.evaluate(&equal).delta(), 0.0);

        let above = sample_quote(trade.input_mint(), trade.output_mint(), 1, 2_000_001);
        assert!(trade.evaluate(&above).is_profitable());
    }

    #[test]
    fn test_threshold_beyond_f64_precision_still_triggers() {
        let pair = mints();
        let threshold = 9_007_199_254_740_992u64;
        let trade = PendingTrade::new(pair, TradeSide::Base, 1, PriceThreshold::from_amount(threshold));

        let equal = sample_quote(trade.input_mint(), trade.output_mint(), 1, threshold);
        assert!(!trade.evaluate(&equal).is_profitable());

        let above = sample_quote(trade.input_mint(), trade.output_mint(), 1, threshold + 1);
        assert!(trade.evaluate(&above).is_profitable());
    }

    #[test]
    fn test_first_shutdown_reason_wins() {
        let trade = PendingTrade::new(mints(), TradeSide::Base, 1, PriceThreshold::from_amount(1));
        let mut state = AgentRuntimeState::new(trade);

        state.begin_shutdown(ShutdownReason::LowBalance);
        state.begin_shutdown(ShutdownReason::Requested);
        assert_eq!(state.shutdown_reason(), Some(ShutdownReason::LowBalance));
    }
}
