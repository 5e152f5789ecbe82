//! Walk-forward backtest of the support/breakout planner.
//!
//! Every flat bar re-plans from the trailing `warmup_bars` window, fills
//! entries at the better of the open and the trigger, shifts exits by the
//! slippage and settles on the first exit the bar's range touches. Balances
//! are kept to the cent, fees are charged once per round trip.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data as StatsData, Distribution};

use crate::services::market_data::{fetch_range, CandleStore};
use crate::services::progress::{ProgressSink, ProgressSnapshot};
use crate::services::strategies::order_point::{plan_order, PlanParams};
use crate::services::strategies::{Candle, Interval, Side};
use crate::utils::errors::EngineError;
use crate::utils::rounding::round_cash;

pub const INITIAL_PRINCIPAL: f64 = 1000.0;
/// A snapshot goes out on every bar index divisible by this.
pub const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestParams {
    pub judge_length: usize,
    pub buffer_percent: f64,
    pub win_percent: f64,
    pub loss_rate: f64,
    /// Charged on the balance when a trade closes.
    pub fee_rate: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self {
            judge_length: 4,
            buffer_percent: 0.005,
            win_percent: 0.02,
            loss_rate: 0.8,
            fee_rate: 0.0,
        }
    }
}

impl BacktestParams {
    pub fn plan_params(&self) -> PlanParams {
        PlanParams {
            judge_length: self.judge_length,
            buffer_percent: self.buffer_percent,
            win_percent: self.win_percent,
            loss_rate: self.loss_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestRequest {
    pub symbol: String,
    pub interval: Interval,
    /// Bars in the rolling planning window.
    pub warmup_bars: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub params: BacktestParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionState {
    pub fn side(self) -> Option<Side> {
        match self {
            PositionState::Flat => None,
            PositionState::Long => Some(Side::Long),
            PositionState::Short => Some(Side::Short),
        }
    }
}

impl From<Side> for PositionState {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => PositionState::Long,
            Side::Short => PositionState::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub side: Side,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub outcome: TradeOutcome,
    pub principal_before: f64,
    pub principal_after: f64,
}

impl TradeRecord {
    pub fn return_pct(&self) -> f64 {
        self.principal_after / self.principal_before - 1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub trades: usize,
    pub win_rate: f64,
    pub total_return: f64,
    pub mean_trade_return: f64,
    pub trade_return_std_dev: f64,
    /// Mean over standard deviation of per-trade returns, not annualised.
    pub sharpe: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestState {
    pub principal: f64,
    pub max_principal: f64,
    pub min_principal: f64,
    pub win_count: u32,
    pub fail_count: u32,
    pub position: PositionState,
    /// Fill price of the open position, 0 when flat.
    pub entry_price: f64,
    /// Size of the open position, 0 when flat.
    pub quantity: f64,
    pub trades: Vec<TradeRecord>,
    #[serde(skip)]
    opened_at: Option<DateTime<Utc>>,
}

impl Default for BacktestState {
    fn default() -> Self {
        Self {
            principal: INITIAL_PRINCIPAL,
            max_principal: INITIAL_PRINCIPAL,
            min_principal: INITIAL_PRINCIPAL,
            win_count: 0,
            fail_count: 0,
            position: PositionState::Flat,
            entry_price: 0.0,
            quantity: 0.0,
            trades: Vec::new(),
            opened_at: None,
        }
    }
}

impl BacktestState {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            principal: self.principal,
            win_count: self.win_count,
            fail_count: self.fail_count,
            max_principal: self.max_principal,
            min_principal: self.min_principal,
        }
    }

    pub fn completed_trades(&self) -> u32 {
        self.win_count + self.fail_count
    }

    pub fn stats(&self) -> PerformanceStats {
        let trades = self.trades.len();
        let returns: Vec<f64> = self.trades.iter().map(TradeRecord::return_pct).collect();
        let data = StatsData::new(returns);
        let mean = data.mean().unwrap_or(0.0);
        let sd = if trades > 1 { data.std_dev().unwrap_or(0.0) } else { 0.0 };

        PerformanceStats {
            trades,
            win_rate: if trades == 0 {
                0.0
            } else {
                f64::from(self.win_count) / trades as f64
            },
            total_return: self.principal / INITIAL_PRINCIPAL - 1.0,
            mean_trade_return: if trades == 0 { 0.0 } else { mean },
            trade_return_std_dev: sd,
            sharpe: if sd > 1e-12 { mean / sd } else { 0.0 },
        }
    }

    fn open(&mut self, side: Side, fill: f64, at: DateTime<Utc>) {
        self.position = side.into();
        self.entry_price = fill;
        self.quantity = self.principal / fill;
        self.opened_at = Some(at);
    }

    fn close(
        &mut self,
        outcome: TradeOutcome,
        exit_price: f64,
        gross: f64,
        fee_rate: f64,
        at: DateTime<Utc>,
    ) {
        let principal_before = self.principal;
        self.principal = round_cash(gross * (1.0 - fee_rate));
        self.max_principal = self.max_principal.max(self.principal);
        self.min_principal = self.min_principal.min(self.principal);
        match outcome {
            TradeOutcome::Win => self.win_count += 1,
            TradeOutcome::Loss => self.fail_count += 1,
        }
        if let Some(side) = self.position.side() {
            self.trades.push(TradeRecord {
                side,
                opened_at: self.opened_at.unwrap_or(at),
                closed_at: at,
                entry_price: self.entry_price,
                exit_price,
                outcome,
                principal_before,
                principal_after: self.principal,
            });
        }
        self.position = PositionState::Flat;
        self.entry_price = 0.0;
        self.quantity = 0.0;
        self.opened_at = None;
    }
}

/// Replay `candles` bar by bar. The first `warmup_bars` only seed the plan.
pub fn simulate(
    candles: &[Candle],
    warmup_bars: usize,
    params: &BacktestParams,
    sink: Option<&dyn ProgressSink>,
) -> Result<BacktestState, EngineError> {
    if candles.len() <= warmup_bars {
        return Err(EngineError::InsufficientData {
            required: warmup_bars,
            actual: candles.len(),
        });
    }
    let plan_params = params.plan_params();
    let mut state = BacktestState::default();
    let mut plan = plan_order(&candles[..warmup_bars], &plan_params)?;

    for i in warmup_bars..candles.len() {
        let bar = &candles[i];
        if i % PROGRESS_EVERY == 0 {
            if let Some(s) = sink {
                s.emit(state.snapshot());
            }
        }

        if state.position == PositionState::Flat {
            if state.principal <= 0.0 {
                log::warn!("backtest balance exhausted at {}", bar.open_time);
                break;
            }
            plan = plan_order(&candles[i - warmup_bars..i], &plan_params)?;

            if bar.high > plan.long.entry_price {
                // ran through the target before we could have been filled
                if bar.high > plan.long.take_profit_price {
                    continue;
                }
                let fill = bar.open.min(plan.long.entry_price);
                plan.long.shift_to_fill(fill);
                state.open(Side::Long, fill, bar.open_time);
            } else if bar.low < plan.short.entry_price {
                if bar.low > plan.short.take_profit_price {
                    continue;
                }
                let fill = bar.open.max(plan.short.entry_price);
                plan.short.shift_to_fill(fill);
                state.open(Side::Short, fill, bar.open_time);
            }
        }

        let Some(side) = state.position.side() else {
            continue;
        };
        let leg = *plan.leg(side);
        let (q, p) = (state.quantity, state.principal);

        let exit = match side {
            Side::Long => {
                if bar.low < leg.stop_loss_price {
                    Some((TradeOutcome::Loss, leg.stop_loss_price, leg.stop_loss_price * q))
                } else if bar.high > leg.take_profit_price {
                    Some((TradeOutcome::Win, leg.take_profit_price, leg.take_profit_price * q))
                } else {
                    None
                }
            }
            Side::Short => {
                if bar.high > leg.stop_loss_price {
                    let sl = leg.stop_loss_price;
                    let settled = 2.0 * p - sl * q;
                    let rescaled = round_cash(settled * (state.entry_price / sl));
                    Some((TradeOutcome::Loss, sl, rescaled))
                } else if bar.low < leg.take_profit_price {
                    let tp = leg.take_profit_price;
                    Some((TradeOutcome::Win, tp, 2.0 * p - q * tp))
                } else {
                    None
                }
            }
        };

        if let Some((outcome, exit_price, gross)) = exit {
            state.close(outcome, exit_price, gross, params.fee_rate, bar.open_time);
            log::debug!(
                "{side} {outcome:?} at {exit_price} on {}, principal {}",
                bar.open_time,
                state.principal
            );
        }
    }

    if let Some(s) = sink {
        s.emit(state.snapshot());
    }
    Ok(state)
}

/// Fetches the candle range and runs [`simulate`] on a blocking worker.
#[derive(Clone)]
pub struct Backtester {
    store: Arc<dyn CandleStore>,
}

impl Backtester {
    pub fn new(store: Arc<dyn CandleStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        req: &BacktestRequest,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<BacktestState, EngineError> {
        let started = Instant::now();
        let candles = fetch_range(
            self.store.as_ref(),
            &req.symbol,
            req.interval,
            req.start,
            req.end,
        )
        .await?;
        log::info!(
            "backtest {} {}: {} candles from {} to {}",
            req.symbol,
            req.interval,
            candles.len(),
            req.start,
            req.end
        );

        let (warmup, params) = (req.warmup_bars, req.params);
        let state = tokio::task::spawn_blocking(move || {
            simulate(&candles, warmup, &params, sink.as_deref())
        })
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))??;

        metrics::increment_counter!("backtest_runs_total", "symbol" => req.symbol.clone());
        metrics::gauge!("backtest_final_principal", state.principal, "symbol" => req.symbol.clone());
        log::info!(
            "backtest {} done in {:?}: principal {} ({} wins / {} losses)",
            req.symbol,
            started.elapsed(),
            state.principal,
            state.win_count,
            state.fail_count
        );
        Ok(state)
    }
}
