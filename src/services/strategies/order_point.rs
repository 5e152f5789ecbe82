//! Bracketed entry planning on top of the support/breakout detector.

use serde::{Deserialize, Serialize};

use crate::services::strategies::support_break::{detect_signal, TrendClass};
use crate::services::strategies::{Candle, OrderLeg, OrderPlan, Side};
use crate::utils::errors::EngineError;

/// Tuning for [`plan_order`]. Defaults are the best-performing set found in
/// earlier parameter sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanParams {
    /// Trailing bars used to classify the trend.
    pub judge_length: usize,
    /// Distance of the entry trigger from the support/breakout level.
    pub buffer_percent: f64,
    /// Take-profit distance from entry.
    pub win_percent: f64,
    /// Stop distance as a fraction of `win_percent`.
    pub loss_rate: f64,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            judge_length: 5,
            buffer_percent: 0.005,
            win_percent: 0.01,
            loss_rate: 0.75,
        }
    }
}

/// Long above the breakout, short below the support. After a breakout the
/// opposite side bets on a pullback into the range instead of a second break.
pub fn plan_order(candles: &[Candle], params: &PlanParams) -> Result<OrderPlan, EngineError> {
    let signal = detect_signal(candles, params.judge_length)?;
    let buf = params.buffer_percent;

    let break_long = signal.break_price * (1.0 + buf);
    let break_short = signal.support_price * (1.0 - buf);
    let continue_long = signal.support_price * (1.0 + buf);
    let continue_short = signal.break_price * (1.0 - buf);

    let leg = |side, entry| OrderLeg::around(side, entry, params.win_percent, params.loss_rate);

    let mut long = leg(Side::Long, break_long);
    let mut short = leg(Side::Short, break_short);
    match signal.trend {
        TrendClass::Rise => short = leg(Side::Short, continue_short),
        TrendClass::Fall => long = leg(Side::Long, continue_long),
        TrendClass::Continue => {}
    }

    Ok(OrderPlan {
        long: long.rounded(),
        short: short.rounded(),
        support_price: signal.support_price,
        break_price: signal.break_price,
    })
}
