//! Support / breakout detection over a closing-price window.
//!
//! The window is split in two: everything except the last `judge_length`
//! bars fixes the support (lowest close) and breakout (highest close) levels,
//! the trailing bars decide whether price has since broken out of that range.

use serde::{Deserialize, Serialize};

use crate::services::strategies::Candle;
use crate::utils::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendClass {
    Continue,
    Rise,
    Fall,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportBreakSignal {
    pub support_price: f64,
    pub break_price: f64,
    pub trend: TrendClass,
}

pub fn detect_signal(
    candles: &[Candle],
    judge_length: usize,
) -> Result<SupportBreakSignal, EngineError> {
    if judge_length == 0 {
        return Err(EngineError::InvalidParameter(
            "judge_length must be at least 1".into(),
        ));
    }
    if candles.len() <= judge_length {
        return Err(EngineError::InsufficientData {
            required: judge_length,
            actual: candles.len(),
        });
    }

    let (history, recent) = candles.split_at(candles.len() - judge_length);

    let support_price = history.iter().map(|c| c.close).fold(f64::MAX, f64::min);
    let break_price = history.iter().map(|c| c.close).fold(f64::MIN, f64::max);

    // every bar is inspected; the last one outside the range decides
    let mut trend = TrendClass::Continue;
    for c in recent {
        if c.close > break_price {
            trend = TrendClass::Rise;
        } else if c.close < support_price {
            trend = TrendClass::Fall;
        }
    }

    Ok(SupportBreakSignal {
        support_price,
        break_price,
        trend,
    })
}
