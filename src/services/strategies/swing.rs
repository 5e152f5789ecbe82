//! Swing pivots: where consecutive bars flip direction.
//!
//! A rising bar followed by a falling one marks a resistance pivot, the
//! reverse marks a support pivot. Pivot weight is traded value per unit of
//! price, so heavily traded turns rank higher.

use serde::Serialize;

use crate::services::strategies::Candle;
use crate::utils::{errors::EngineError, rounding::round_to};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwingPivot {
    pub price: f64,
    pub volume: f64,
    pub trade_count: u64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwingReport {
    pub resistance_price: Option<f64>,
    pub support_price: Option<f64>,
    pub resistance_pivots: Vec<SwingPivot>,
    pub support_pivots: Vec<SwingPivot>,
    pub rise_bodies: Vec<f64>,
    pub fall_bodies: Vec<f64>,
    /// Drift of the pivot bodies relative to the first open, 3 decimals.
    pub trend: f64,
}

/// The last candle is treated as still forming and ignored.
pub fn analyze_swings(candles: &[Candle]) -> Result<SwingReport, EngineError> {
    if candles.len() < 3 {
        return Err(EngineError::InsufficientData {
            required: 2,
            actual: candles.len(),
        });
    }
    let closed = &candles[..candles.len() - 1];

    let mut resistance_pivots = Vec::new();
    let mut support_pivots = Vec::new();
    let mut rise_bodies = Vec::new();
    let mut fall_bodies = Vec::new();

    for pair in closed.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if prev.is_rising() == cur.is_rising() {
            continue;
        }
        let volume = prev.quote_volume + cur.quote_volume;
        let trade_count = prev.trade_count + cur.trade_count;

        if prev.is_rising() {
            let price = prev.high.max(cur.high);
            resistance_pivots.push(pivot(price, volume, trade_count));
            rise_bodies.push(prev.open.max(cur.open));
        } else {
            let price = prev.low.min(cur.low);
            support_pivots.push(pivot(price, volume, trade_count));
            fall_bodies.push(prev.close.min(cur.close));
        }
    }

    let drift = |bodies: &[f64]| bodies.windows(2).map(|w| w[1] - w[0]).sum::<f64>();
    let start_price = closed[0].open;
    let trend = if start_price > 0.0 {
        round_to((drift(&rise_bodies) + drift(&fall_bodies)) / start_price / 2.0, 3)
    } else {
        0.0
    };

    Ok(SwingReport {
        resistance_price: resistance_pivots.iter().map(|p| p.price).reduce(f64::max),
        support_price: support_pivots.iter().map(|p| p.price).reduce(f64::min),
        resistance_pivots,
        support_pivots,
        rise_bodies,
        fall_bodies,
        trend,
    })
}

fn pivot(price: f64, volume: f64, trade_count: u64) -> SwingPivot {
    SwingPivot {
        price,
        volume,
        trade_count,
        weight: if price > 0.0 { volume / price } else { 0.0 },
    }
}
