// src/services/strategies/common.rs
use std::{fmt, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{errors::EngineError, rounding::round_price};

/// One OHLCV bar. Series are ascending by `open_time` with no duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub quote_volume: f64,
    #[serde(default)]
    pub trade_count: u64,
}

impl Candle {
    pub fn is_rising(&self) -> bool {
        self.close > self.open
    }
}

/// Bar width, written the way exchanges name them ("1m", "4h", "1M").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h", alias = "60m")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Interval {
    pub fn duration(self) -> Duration {
        match self {
            Interval::M1 => Duration::minutes(1),
            Interval::M5 => Duration::minutes(5),
            Interval::M15 => Duration::minutes(15),
            Interval::M30 => Duration::minutes(30),
            Interval::H1 => Duration::hours(1),
            Interval::H4 => Duration::hours(4),
            Interval::D1 => Duration::days(1),
            Interval::W1 => Duration::weeks(1),
            // calendar months vary; 30 days is what range chunking needs
            Interval::Mo1 => Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
            Interval::Mo1 => "1M",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1m" => Interval::M1,
            "5m" => Interval::M5,
            "15m" => Interval::M15,
            "30m" => Interval::M30,
            "1h" | "60m" => Interval::H1,
            "4h" => Interval::H4,
            "1d" => Interval::D1,
            "1w" => Interval::W1,
            "1M" => Interval::Mo1,
            other => {
                return Err(EngineError::InvalidParameter(format!(
                    "unknown interval '{other}'"
                )))
            }
        })
    }
}

/// Which way a leg, position or order faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("LONG"),
            Side::Short => f.write_str("SHORT"),
        }
    }
}

/// Entry trigger with its dependent exits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLeg {
    #[serde(alias = "price")]
    pub entry_price: f64,
    #[serde(alias = "takeProfit")]
    pub take_profit_price: f64,
    #[serde(alias = "stopLoss")]
    pub stop_loss_price: f64,
}

impl OrderLeg {
    /// Build a leg around `entry`: profit target `win_percent` away, stop
    /// `win_percent * loss_rate` away on the other side.
    pub fn around(side: Side, entry: f64, win_percent: f64, loss_rate: f64) -> Self {
        let risk = win_percent * loss_rate;
        match side {
            Side::Long => Self {
                entry_price: entry,
                take_profit_price: entry * (1.0 + win_percent),
                stop_loss_price: entry * (1.0 - risk),
            },
            Side::Short => Self {
                entry_price: entry,
                take_profit_price: entry * (1.0 - win_percent),
                stop_loss_price: entry * (1.0 + risk),
            },
        }
    }

    /// Move both exits by the gap between the actual fill and the planned entry.
    pub fn shift_to_fill(&mut self, fill_price: f64) -> f64 {
        let slippage = round_price(fill_price - self.entry_price);
        self.take_profit_price += slippage;
        self.stop_loss_price += slippage;
        slippage
    }

    pub fn rounded(self) -> Self {
        Self {
            entry_price: round_price(self.entry_price),
            take_profit_price: round_price(self.take_profit_price),
            stop_loss_price: round_price(self.stop_loss_price),
        }
    }
}

/// A bracketed long/short recommendation for the next bar(s).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPlan {
    pub long: OrderLeg,
    pub short: OrderLeg,
    pub support_price: f64,
    pub break_price: f64,
}

impl OrderPlan {
    pub fn leg(&self, side: Side) -> &OrderLeg {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    /// Side whose entry `price` has crossed: above the long entry or below the
    /// short entry. Long wins when both hold.
    pub fn triggered_by(&self, price: f64) -> Option<Side> {
        if price > self.long.entry_price {
            Some(Side::Long)
        } else if price < self.short.entry_price {
            Some(Side::Short)
        } else {
            None
        }
    }
}
