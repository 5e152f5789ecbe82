//! ──────────────────────────────────────────────────────────────────────────
//! Position sizing and protective exits
//! ──────────────────────────────────────────────────────────────────────────
//! * Sizing          – whole units out of 90 % of free cash, times leverage
//! * Emergency guard – ±1 % bracket around an unprotected position's entry
//! ──────────────────────────────────────────────────────────────────────────

use crate::services::strategies::Side;
use crate::services::trading_engine::{Bracket, Position};
use crate::utils::rounding::round_price;

/// ─── Constants ───────────────────────────────────────────────────────────
const CASH_UTILISATION: f64 = 0.9;
const EMERGENCY_OFFSET: f64 = 0.01; // 1 %

/// ─── Public helpers ──────────────────────────────────────────────────────
/// Units to order: `floor(cash / price × 0.9) × leverage`.
pub fn order_quantity(cash: f64, price: f64, leverage: u32) -> f64 {
    if !(price > 0.0) || !(cash > 0.0) {
        return 0.0;
    }
    (cash / price * CASH_UTILISATION).floor() * f64::from(leverage)
}

/// Stop 1 % against the position, target 1 % in its favour.
pub fn emergency_bracket(position: &Position) -> Bracket {
    let entry = position.entry_price;
    let (stop_loss, take_profit) = match position.side {
        Side::Long => (
            entry * (1.0 - EMERGENCY_OFFSET),
            entry * (1.0 + EMERGENCY_OFFSET),
        ),
        Side::Short => (
            entry * (1.0 + EMERGENCY_OFFSET),
            entry * (1.0 - EMERGENCY_OFFSET),
        ),
    };
    Bracket {
        stop_loss: round_price(stop_loss),
        take_profit: round_price(take_profit),
    }
}

// ======================================================================
// UNIT TESTS
// ======================================================================
