// src/services/trading_engine.rs

//! Exchange seam for live automation: the gateway trait, the order shapes it
//! speaks, and the two steps of a tick that only touch the exchange
//! (reconciling leftovers and placing a bracketed entry).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::services::risk::{emergency_bracket, order_quantity};
use crate::services::strategies::{OrderLeg, OrderPlan, Side};
use crate::utils::errors::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
}

/// Dependent exit orders attached to a position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl From<&OrderLeg> for Bracket {
    fn from(leg: &OrderLeg) -> Self {
        Self {
            stop_loss: leg.stop_loss_price,
            take_profit: leg.take_profit_price,
        }
    }
}

/// Which price fires a bracket: the last trade or the mark price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Immediate,
    Mark,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOrder {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub bracket: Option<Bracket>,
    pub bracket_trigger: TriggerKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
}

/// Everything the live loop needs from an exchange account.
///
/// Implementations own transport, signing and retries; the loop never retries.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, GatewayError>;

    async fn position(&self, symbol: &str) -> Result<Option<Position>, GatewayError>;

    async fn latest_price(&self, symbol: &str) -> Result<f64, GatewayError>;

    /// Free margin in the account's quote currency.
    async fn available_cash(&self) -> Result<f64, GatewayError>;

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, GatewayError>;

    async fn attach_bracket(
        &self,
        symbol: &str,
        side: Side,
        bracket: Bracket,
        trigger: TriggerKind,
    ) -> Result<(), GatewayError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), GatewayError>;
}

/// Account view for one symbol at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub open_orders: Vec<OpenOrder>,
    pub position: Option<Position>,
    pub latest_price: f64,
    pub available_cash: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Flat,
    /// Orders are resting without a position behind them.
    OrphanOrders,
    /// A position with nothing protecting it.
    Unprotected(Position),
    Protected(Position),
}

impl Reconciliation {
    pub fn classify(snapshot: &AccountSnapshot) -> Self {
        match (&snapshot.position, snapshot.open_orders.is_empty()) {
            (None, true) => Reconciliation::Flat,
            (None, false) => Reconciliation::OrphanOrders,
            (Some(p), true) => Reconciliation::Unprotected(p.clone()),
            (Some(p), false) => Reconciliation::Protected(p.clone()),
        }
    }

    /// True when the tick may go on to plan a new entry.
    pub fn is_flat(&self) -> bool {
        matches!(self, Reconciliation::Flat | Reconciliation::OrphanOrders)
    }
}

/// Clean up what the previous ticks left behind. Returns the classification
/// so the caller knows whether it may trade.
pub async fn reconcile(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    snapshot: &AccountSnapshot,
) -> Result<Reconciliation, GatewayError> {
    let state = Reconciliation::classify(snapshot);
    match &state {
        Reconciliation::OrphanOrders => {
            log::info!(
                "{symbol}: cancelling {} orphan order(s)",
                snapshot.open_orders.len()
            );
            gateway.cancel_all_orders(symbol).await?;
        }
        Reconciliation::Unprotected(position) => {
            let bracket = emergency_bracket(position);
            log::warn!(
                "{symbol}: unprotected {} position at {}, attaching sl {} tp {}",
                position.side,
                position.entry_price,
                bracket.stop_loss,
                bracket.take_profit
            );
            gateway
                .attach_bracket(symbol, position.side, bracket, TriggerKind::Immediate)
                .await?;
        }
        Reconciliation::Flat | Reconciliation::Protected(_) => {}
    }
    Ok(state)
}

/// What an entry attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    NotTriggered,
    /// Triggered but the account cannot afford a single unit.
    TooSmall { side: Side },
    Submitted { order: MarketOrder, ack: OrderAck },
}

/// Market entry on whichever side `price` triggers, bracket shifted by the
/// distance between `price` and the planned entry.
pub async fn place_bracketed_entry(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    plan: &OrderPlan,
    price: f64,
    cash: f64,
    leverage: u32,
) -> Result<EntryOutcome, GatewayError> {
    let Some(side) = plan.triggered_by(price) else {
        return Ok(EntryOutcome::NotTriggered);
    };
    let mut leg = *plan.leg(side);
    let slippage = leg.shift_to_fill(price);

    let quantity = order_quantity(cash, price, leverage);
    if quantity <= 0.0 {
        log::info!("{symbol}: {side} triggered at {price} but cash {cash} buys nothing");
        return Ok(EntryOutcome::TooSmall { side });
    }

    let order = MarketOrder {
        symbol: symbol.to_string(),
        side,
        quantity,
        bracket: Some(Bracket::from(&leg)),
        bracket_trigger: TriggerKind::Mark,
    };
    let ack = gateway.submit_market_order(&order).await?;
    log::info!(
        "{symbol}: {side} x{quantity} at {price} (slip {slippage}), sl {} tp {} -> {}",
        leg.stop_loss_price,
        leg.take_profit_price,
        ack.order_id
    );
    Ok(EntryOutcome::Submitted { order, ack })
}
