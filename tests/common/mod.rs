#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rangebreak_backend::services::advisory::Advisor;
use rangebreak_backend::services::progress::{ProgressSink, ProgressSnapshot};
pub use rangebreak_backend::services::strategies::{Candle, OrderLeg, OrderPlan, Side};
use rangebreak_backend::services::trading_engine::{
    Bracket, ExchangeGateway, MarketOrder, OpenOrder, OrderAck, OrderKind, Position, TriggerKind,
};
use rangebreak_backend::utils::errors::{AdvisoryError, GatewayError};

// ── Candles ──────────────────────────────────────────────────────────

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn make_bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        open_time: t0() + ChronoDuration::minutes(i as i64),
        open,
        high,
        low,
        close,
        volume: 1.0,
        quote_volume: close,
        trade_count: 1,
    }
}

/// One-minute bars whose open/high/low/close all equal the given closes.
pub fn flat_bars(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| make_bar(i, c, c, c, c))
        .collect()
}

/// Bars oscillating ±0.2 around 100 with ±0.3 wicks.
pub fn range_bound(n: usize) -> Vec<Candle> {
    (0..n)
        .map(|i| {
            let close = if i % 2 == 0 { 100.2 } else { 99.8 };
            make_bar(i, 100.0, 100.3, 99.7, close)
        })
        .collect()
}

/// Seeded noisy walk, wide enough to trade often.
pub fn random_walk(n: usize, seed: u64) -> Vec<Candle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 100.0;
    (0..n)
        .map(|i| {
            let open = price;
            let close = (open * (1.0 + rng.gen_range(-0.01..0.01))).max(1.0);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.005));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.005));
            price = close;
            make_bar(i, open, high, low, close)
        })
        .collect()
}

// ── Progress ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<ProgressSnapshot>>);

impl RecordingSink {
    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, snapshot: ProgressSnapshot) {
        self.0.lock().unwrap().push(snapshot);
    }
}

// ── Gateway ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Account {
    pub orders: Vec<OpenOrder>,
    pub position: Option<Position>,
    pub price: f64,
    pub cash: f64,
    pub submitted: Vec<MarketOrder>,
    pub brackets: Vec<(Side, Bracket, TriggerKind)>,
    pub cancels: usize,
}

/// In-memory exchange. Submitted orders fill at the current price and leave
/// their bracket resting, unless `fill_on_submit` is off.
pub struct MockGateway {
    pub account: Mutex<Account>,
    pub calls: Mutex<Vec<&'static str>>,
    pub price_delay: Option<Duration>,
    pub price_failures: AtomicUsize,
    pub fill_on_submit: bool,
}

impl MockGateway {
    pub fn new(price: f64, cash: f64) -> Self {
        Self {
            account: Mutex::new(Account {
                price,
                cash,
                ..Account::default()
            }),
            calls: Mutex::new(Vec::new()),
            price_delay: None,
            price_failures: AtomicUsize::new(0),
            fill_on_submit: true,
        }
    }

    pub fn with_orders(self, orders: Vec<OpenOrder>) -> Self {
        self.account.lock().unwrap().orders = orders;
        self
    }

    pub fn with_position(self, position: Position) -> Self {
        self.account.lock().unwrap().position = Some(position);
        self
    }

    pub fn with_price_delay(mut self, delay: Duration) -> Self {
        self.price_delay = Some(delay);
        self
    }

    pub fn failing_prices(self, n: usize) -> Self {
        self.price_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn without_fills(mut self) -> Self {
        self.fill_on_submit = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn submitted(&self) -> Vec<MarketOrder> {
        self.account.lock().unwrap().submitted.clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

pub fn resting_order(symbol: &str, side: Side, kind: OrderKind) -> OpenOrder {
    OpenOrder {
        id: format!("{symbol}-{kind:?}"),
        symbol: symbol.to_string(),
        side,
        kind,
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        self.record("open_orders");
        Ok(self.account.lock().unwrap().orders.clone())
    }

    async fn position(&self, _symbol: &str) -> Result<Option<Position>, GatewayError> {
        self.record("position");
        Ok(self.account.lock().unwrap().position.clone())
    }

    async fn latest_price(&self, _symbol: &str) -> Result<f64, GatewayError> {
        self.record("latest_price");
        if let Some(d) = self.price_delay {
            tokio::time::sleep(d).await;
        }
        let failing = self
            .price_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Transient("price feed timeout".into()));
        }
        Ok(self.account.lock().unwrap().price)
    }

    async fn available_cash(&self) -> Result<f64, GatewayError> {
        self.record("available_cash");
        Ok(self.account.lock().unwrap().cash)
    }

    async fn submit_market_order(&self, order: &MarketOrder) -> Result<OrderAck, GatewayError> {
        self.record("submit_market_order");
        let mut acct = self.account.lock().unwrap();
        acct.submitted.push(order.clone());
        if self.fill_on_submit {
            let fill = acct.price;
            acct.position = Some(Position {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: order.quantity,
                entry_price: fill,
            });
            acct.orders = vec![
                resting_order(&order.symbol, order.side, OrderKind::StopLoss),
                resting_order(&order.symbol, order.side, OrderKind::TakeProfit),
            ];
        }
        Ok(OrderAck {
            order_id: format!("ord-{}", acct.submitted.len()),
        })
    }

    async fn attach_bracket(
        &self,
        symbol: &str,
        side: Side,
        bracket: Bracket,
        trigger: TriggerKind,
    ) -> Result<(), GatewayError> {
        self.record("attach_bracket");
        let mut acct = self.account.lock().unwrap();
        acct.brackets.push((side, bracket, trigger));
        acct.orders = vec![
            resting_order(symbol, side, OrderKind::StopLoss),
            resting_order(symbol, side, OrderKind::TakeProfit),
        ];
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), GatewayError> {
        self.record("cancel_all_orders");
        let mut acct = self.account.lock().unwrap();
        acct.orders.clear();
        acct.cancels += 1;
        Ok(())
    }
}

// ── Advisor ──────────────────────────────────────────────────────────

pub struct FixedAdvisor {
    pub plan: OrderPlan,
    pub calls: AtomicUsize,
}

impl FixedAdvisor {
    pub fn new(plan: OrderPlan) -> Self {
        Self {
            plan,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Advisor for FixedAdvisor {
    async fn recommend(
        &self,
        serialized_candles: &str,
        _win_percent: f64,
        _loss_rate: f64,
    ) -> Result<OrderPlan, AdvisoryError> {
        assert!(serialized_candles.starts_with("[["));
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan)
    }
}

/// Long above `long_entry`, short below `short_entry`, 2 % / 1 % exits.
pub fn advisory_plan(long_entry: f64, short_entry: f64) -> OrderPlan {
    OrderPlan {
        long: OrderLeg {
            entry_price: long_entry,
            take_profit_price: long_entry * 1.02,
            stop_loss_price: long_entry * 0.99,
        },
        short: OrderLeg {
            entry_price: short_entry,
            take_profit_price: short_entry * 0.98,
            stop_loss_price: short_entry * 1.01,
        },
        support_price: short_entry,
        break_price: long_entry,
    }
}
