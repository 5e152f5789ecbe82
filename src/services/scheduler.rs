//! Live automation sessions, one abortable task per symbol.
//!
//! A session ticks every few seconds: snapshot the account, tidy up orphaned
//! orders or naked positions, and when flat enter on whichever side the
//! current plan triggers. Ticks never overlap: one that comes due while the
//! previous tick is still running is dropped, not queued. A failed tick only
//! costs that tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{abortable, AbortHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::services::advisory::{serialize_candles, Advisor};
use crate::services::market_data::{CandleQuery, CandleStore, MAX_CANDLES_PER_REQUEST};
use crate::services::strategies::order_point::{plan_order, PlanParams};
use crate::services::strategies::{Interval, OrderPlan};
use crate::services::trading_engine::{
    place_bracketed_entry, reconcile, AccountSnapshot, EntryOutcome, ExchangeGateway,
};
use crate::utils::errors::EngineError;

pub const TICK_PERIOD: Duration = Duration::from_secs(5);
/// An advisory plan is dropped every this many ticks (~100 min at 5 s).
pub const ADVISORY_REFRESH_TICKS: u64 = 1200;
pub const DEFAULT_LEVERAGE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveMode {
    /// Re-plan from recent candles on every tick.
    #[default]
    Formula,
    /// Ask the advisor once and reuse the plan until it fills or expires.
    Advisory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveRequest {
    pub symbol: String,
    pub interval: Interval,
    pub params: PlanParams,
    pub mode: LiveMode,
    /// Candles fed to the planner or advisor.
    pub limit: usize,
    pub leverage: u32,
}

#[derive(Debug, Default)]
struct SessionState {
    cached_plan: Option<OrderPlan>,
    tick_counter: u64,
}

/// Handle to a running session. Dropping it does not stop the session;
/// pass it to [`Scheduler::stop`].
pub struct LiveSession {
    id: Uuid,
    symbol: String,
    cancelled: Arc<AtomicBool>,
    abort: AbortHandle,
    state: Arc<Mutex<SessionState>>,
}

impl LiveSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .field("cancelled", &self.cancelled.load(Ordering::SeqCst))
            .finish()
    }
}

pub struct Scheduler {
    gateway: Arc<dyn ExchangeGateway>,
    candles: Arc<dyn CandleStore>,
    advisor: Option<Arc<dyn Advisor>>,
    active: Arc<DashMap<String, Uuid>>,
    tick_period: Duration,
}

impl Scheduler {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, candles: Arc<dyn CandleStore>) -> Self {
        Self {
            gateway,
            candles,
            advisor: None,
            active: Arc::new(DashMap::new()),
            tick_period: TICK_PERIOD,
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn Advisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn is_running(&self, symbol: &str) -> bool {
        self.active.contains_key(symbol)
    }

    /// Spawn the tick loop for `req.symbol`. Fails if that symbol already has a
    /// session or the request cannot work.
    pub fn start(&self, req: LiveRequest) -> Result<LiveSession, EngineError> {
        validate(&req, self.advisor.is_some())?;

        let id = Uuid::new_v4();
        match self.active.entry(req.symbol.clone()) {
            Entry::Occupied(_) => return Err(EngineError::SessionActive(req.symbol)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(SessionState::default()));
        let ctx = TickContext {
            gateway: self.gateway.clone(),
            candles: self.candles.clone(),
            advisor: self.advisor.clone(),
            request: req.clone(),
            cancelled: cancelled.clone(),
            state: state.clone(),
        };

        let (task, abort) = abortable(run_session(ctx, self.tick_period));
        tokio::spawn(task);
        log::info!(
            "live session {id} started for {} ({:?}, {} candles, x{})",
            req.symbol,
            req.mode,
            req.limit,
            req.leverage
        );

        Ok(LiveSession {
            id,
            symbol: req.symbol,
            cancelled,
            abort,
            state,
        })
    }

    /// Halt automation for the session. Orders and positions stay as they
    /// are. Once this returns no tick of the session is running or will run.
    pub async fn stop(&self, session: LiveSession) {
        session.cancelled.store(true, Ordering::SeqCst);
        session.abort.abort();
        // an in-flight tick holds the state lock until its future is dropped
        let _settled = session.state.lock().await;
        self.active.remove_if(&session.symbol, |_, id| *id == session.id);
        log::info!("live session {} for {} stopped", session.id, session.symbol);
    }
}

fn validate(req: &LiveRequest, has_advisor: bool) -> Result<(), EngineError> {
    if req.symbol.trim().is_empty() {
        return Err(EngineError::InvalidParameter("symbol is empty".into()));
    }
    if req.leverage == 0 {
        return Err(EngineError::InvalidParameter("leverage must be at least 1".into()));
    }
    if req.limit == 0 || req.limit > MAX_CANDLES_PER_REQUEST {
        return Err(EngineError::InvalidParameter(format!(
            "limit must be within 1..={MAX_CANDLES_PER_REQUEST}"
        )));
    }
    match req.mode {
        LiveMode::Formula if req.limit <= req.params.judge_length => {
            Err(EngineError::InvalidParameter(format!(
                "limit {} leaves no history before the last {} bars",
                req.limit, req.params.judge_length
            )))
        }
        LiveMode::Advisory if !has_advisor => Err(EngineError::InvalidParameter(
            "advisory mode needs an advisor".into(),
        )),
        _ => Ok(()),
    }
}

#[derive(Clone)]
struct TickContext {
    gateway: Arc<dyn ExchangeGateway>,
    candles: Arc<dyn CandleStore>,
    advisor: Option<Arc<dyn Advisor>>,
    request: LiveRequest,
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
}

impl TickContext {
    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(EngineError::SessionStopped)
        } else {
            Ok(())
        }
    }
}

async fn run_session(ctx: TickContext, period: Duration) {
    let symbol = ctx.request.symbol.clone();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_finished: Option<Instant> = None;

    loop {
        let due = ticker.tick().await;
        if ctx.cancelled.load(Ordering::SeqCst) {
            break;
        }
        // came due while the previous tick was still running
        if last_finished.is_some_and(|done| due < done) {
            log::debug!("{symbol}: skipping tick overdue since {due:?}");
            continue;
        }
        let Ok(mut state) = ctx.state.try_lock() else {
            log::debug!("{symbol}: session is stopping");
            break;
        };

        metrics::increment_counter!("live_ticks_total", "symbol" => symbol.clone());
        let result = tick(&ctx, &mut state).await;
        drop(state);
        last_finished = Some(Instant::now());

        match result {
            Ok(()) => {}
            Err(EngineError::SessionStopped) => break,
            Err(e) => {
                metrics::increment_counter!("live_tick_errors_total", "symbol" => symbol.clone());
                match &e {
                    EngineError::Gateway(g) if g.is_transient() => {
                        log::warn!("{symbol}: tick skipped: {e}")
                    }
                    _ => log::error!("{symbol}: tick failed: {e}"),
                }
            }
        }
    }
    log::debug!("{symbol}: tick loop exited");
}

async fn tick(ctx: &TickContext, state: &mut SessionState) -> Result<(), EngineError> {
    let req = &ctx.request;
    let symbol = req.symbol.as_str();
    let gateway = ctx.gateway.as_ref();

    state.tick_counter += 1;
    if state.tick_counter % ADVISORY_REFRESH_TICKS == 0 && state.cached_plan.take().is_some() {
        log::info!("{symbol}: advisory plan expired");
    }

    ctx.ensure_live()?;
    let (open_orders, position, latest_price, available_cash) = tokio::try_join!(
        gateway.open_orders(symbol),
        gateway.position(symbol),
        gateway.latest_price(symbol),
        gateway.available_cash()
    )?;
    let snapshot = AccountSnapshot {
        open_orders,
        position,
        latest_price,
        available_cash,
    };

    ctx.ensure_live()?;
    let account = reconcile(gateway, symbol, &snapshot).await?;
    if !account.is_flat() {
        log::debug!("{symbol}: holding a position, nothing to plan");
        return Ok(());
    }

    ctx.ensure_live()?;
    let plan = match req.mode {
        LiveMode::Formula => {
            let candles = ctx
                .candles
                .fetch_candles(symbol, req.interval, CandleQuery::latest(req.limit))
                .await?;
            plan_order(&candles, &req.params)?
        }
        LiveMode::Advisory => match state.cached_plan {
            Some(plan) => plan,
            None => {
                let plan = ask_advisor(ctx).await?;
                state.cached_plan = Some(plan);
                plan
            }
        },
    };
    log::debug!(
        "{symbol}: price {latest_price}, long above {}, short below {}",
        plan.long.entry_price,
        plan.short.entry_price
    );

    ctx.ensure_live()?;
    let outcome = place_bracketed_entry(
        gateway,
        symbol,
        &plan,
        latest_price,
        available_cash,
        req.leverage,
    )
    .await?;
    if let EntryOutcome::Submitted { order, .. } = outcome {
        metrics::increment_counter!(
            "live_orders_submitted_total",
            "symbol" => symbol.to_string(),
            "side" => order.side.to_string()
        );
        if req.mode == LiveMode::Advisory {
            state.cached_plan = None;
        }
    }
    Ok(())
}

async fn ask_advisor(ctx: &TickContext) -> Result<OrderPlan, EngineError> {
    let req = &ctx.request;
    let advisor = ctx
        .advisor
        .as_ref()
        .ok_or_else(|| EngineError::InvalidParameter("advisory mode needs an advisor".into()))?;
    let candles = ctx
        .candles
        .fetch_candles(&req.symbol, req.interval, CandleQuery::latest(req.limit))
        .await?;
    let payload = serialize_candles(&candles)?;

    ctx.ensure_live()?;
    let plan = advisor
        .recommend(&payload, req.params.win_percent, req.params.loss_rate)
        .await?;
    log::info!(
        "{}: advisory plan support {} break {}",
        req.symbol,
        plan.support_price,
        plan.break_price
    );
    Ok(plan)
}
