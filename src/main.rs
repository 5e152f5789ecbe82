use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use rangebreak_backend::{
    config::settings::{AppMode, Settings},
    services::{
        advisory::{serialize_candles, Advisor, ChatAdvisor},
        backtest::{BacktestRequest, Backtester, INITIAL_PRINCIPAL},
        market_data::{CandleQuery, CandleStore, FileCandleStore, MAX_CANDLES_PER_REQUEST},
        progress::{ProgressSink, ProgressSnapshot},
        risk::order_quantity,
        strategies::swing::analyze_swings,
    },
};

fn init_logging() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
        .init();
}

fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => log::info!("prometheus exporter listening on {addr}"),
        Err(e) => log::warn!("metrics exporter on {addr} failed: {e} (continuing without)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let settings = Settings::new().map_err(|e| anyhow::anyhow!("failed to load settings: {e}"))?;
    if let Some(addr) = settings.metrics_addr {
        init_metrics(addr);
    }

    let store = FileCandleStore::load(&settings.candle_file)
        .with_context(|| format!("reading {}", settings.candle_file.display()))?;

    let report = match settings.app_mode {
        AppMode::Swing => serde_json::to_value(analyze_swings(store.candles())?)?,
        AppMode::Advise => run_advisory(&settings, &store).await?,
        AppMode::Backtest => run_backtest(&settings, store).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_backtest(settings: &Settings, store: FileCandleStore) -> anyhow::Result<Value> {
    let (first, last) = match (store.candles().first(), store.candles().last()) {
        (Some(f), Some(l)) => (f.open_time, l.open_time),
        _ => anyhow::bail!("{} holds no candles", settings.candle_file.display()),
    };

    let req = BacktestRequest {
        symbol: settings.symbol.clone(),
        interval: settings.interval,
        warmup_bars: settings.warmup_bars,
        start: settings.backtest_start.unwrap_or(first),
        end: settings
            .backtest_end
            .unwrap_or(last + settings.interval.duration()),
        params: settings.backtest,
    };

    // --- progress reporter -------------------------------------------------
    let (tx, mut rx) = mpsc::channel::<ProgressSnapshot>(64);
    let reporter = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            log::info!(
                "progress: principal {} ({} wins / {} losses, max {}, min {})",
                p.principal,
                p.win_count,
                p.fail_count,
                p.max_principal,
                p.min_principal
            );
        }
    });
    let sink: Arc<dyn ProgressSink> = Arc::new(tx);

    let state = Backtester::new(Arc::new(store))
        .run(&req, Some(sink))
        .await?;
    reporter.await.context("progress reporter")?;

    Ok(json!({
        "symbol": req.symbol,
        "interval": req.interval,
        "start": req.start,
        "end": req.end,
        "params": req.params,
        "result": state,
        "stats": state.stats(),
    }))
}

/// Ask the advisor for a plan over the file's latest candles and size an
/// entry at the last close against the backtest starting principal.
async fn run_advisory(settings: &Settings, store: &FileCandleStore) -> anyhow::Result<Value> {
    let cfg = settings
        .advisory
        .as_ref()
        .context("advise mode needs advisory credentials")?;
    let advisor = ChatAdvisor::new(cfg.base_url.clone(), cfg.api_key.clone(), cfg.model.clone());

    let limit = settings.warmup_bars.clamp(1, MAX_CANDLES_PER_REQUEST);
    let candles = store
        .fetch_candles(&settings.symbol, settings.interval, CandleQuery::latest(limit))
        .await?;
    let last_close = match candles.last() {
        Some(c) => c.close,
        None => anyhow::bail!("{} holds no candles", settings.candle_file.display()),
    };

    log::info!(
        "asking {} for a {} {} plan over {} candles",
        cfg.model,
        settings.symbol,
        settings.interval,
        candles.len()
    );
    let plan = advisor
        .recommend(
            &serialize_candles(&candles)?,
            settings.backtest.win_percent,
            settings.backtest.loss_rate,
        )
        .await?;

    let triggered = plan.triggered_by(last_close);
    let quantity = triggered.map(|_| order_quantity(INITIAL_PRINCIPAL, last_close, settings.leverage));

    Ok(json!({
        "symbol": settings.symbol,
        "interval": settings.interval,
        "lastClose": last_close,
        "plan": plan,
        "triggered": triggered,
        "sizing": {
            "cash": INITIAL_PRINCIPAL,
            "leverage": settings.leverage,
            "quantity": quantity,
        },
    }))
}
