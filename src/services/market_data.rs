//! Candle sources.
//! -----------------------------------------------------------------
//! ‣ `CandleStore` is the seam every consumer (backtest, live loop) reads through.
//! ‣ `fetch_range` pages a long time range into store-sized requests.
//! ‣ `FileCandleStore` serves a JSON dump for offline runs and tests.
//! -----------------------------------------------------------------

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::services::strategies::{Candle, Interval};
use crate::utils::errors::{EngineError, MarketDataError};

/// Largest page a single store request may ask for.
pub const MAX_CANDLES_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CandleQuery {
    /// Inclusive lower bound on `open_time`.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `open_time`.
    pub end: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl CandleQuery {
    /// The most recent `limit` candles.
    pub fn latest(limit: usize) -> Self {
        Self {
            start: None,
            end: None,
            limit,
        }
    }
}

#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Ascending, duplicate-free candles. With `start` set the page begins at
    /// `start`; without it the page is the newest `limit` bars before `end`.
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        query: CandleQuery,
    ) -> Result<Vec<Candle>, MarketDataError>;
}

/// Bars per page for a `[start, end)` range: the whole range when it fits,
/// else the store maximum.
pub fn page_size(interval: Interval, start: DateTime<Utc>, end: DateTime<Utc>) -> usize {
    let step = interval.duration().num_milliseconds().max(1);
    let bars = ((end - start).num_milliseconds() / step).max(1);
    usize::try_from(bars)
        .unwrap_or(MAX_CANDLES_PER_REQUEST)
        .min(MAX_CANDLES_PER_REQUEST)
}

/// Fetch `[start, end)` sequentially in pages and concatenate them.
pub async fn fetch_range(
    store: &dyn CandleStore,
    symbol: &str,
    interval: Interval,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Candle>, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidTimeRange { start, end });
    }

    let limit = page_size(interval, start, end);
    let span = interval.duration() * i32::try_from(limit).unwrap_or(i32::MAX);

    let mut out: Vec<Candle> = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let page_end = (cursor + span).min(end);
        let page = store
            .fetch_candles(
                symbol,
                interval,
                CandleQuery {
                    start: Some(cursor),
                    end: Some(page_end),
                    limit,
                },
            )
            .await?;
        log::debug!(
            "fetched {} {symbol} {interval} candles from {cursor}",
            page.len()
        );
        // pages may overlap at their borders on some stores
        let last_seen = out.last().map(|c| c.open_time);
        out.extend(
            page.into_iter()
                .filter(|c| last_seen.map_or(true, |t| c.open_time > t)),
        );
        cursor = page_end;
    }
    Ok(out)
}

/// Candles loaded once from a JSON array and served from memory.
#[derive(Debug, Clone)]
pub struct FileCandleStore {
    symbol: Option<String>,
    interval: Option<Interval>,
    candles: Vec<Candle>,
}

impl FileCandleStore {
    pub fn new(candles: Vec<Candle>) -> Self {
        let mut candles = candles;
        candles.sort_by_key(|c| c.open_time);
        candles.dedup_by_key(|c| c.open_time);
        Self {
            symbol: None,
            interval: None,
            candles,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, MarketDataError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let candles: Vec<Candle> = serde_json::from_str(&raw)?;
        log::info!(
            "loaded {} candles from {}",
            candles.len(),
            path.as_ref().display()
        );
        Ok(Self::new(candles))
    }

    /// Only answer for this symbol/interval; anything else is unavailable.
    pub fn restricted_to(mut self, symbol: impl Into<String>, interval: Interval) -> Self {
        self.symbol = Some(symbol.into());
        self.interval = Some(interval);
        self
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }
}

#[async_trait]
impl CandleStore for FileCandleStore {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        query: CandleQuery,
    ) -> Result<Vec<Candle>, MarketDataError> {
        if self.symbol.as_deref().is_some_and(|s| s != symbol)
            || self.interval.is_some_and(|i| i != interval)
        {
            return Err(MarketDataError::Unavailable(format!(
                "no {interval} candles for {symbol}"
            )));
        }

        let in_range = self.candles.iter().filter(|c| {
            query.start.map_or(true, |s| c.open_time >= s)
                && query.end.map_or(true, |e| c.open_time < e)
        });

        let out: Vec<Candle> = if query.start.is_some() {
            in_range.take(query.limit).copied().collect()
        } else {
            let all: Vec<Candle> = in_range.copied().collect();
            let skip = all.len().saturating_sub(query.limit);
            all[skip..].to_vec()
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn series(n: usize) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Candle {
                open_time: t0 + Duration::minutes(i as i64),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                quote_volume: 1.0,
                trade_count: 1,
            })
            .collect()
    }

    struct Counting {
        inner: FileCandleStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CandleStore for Counting {
        async fn fetch_candles(
            &self,
            symbol: &str,
            interval: Interval,
            query: CandleQuery,
        ) -> Result<Vec<Candle>, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_candles(symbol, interval, query).await
        }
    }

    #[test]
    fn page_size_is_capped() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(page_size(Interval::M1, t0, t0 + Duration::minutes(90)), 90);
        assert_eq!(page_size(Interval::M1, t0, t0 + Duration::days(3)), 1000);
        assert_eq!(page_size(Interval::H1, t0, t0 + Duration::minutes(5)), 1);
    }

    #[tokio::test]
    async fn range_is_paged_and_concatenated() {
        let store = Counting {
            inner: FileCandleStore::new(series(2500)),
            calls: AtomicUsize::new(0),
        };
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let got = fetch_range(&store, "BTCUSDT", Interval::M1, t0, t0 + Duration::minutes(2500))
            .await
            .unwrap();
        assert_eq!(got.len(), 2500);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(got.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[tokio::test]
    async fn inverted_range_rejected() {
        let store = FileCandleStore::new(series(10));
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = fetch_range(&store, "X", Interval::M1, t0, t0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTimeRange { .. }));
    }

    #[tokio::test]
    async fn latest_query_returns_tail() {
        let store = FileCandleStore::new(series(50));
        let got = store
            .fetch_candles("X", Interval::M1, CandleQuery::latest(10))
            .await
            .unwrap();
        assert_eq!(got.len(), 10);
        assert_eq!(got[9].open_time, store.candles()[49].open_time);
    }

    #[tokio::test]
    async fn restricted_store_refuses_other_symbols() {
        let store = FileCandleStore::new(series(5)).restricted_to("ETHUSDT", Interval::M1);
        let err = store
            .fetch_candles("BTCUSDT", Interval::M1, CandleQuery::latest(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::Unavailable(_)));
    }
}
