use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::{env, fmt};

use chrono::{DateTime, Utc};
use dotenv::dotenv;

use crate::services::backtest::BacktestParams;
use crate::services::scheduler::DEFAULT_LEVERAGE;
use crate::services::strategies::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    Backtest,
    Swing,
    /// One advisory recommendation over the latest candles.
    Advise,
}

impl FromStr for AppMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "backtest" => Ok(AppMode::Backtest),
            "swing" => Ok(AppMode::Swing),
            "advise" => Ok(AppMode::Advise),
            other => Err(format!(
                "APP_MODE must be backtest, swing or advise, got '{other}'"
            )),
        }
    }
}

#[derive(Clone)]
pub struct AdvisorySettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

// keeps the key out of logs
impl fmt::Debug for AdvisorySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorySettings")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub app_mode: AppMode,
    pub candle_file: PathBuf,
    pub symbol: String,
    pub interval: Interval,
    pub warmup_bars: usize,
    /// Defaults to the first candle in the file.
    pub backtest_start: Option<DateTime<Utc>>,
    /// Defaults to one interval past the last candle in the file.
    pub backtest_end: Option<DateTime<Utc>>,
    pub backtest: BacktestParams,
    /// Multiplier on the unleveraged size of advised entries.
    pub leverage: u32,
    pub advisory: Option<AdvisorySettings>,
    pub metrics_addr: Option<SocketAddr>,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        dotenv().ok(); // loads `.env` file automatically
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `new` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app_mode = get("APP_MODE")
            .unwrap_or_else(|| "backtest".into())
            .parse::<AppMode>()?;
        let candle_file = PathBuf::from(get("CANDLE_FILE").unwrap_or_else(|| "candles.json".into()));
        let symbol = get("SYMBOL").unwrap_or_else(|| "BTCUSDT".into()).to_uppercase();
        let interval = get("INTERVAL")
            .unwrap_or_else(|| "15m".into())
            .parse::<Interval>()
            .map_err(|e| format!("INTERVAL: {e}"))?;
        let warmup_bars = parse_or(&get, "WARMUP_BARS", 100usize)?;

        let backtest_start = get("BACKTEST_START")
            .map(|s| parse_time("BACKTEST_START", &s))
            .transpose()?;
        let backtest_end = get("BACKTEST_END")
            .map(|s| parse_time("BACKTEST_END", &s))
            .transpose()?;

        let defaults = BacktestParams::default();
        let backtest = BacktestParams {
            judge_length: parse_or(&get, "JUDGE_LENGTH", defaults.judge_length)?,
            buffer_percent: parse_or(&get, "BUFFER_PERCENT", defaults.buffer_percent)?,
            win_percent: parse_or(&get, "WIN_PERCENT", defaults.win_percent)?,
            loss_rate: parse_or(&get, "LOSS_RATE", defaults.loss_rate)?,
            fee_rate: parse_or(&get, "FEE_RATE", defaults.fee_rate)?,
        };
        let leverage = parse_or(&get, "LEVERAGE", DEFAULT_LEVERAGE)?;

        let advisory = match (get("ADVISORY_BASE_URL"), get("ADVISORY_API_KEY")) {
            (Some(base_url), Some(api_key)) => Some(AdvisorySettings {
                base_url,
                api_key,
                model: get("ADVISORY_MODEL")
                    .unwrap_or_else(|| crate::services::advisory::DEFAULT_MODEL.into()),
            }),
            (None, None) => None,
            _ => return Err("ADVISORY_BASE_URL and ADVISORY_API_KEY must be set together".into()),
        };
        if app_mode == AppMode::Advise && advisory.is_none() {
            return Err("APP_MODE=advise needs ADVISORY_BASE_URL and ADVISORY_API_KEY".into());
        }
        if leverage == 0 {
            return Err("LEVERAGE must be at least 1".into());
        }

        let metrics_addr = get("METRICS_ADDR")
            .map(|s| {
                s.parse::<SocketAddr>()
                    .map_err(|_| "METRICS_ADDR must be host:port")
            })
            .transpose()?;

        Ok(Self {
            app_mode,
            candle_file,
            symbol,
            interval,
            warmup_bars,
            backtest_start,
            backtest_end,
            backtest,
            leverage,
            advisory,
            metrics_addr,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, Box<dyn Error>>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{key} must be a valid {}", std::any::type_name::<T>()).into()),
        None => Ok(default),
    }
}

fn parse_time(key: &str, raw: &str) -> Result<DateTime<Utc>, Box<dyn Error>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| format!("{key} must be an RFC 3339 timestamp").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, Box<dyn Error>> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_on_empty_env() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.app_mode, AppMode::Backtest);
        assert_eq!(s.symbol, "BTCUSDT");
        assert_eq!(s.interval, Interval::M15);
        assert_eq!(s.warmup_bars, 100);
        assert_eq!(s.backtest, BacktestParams::default());
        assert_eq!(s.leverage, 5);
        assert!(s.advisory.is_none());
        assert!(s.metrics_addr.is_none());
        assert!(s.backtest_start.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let s = settings(&[
            ("APP_MODE", "Swing"),
            ("SYMBOL", "ethusdt"),
            ("INTERVAL", "1h"),
            ("JUDGE_LENGTH", "6"),
            ("FEE_RATE", "0.0005"),
            ("BACKTEST_START", "2024-01-01T00:00:00Z"),
            ("METRICS_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();
        assert_eq!(s.app_mode, AppMode::Swing);
        assert_eq!(s.symbol, "ETHUSDT");
        assert_eq!(s.interval, Interval::H1);
        assert_eq!(s.backtest.judge_length, 6);
        assert_eq!(s.backtest.fee_rate, 0.0005);
        assert_eq!(
            s.backtest_start.map(|t| t.timestamp()),
            Some(1_704_067_200)
        );
        assert_eq!(s.metrics_addr.map(|a| a.port()), Some(9000));
    }

    #[test]
    fn bad_numbers_name_the_key() {
        let err = settings(&[("WARMUP_BARS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("WARMUP_BARS"));
    }

    #[test]
    fn advisory_needs_url_and_key() {
        assert!(settings(&[("ADVISORY_API_KEY", "k")]).is_err());
        let s = settings(&[("ADVISORY_BASE_URL", "https://api.example.com"), ("ADVISORY_API_KEY", "k")])
            .unwrap();
        let adv = s.advisory.unwrap();
        assert_eq!(adv.model, "deepseek-chat");
        assert!(!format!("{adv:?}").contains("\"k\""));
    }

    #[test]
    fn advise_mode_requires_advisory_credentials() {
        let err = settings(&[("APP_MODE", "advise")]).unwrap_err();
        assert!(err.to_string().contains("APP_MODE=advise"));

        let s = settings(&[
            ("APP_MODE", "advise"),
            ("ADVISORY_BASE_URL", "https://api.example.com/"),
            ("ADVISORY_API_KEY", "k"),
            ("LEVERAGE", "3"),
        ])
        .unwrap();
        assert_eq!(s.app_mode, AppMode::Advise);
        assert_eq!(s.leverage, 3);
    }

    #[test]
    fn zero_leverage_rejected() {
        assert!(settings(&[("LEVERAGE", "0")]).is_err());
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(settings(&[("APP_MODE", "live")]).is_err());
    }
}
