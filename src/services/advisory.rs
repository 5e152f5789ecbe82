// src/services/advisory.rs

//! External price-level recommendations.
//!
//! [`ChatAdvisor`] asks an OpenAI-compatible chat-completions endpoint for a
//! JSON order plan. The reply is validated and rounded the same way the local
//! planner rounds, so the live loop treats both sources identically.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::services::strategies::{Candle, OrderLeg, OrderPlan, Side};
use crate::utils::errors::AdvisoryError;

pub const DEFAULT_MODEL: &str = "deepseek-chat";

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn recommend(
        &self,
        serialized_candles: &str,
        win_percent: f64,
        loss_rate: f64,
    ) -> Result<OrderPlan, AdvisoryError>;
}

/// Candles as compact rows:
/// `[openTimeMs, open, high, low, close, volume, quoteVolume, tradeCount]`.
pub fn serialize_candles(candles: &[Candle]) -> Result<String, AdvisoryError> {
    let rows: Vec<Value> = candles
        .iter()
        .map(|c| {
            json!([
                c.open_time.timestamp_millis(),
                c.open,
                c.high,
                c.low,
                c.close,
                c.volume,
                c.quote_volume,
                c.trade_count
            ])
        })
        .collect();
    Ok(serde_json::to_string(&rows)?)
}

pub struct ChatAdvisor {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatAdvisor {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn messages(serialized_candles: &str, win_percent: f64, loss_rate: f64) -> Vec<ChatMessage<'static>> {
        let system = "You receive candlestick data as JSON rows of \
            [openTimeMs, open, high, low, close, volume, quoteVolume, tradeCount]. \
            Answer only with a JSON object shaped like \
            {\"supportPrice\": 100.12, \"breakPrice\": 100.23, \
            \"long\": {\"price\": 100.34, \"stopLoss\": 100.01, \"takeProfit\": 101.2}, \
            \"short\": {\"price\": 99.9, \"stopLoss\": 100.2, \"takeProfit\": 99.1}}";
        let user = format!(
            "Candles:\n{serialized_candles}\n\
             Predict the next breakout and support levels and give long and short \
             entries with their take-profit and stop-loss prices. \
             Target at least {:.2}% profit with a stop of at least {:.2}%.",
            win_percent * 100.0,
            win_percent * loss_rate * 100.0
        );
        vec![
            ChatMessage {
                role: "system",
                content: system.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ]
    }
}

#[async_trait]
impl Advisor for ChatAdvisor {
    async fn recommend(
        &self,
        serialized_candles: &str,
        win_percent: f64,
        loss_rate: f64,
    ) -> Result<OrderPlan, AdvisoryError> {
        let body = json!({
            "model": self.model,
            "messages": Self::messages(serialized_candles, win_percent, loss_rate),
            "response_format": { "type": "json_object" },
        });

        let started = std::time::Instant::now();
        let resp: ChatResponse = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        log::debug!("advisory reply in {:?}", started.elapsed());

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdvisoryError::Malformed("empty completion".into()))?;
        parse_plan(&content)
    }
}

/// Parse and sanity-check a plan returned by the advisory service.
pub fn parse_plan(content: &str) -> Result<OrderPlan, AdvisoryError> {
    let plan: OrderPlan = serde_json::from_str(content.trim())?;
    check_leg(Side::Long, &plan.long)?;
    check_leg(Side::Short, &plan.short)?;
    Ok(OrderPlan {
        long: plan.long.rounded(),
        short: plan.short.rounded(),
        ..plan
    })
}

fn check_leg(side: Side, leg: &OrderLeg) -> Result<(), AdvisoryError> {
    let prices = [leg.entry_price, leg.take_profit_price, leg.stop_loss_price];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(AdvisoryError::Malformed(format!("{side} leg has a non-positive price")));
    }
    let ordered = match side {
        Side::Long => leg.take_profit_price > leg.entry_price && leg.entry_price > leg.stop_loss_price,
        Side::Short => leg.take_profit_price < leg.entry_price && leg.entry_price < leg.stop_loss_price,
    };
    if ordered {
        Ok(())
    } else {
        Err(AdvisoryError::Malformed(format!(
            "{side} leg out of order: entry {} tp {} sl {}",
            leg.entry_price, leg.take_profit_price, leg.stop_loss_price
        )))
    }
}
