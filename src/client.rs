//! HTTP client for the Racer game API and the public BTC ticker

use crate::clock::Clock;
use crate::config::{Config, RacerApi};
use crate::error::RemoteApiError;
use crate::services::metrics::Metrics;
use crate::services::retry::{with_retry, RetryConfig};
use crate::types::{AccountIdentity, Assessment, BoostKind, BoostState, Credential, DailyTask, Prediction};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Header carrying the per-account credential
const INIT_DATA_HEADER: &str = "X-Telegram-Init-Data";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0";

/// Remote capabilities the account workflow depends on
#[async_trait]
pub trait GameApi: Send + Sync {
    async fn fetch_daily_tasks(&self, credential: &Credential) -> Result<Vec<DailyTask>, RemoteApiError>;

    async fn claim_daily_task(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        task_id: u32,
    ) -> Result<(), RemoteApiError>;

    async fn fetch_boosts(&self, credential: &Credential) -> Result<Vec<BoostState>, RemoteApiError>;

    /// Returns whether the game accepted the purchase
    async fn purchase_boost(&self, credential: &Credential, kind: BoostKind) -> Result<bool, RemoteApiError>;

    async fn submit_price_prediction(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        prediction: Prediction,
    ) -> Result<Assessment, RemoteApiError>;

    async fn fetch_account_balance(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
    ) -> Result<Decimal, RemoteApiError>;

    async fn fetch_reference_price(&self) -> Result<Decimal, RemoteApiError>;
}

/// Standard `{code, msg, data}` wrapper of every Racer response
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T, RemoteApiError> {
        let code = self.code;
        let msg = self.msg.unwrap_or_default();
        self.data.ok_or_else(|| {
            RemoteApiError::malformed(what, format!("no data (code {}, msg {:?})", code, msg))
        })
    }
}

#[derive(Debug, Deserialize)]
struct WireTask {
    id: u32,
    state: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBoost {
    id: u32,
    cur_stage: u32,
    total_stage: u32,
    point_cost: Decimal,
    #[serde(default)]
    context: Option<WireBoostContext>,
}

#[derive(Debug, Deserialize)]
struct WireBoostContext {
    #[serde(default)]
    name: Option<String>,
}

impl From<WireBoost> for BoostState {
    fn from(wire: WireBoost) -> Self {
        let name = wire
            .context
            .and_then(|c| c.name)
            .or_else(|| BoostKind::from_id(wire.id).map(|k| k.to_string()))
            .unwrap_or_else(|| format!("Boost #{}", wire.id));
        Self {
            id: wire.id,
            name,
            current_stage: wire.cur_stage,
            total_stage: wire.total_stage,
            point_cost: wire.point_cost,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInfo {
    balance_points: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAssess {
    won: bool,
    base_point: Decimal,
    multiplier: Decimal,
    balance_points: Decimal,
    #[serde(default)]
    prev_price: Decimal,
    #[serde(default)]
    current_price: Decimal,
    num_chance: i64,
}

impl From<WireAssess> for Assessment {
    fn from(wire: WireAssess) -> Self {
        Self {
            won: wire.won,
            base_point: wire.base_point,
            multiplier: wire.multiplier,
            balance_points: wire.balance_points,
            prev_price: wire.prev_price,
            current_price: wire.current_price,
            num_chance: wire.num_chance,
        }
    }
}

/// Public market ticker response
#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    data: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    last: String,
}

/// Racer API client with fixed-delay retry on every call
pub struct RacerClient {
    http: Client,
    base_url: String,
    ticker_url: String,
    link_code: String,
    retry: RetryConfig,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl RacerClient {
    pub fn new(config: &Config, clock: Arc<dyn Clock>, metrics: Metrics) -> Result<Self> {
        let retry = RetryConfig {
            attempts: config.retry_count,
            delay: config.timings.retry_delay,
        };
        Self::with_endpoints(
            RacerApi::BASE_URL,
            RacerApi::TICKER_URL,
            &config.link_code,
            retry,
            clock,
            metrics,
        )
    }

    pub fn with_endpoints(
        base_url: &str,
        ticker_url: &str,
        link_code: &str,
        retry: RetryConfig,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(web_headers(link_code)?)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            ticker_url: ticker_url.to_string(),
            link_code: link_code.to_string(),
            retry,
            clock,
            metrics,
        })
    }

    fn url(&self, path: &str) -> String {
        RacerApi::endpoint(&self.base_url, path)
    }

    fn timestamp(&self) -> [(&'static str, i64); 1] {
        [("t", self.clock.now().timestamp_millis())]
    }

    fn get(&self, path: &str, credential: &Credential) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .query(&self.timestamp())
            .header(INIT_DATA_HEADER, credential.as_str())
    }

    fn post(&self, path: &str, credential: &Credential, body: &serde_json::Value) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .query(&self.timestamp())
            .header(INIT_DATA_HEADER, credential.as_str())
            .json(body)
    }

    /// Send a request with retry and decode the body as `T`.
    ///
    /// `build` is called once per attempt so each attempt carries a fresh
    /// timestamp.
    async fn call<T, B>(&self, what: &'static str, build: B) -> Result<T, RemoteApiError>
    where
        T: DeserializeOwned,
        B: Fn() -> RequestBuilder,
    {
        let this = self;
        let attempt = AtomicU32::new(0);
        let body = with_retry(&self.retry, self.clock.as_ref(), what, || {
            let request = build();
            if attempt.fetch_add(1, Ordering::Relaxed) > 0 {
                this.metrics.inc_retries();
            }
            async move {
                this.metrics.inc_api_calls();
                let result = execute(request).await;
                if result.is_err() {
                    this.metrics.inc_api_errors();
                }
                result
            }
        })
        .await?;

        serde_json::from_str::<T>(&body).map_err(|e| {
            self.metrics.inc_api_errors();
            RemoteApiError::malformed(what, e)
        })
    }
}

async fn execute(request: RequestBuilder) -> Result<String, RemoteApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| RemoteApiError::from_network_error(&e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RemoteApiError::from_network_error(&e))?;

    if !status.is_success() {
        return Err(RemoteApiError::from_response(status.as_u16(), &body));
    }

    Ok(body)
}

/// Headers the OKX web front end sends with every mini-app request
fn web_headers(link_code: &str) -> Result<HeaderMap> {
    let referer = RacerApi::referer(link_code);
    let pairs: [(&str, &str); 16] = [
        ("accept", "application/json"),
        ("accept-language", "en-US,en;q=0.9"),
        ("app-type", "web"),
        ("origin", "https://www.okx.com"),
        ("referer", referer.as_str()),
        (
            "sec-ch-ua",
            "\"Not/A)Brand\";v=\"8\", \"Chromium\";v=\"126\", \"Microsoft Edge\";v=\"126\"",
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", "\"Windows\""),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-origin"),
        ("user-agent", USER_AGENT),
        ("x-cdn", "https://www.okx.com"),
        ("x-locale", "en_US"),
        ("x-utc", "7"),
        ("x-zkdex-env", "0"),
    ];

    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid value for header {}", name))?;
        headers.insert(HeaderName::from_static(name), value);
    }
    Ok(headers)
}

#[async_trait]
impl GameApi for RacerClient {
    async fn fetch_daily_tasks(&self, credential: &Credential) -> Result<Vec<DailyTask>, RemoteApiError> {
        let envelope: Envelope<Vec<WireTask>> = self.call("tasks", || self.get("tasks", credential)).await?;
        let tasks = envelope
            .into_data("tasks")?
            .into_iter()
            .map(|t| DailyTask { id: t.id, state: t.state })
            .collect();
        Ok(tasks)
    }

    async fn claim_daily_task(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        task_id: u32,
    ) -> Result<(), RemoteApiError> {
        let body = json!({ "extUserId": account.user_id, "id": task_id });
        let envelope: Envelope<serde_json::Value> = self
            .call("task", || self.post("task", credential, &body))
            .await?;
        debug!("Check-in response code {}", envelope.code);
        Ok(())
    }

    async fn fetch_boosts(&self, credential: &Credential) -> Result<Vec<BoostState>, RemoteApiError> {
        let envelope: Envelope<Vec<WireBoost>> = self.call("boosts", || self.get("boosts", credential)).await?;
        Ok(envelope
            .into_data("boosts")?
            .into_iter()
            .map(BoostState::from)
            .collect())
    }

    async fn purchase_boost(&self, credential: &Credential, kind: BoostKind) -> Result<bool, RemoteApiError> {
        let body = json!({ "id": kind.id() });
        let envelope: Envelope<serde_json::Value> = self
            .call("boost", || self.post("boost", credential, &body))
            .await?;
        if envelope.code != 0 {
            debug!(
                "{} purchase refused: code {} {}",
                kind,
                envelope.code,
                envelope.msg.unwrap_or_default()
            );
        }
        Ok(envelope.code == 0)
    }

    async fn submit_price_prediction(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        prediction: Prediction,
    ) -> Result<Assessment, RemoteApiError> {
        let body = json!({
            "extUserId": account.user_id,
            "predict": prediction.wire_value(),
            "gameId": RacerApi::GAME_ID,
        });
        let envelope: Envelope<WireAssess> = self
            .call("assess", || self.post("assess", credential, &body))
            .await?;
        Ok(envelope.into_data("assess")?.into())
    }

    async fn fetch_account_balance(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
    ) -> Result<Decimal, RemoteApiError> {
        let body = json!({
            "extUserId": account.user_id,
            "extUserName": account.user_name,
            "gameId": RacerApi::GAME_ID,
            "linkCode": self.link_code,
        });
        let envelope: Envelope<WireInfo> = self
            .call("info", || self.post("info", credential, &body))
            .await?;
        Ok(envelope.into_data("info")?.balance_points)
    }

    async fn fetch_reference_price(&self) -> Result<Decimal, RemoteApiError> {
        let response: TickerResponse = self
            .call("ticker", || {
                self.http
                    .get(&self.ticker_url)
                    .query(&[("instId", RacerApi::TICKER_INSTRUMENT)])
            })
            .await?;

        let last = response
            .data
            .first()
            .map(|entry| entry.last.as_str())
            .ok_or_else(|| RemoteApiError::malformed("ticker", "no price data"))?;

        Decimal::from_str(last).map_err(|e| RemoteApiError::malformed("ticker", e))
    }
}
