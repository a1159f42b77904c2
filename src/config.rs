//! Configuration management for the Racer bot

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Messaging-platform client identity passed to the session helper
    pub api_id: Option<i64>,
    pub api_hash: Option<String>,

    /// Telegram bot token for status reports (optional, log-only without it)
    pub telegram_bot_token: Option<String>,

    /// Telegram user ids allowed to send /start, /stop, /status
    pub authorized_users: Vec<i64>,

    /// Newline-delimited credential file
    pub data_path: PathBuf,

    /// Directory holding `session_*.session` files
    pub session_dir: PathBuf,

    /// External executable that drives messaging sessions
    pub session_helper: String,

    /// Seconds before a session helper invocation is abandoned
    pub refresh_timeout_secs: u64,

    /// Referral link code sent with account info requests
    pub link_code: String,

    /// Attempts per remote call (including the first)
    pub retry_count: u32,

    /// Every wait in the run loop
    pub timings: Timings,
}

/// Fixed waits used by the workflow, the orchestrator and the reporter
#[derive(Debug, Clone)]
pub struct Timings {
    /// Delay between failed attempts of one call
    pub retry_delay: Duration,
    /// Gap between the two reference price samples
    pub sample_interval: Duration,
    /// Pause between rounds while chances remain
    pub chance_interval: Duration,
    /// Pause after a successful refuel
    pub refuel_settle: Duration,
    /// Pause after a full pass over all credentials
    pub cycle_cooldown: Duration,
    /// Poll interval while the bot is inactive
    pub inactive_poll: Duration,
    /// Minimum gap between throttled status pushes
    pub update_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1000),
            sample_interval: Duration::from_secs(4),
            chance_interval: Duration::from_secs(1),
            refuel_settle: Duration::from_secs(5),
            cycle_cooldown: Duration::from_secs(5 * 60),
            inactive_poll: Duration::from_secs(60),
            update_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let api_id = match env::var("API_ID").ok().filter(|s| !s.is_empty()) {
            Some(v) => Some(v.trim().parse::<i64>().context("API_ID must be an integer")?),
            None => None,
        };
        let api_hash = env::var("API_HASH").ok().filter(|s| !s.is_empty());

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok().filter(|s| !s.is_empty());

        let authorized_users = parse_user_list(&env::var("AUTHORIZED_USERS").unwrap_or_default())?;

        let data_path = env::var("DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data.txt"));

        let session_dir = env::var("SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("session"));

        let session_helper = env::var("SESSION_HELPER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "racer-session-helper".to_string());

        let refresh_timeout_secs = env_number("REFRESH_TIMEOUT_SECS").unwrap_or(120);

        let link_code = env::var("RACER_LINK_CODE")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| RacerApi::DEFAULT_LINK_CODE.to_string());

        let retry_count = env_number("RETRY_COUNT").unwrap_or(3).max(1) as u32;

        let defaults = Timings::default();
        let timings = Timings {
            retry_delay: env_number("RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            update_interval: env_number("UPDATE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.update_interval),
            cycle_cooldown: env_number("CYCLE_COOLDOWN_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cycle_cooldown),
            inactive_poll: env_number("INACTIVE_POLL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactive_poll),
            ..defaults
        };

        // Validate configuration
        if telegram_bot_token.is_some() && authorized_users.is_empty() {
            anyhow::bail!("AUTHORIZED_USERS required when TELEGRAM_BOT_TOKEN is set");
        }

        Ok(Self {
            api_id,
            api_hash,
            telegram_bot_token,
            authorized_users,
            data_path,
            session_dir,
            session_helper,
            refresh_timeout_secs,
            link_code,
            retry_count,
            timings,
        })
    }
}

fn env_number(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a comma separated list of Telegram user ids
pub fn parse_user_list(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("invalid user id in AUTHORIZED_USERS: {}", s))
        })
        .collect()
}

/// Racer game API configuration
pub struct RacerApi;

impl RacerApi {
    pub const BASE_URL: &'static str = "https://www.okx.com/priapi/v1/affiliate/game/racer";
    pub const TICKER_URL: &'static str = "https://www.okx.com/api/v5/market/ticker";
    pub const TICKER_INSTRUMENT: &'static str = "BTC-USDT";
    pub const GAME_ID: u32 = 1;
    pub const DEFAULT_LINK_CODE: &'static str = "88910038";
    /// Telegram bot hosting the mini-app
    pub const BOT_USERNAME: &'static str = "OKX_official_bot";
    pub const WEBVIEW_URL: &'static str = "https://www.okx.com/";

    pub fn endpoint(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    pub fn referer(link_code: &str) -> String {
        format!(
            "https://www.okx.com/mini-app/racer?tgWebAppStartParam=linkCode_{}",
            link_code
        )
    }
}
