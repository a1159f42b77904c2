//! Run statistics and throttled status reporting
//!
//! The reporter owns both the aggregate counters and the reporting context
//! (active flag, bound chat, last status message). Clones share state, so the
//! Telegram command listener and the orchestrator see the same flag.

use crate::clock::Clock;
use crate::services::metrics::{Metrics, MetricsSnapshot};
use crate::types::BoostKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outbound side of the operator chat
#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Send a new message, returning its id
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<i64>;

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Something worth counting happened
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    /// One settled bet
    AccountUpdate { won: bool, points: Decimal },
    DailyTask { completed: bool },
    Upgrade { boost: BoostKind },
    BoostUse { boost: BoostKind },
    Error { context: String, message: String },
    /// An account finished its pass
    Activity,
}

impl StatsEvent {
    pub fn error(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StatsEvent::Error {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Process-lifetime aggregate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    pub total_rounds: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_profit: Decimal,
    pub daily_tasks_completed: u64,
    pub upgrades_performed: u64,
    pub boosts_used: u64,
    pub errors_logged: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl Stats {
    fn apply(&mut self, event: &StatsEvent, now: DateTime<Utc>) {
        match event {
            StatsEvent::AccountUpdate { won, points } => {
                self.total_rounds += 1;
                if *won {
                    self.wins += 1;
                    self.total_profit += *points;
                } else {
                    self.losses += 1;
                    self.total_profit -= *points;
                }
            }
            StatsEvent::DailyTask { completed } => {
                if *completed {
                    self.daily_tasks_completed += 1;
                }
            }
            StatsEvent::Upgrade { .. } => self.upgrades_performed += 1,
            StatsEvent::BoostUse { .. } => self.boosts_used += 1,
            StatsEvent::Error { .. } => self.errors_logged += 1,
            StatsEvent::Activity => {}
        }
        self.last_update = Some(now);
    }

    /// Percentage of rounds won, two decimal places
    pub fn win_rate(&self) -> Decimal {
        if self.total_rounds == 0 {
            return Decimal::ZERO;
        }
        (Decimal::from(self.wins) * Decimal::from(100) / Decimal::from(self.total_rounds)).round_dp(2)
    }
}

/// Who receives status updates and whether the bot should run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportingContext {
    pub active: bool,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub last_activity: Option<DateTime<Utc>>,
}

struct ReporterState {
    stats: Stats,
    context: ReportingContext,
    last_push: DateTime<Utc>,
}

#[derive(Clone)]
pub struct StatsReporter {
    state: Arc<Mutex<ReporterState>>,
    channel: Option<Arc<dyn StatusChannel>>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    update_interval: Duration,
}

impl StatsReporter {
    pub fn new(
        channel: Option<Arc<dyn StatusChannel>>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        update_interval: Duration,
    ) -> Self {
        let last_push = clock.now();
        Self {
            state: Arc::new(Mutex::new(ReporterState {
                stats: Stats::default(),
                context: ReportingContext::default(),
                last_push,
            })),
            channel,
            clock,
            metrics,
            update_interval,
        }
    }

    /// Record an event, pushing a status update if the throttle allows
    pub async fn update(&self, event: StatsEvent) {
        if let StatsEvent::Error { context, message } = &event {
            error!("Error in {}: {}", context, message);
        }

        let now = self.clock.now();
        let due = {
            let mut state = self.state.lock().await;
            state.stats.apply(&event, now);
            if event == StatsEvent::Activity {
                state.context.last_activity = Some(now);
            }

            let elapsed = (now - state.last_push).to_std().unwrap_or_default();
            if elapsed > self.update_interval {
                state.last_push = now;
                true
            } else {
                false
            }
        };

        if due {
            self.push().await;
        }
    }

    /// Bind the operator chat and activate the run loop
    pub async fn start(&self, chat_id: i64) {
        {
            let mut state = self.state.lock().await;
            state.context.active = true;
            if state.context.chat_id != Some(chat_id) {
                state.context.message_id = None;
            }
            state.context.chat_id = Some(chat_id);
            state.context.last_activity = Some(self.clock.now());
        }
        info!("Bot started from chat {}", chat_id);
        self.push().await;
    }

    /// Activate without an operator chat (no reporting channel configured)
    pub async fn activate(&self) {
        let mut state = self.state.lock().await;
        state.context.active = true;
        state.context.last_activity = Some(self.clock.now());
    }

    /// Deactivate, send a final status and unbind the chat
    pub async fn stop(&self) {
        self.state.lock().await.context.active = false;
        info!("Bot stopped");
        self.push().await;

        let mut state = self.state.lock().await;
        state.context.chat_id = None;
        state.context.message_id = None;
    }

    /// Forced push on operator request
    pub async fn push_status(&self) {
        self.push().await;
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.context.active
    }

    pub async fn stats(&self) -> Stats {
        self.state.lock().await.stats.clone()
    }

    pub async fn context(&self) -> ReportingContext {
        self.state.lock().await.context.clone()
    }

    async fn push(&self) {
        let (text, chat_id, message_id) = {
            let state = self.state.lock().await;
            (
                render_status(&state.stats, &state.context, &self.metrics.snapshot()),
                state.context.chat_id,
                state.context.message_id,
            )
        };

        info!("Status update:\n{}", text);

        let (Some(channel), Some(chat_id)) = (self.channel.as_ref(), chat_id) else {
            debug!("No operator chat bound, status logged only");
            return;
        };

        if let Some(message_id) = message_id {
            match channel.edit_message(chat_id, message_id, &text).await {
                Ok(()) => return,
                Err(e) => warn!("Failed to edit status message {}: {}", message_id, e),
            }
        }

        match channel.send_message(chat_id, &text).await {
            Ok(new_id) => {
                let mut state = self.state.lock().await;
                if state.context.chat_id == Some(chat_id) {
                    state.context.message_id = Some(new_id);
                }
            }
            Err(e) => warn!("Failed to send status message: {}", e),
        }
    }
}

/// Status text for the operator chat (HTML parse mode)
pub fn render_status(stats: &Stats, context: &ReportingContext, metrics: &MetricsSnapshot) -> String {
    let (emoji, status) = if context.active {
        ("🟢", "Active")
    } else {
        ("🔴", "Inactive")
    };

    let last_activity = context
        .last_activity
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "No recent activity".to_string());

    format!(
        "<b>OKX Racer Bot Status</b>\n\n\
         {emoji} Bot Status: {status}\n\
         Last Activity: {last_activity}\n\n\
         📊 Overall Stats:\n\
         Total Bets: {total}\n\
         Wins: {wins} | Losses: {losses}\n\
         Win Rate: {win_rate:.2}%\n\
         Total Profit: {profit} points\n\n\
         🔄 Daily Tasks Completed: {daily}\n\
         ⬆️ Upgrades Performed: {upgrades}\n\
         ⛽ Refuels Used: {boosts}\n\
         ⚠️ Errors: {errors}\n\
         🌐 API Calls: {api_calls}",
        total = stats.total_rounds,
        wins = stats.wins,
        losses = stats.losses,
        win_rate = stats.win_rate(),
        profit = stats.total_profit.normalize(),
        daily = stats.daily_tasks_completed,
        upgrades = stats.upgrades_performed,
        boosts = stats.boosts_used,
        errors = stats.errors_logged,
        api_calls = metrics.api_calls_total,
    )
}
