//! In-memory doubles shared by the unit tests

use crate::client::GameApi;
use crate::clock::Clock;
use crate::error::{RefreshError, RemoteApiError};
use crate::refresher::CredentialRefresher;
use crate::stats::StatusChannel;
use crate::types::{AccountIdentity, Assessment, BoostKind, BoostState, Credential, DailyTask, Prediction, SessionHandle};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A decodable credential for user `id`
pub fn credential(id: i64, name: &str) -> Credential {
    Credential::new(format!(
        "query_id=Q{id}&user=%7B%22id%22%3A{id}%2C%22username%22%3A%22{name}%22%7D&auth_date=1719830000&hash=h{id}"
    ))
}

pub fn boost(kind: BoostKind, current_stage: u32, total_stage: u32, point_cost: Decimal) -> BoostState {
    BoostState {
        id: kind.id(),
        name: kind.to_string(),
        current_stage,
        total_stage,
        point_cost,
    }
}

/// Settlement worth `points` with `chances` rounds left afterwards
pub fn assessment(won: bool, points: Decimal, chances: i64) -> Assessment {
    Assessment {
        won,
        base_point: points,
        multiplier: Decimal::ONE,
        balance_points: Decimal::ZERO,
        prev_price: Decimal::ZERO,
        current_price: Decimal::ZERO,
        num_chance: chances,
    }
}

/// Clock that advances only when slept on. Sleeping yields to the runtime so
/// endless loops stay cancellable.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 7, 1, 12, 0, 0)
            .unwrap();
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Status channel that keeps everything it was asked to deliver
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(i64, String, i64)>>,
    edited: Mutex<Vec<(i64, i64, String)>>,
    texts: Mutex<Vec<String>>,
    next_id: AtomicI64,
    fail_edits: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Default::default()
        }
    }

    /// `(chat_id, text, assigned message id)`
    pub fn sent(&self) -> Vec<(i64, String, i64)> {
        self.sent.lock().unwrap().clone()
    }

    /// `(chat_id, message_id, text)`
    pub fn edited(&self) -> Vec<(i64, i64, String)> {
        self.edited.lock().unwrap().clone()
    }

    pub fn push_count(&self) -> usize {
        self.sent.lock().unwrap().len() + self.edited.lock().unwrap().len()
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    /// Text of the latest delivered push, sent or edited
    pub fn last_text(&self) -> Option<String> {
        self.texts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StatusChannel for RecordingChannel {
    async fn send_message(&self, chat_id: i64, text: &str) -> anyhow::Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push((chat_id, text.to_string(), id));
        self.texts.lock().unwrap().push(text.to_string());
        Ok(id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> anyhow::Result<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            anyhow::bail!("message to edit not found");
        }
        self.edited
            .lock()
            .unwrap()
            .push((chat_id, message_id, text.to_string()));
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct Script {
    tasks: Vec<DailyTask>,
    fail_tasks: bool,
    boosts: VecDeque<Vec<BoostState>>,
    balances: VecDeque<Decimal>,
    prices: VecDeque<Decimal>,
    assessments: VecDeque<Assessment>,
    purchases: VecDeque<bool>,
    failing: HashSet<Credential>,
    calls: Vec<String>,
    accounts: Vec<Credential>,
}

/// Pops the next scripted value, repeating the last one once the queue is down
/// to a single entry
fn next_or_last<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Game API answering from a script instead of the network
#[derive(Default)]
pub struct ScriptedGameApi {
    script: Mutex<Script>,
}

impl ScriptedGameApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(self, tasks: Vec<DailyTask>) -> Self {
        self.script.lock().unwrap().tasks = tasks;
        self
    }

    pub fn failing_tasks(self) -> Self {
        self.script.lock().unwrap().fail_tasks = true;
        self
    }

    /// Successive `fetch_boosts` answers
    pub fn with_boosts(self, boosts: Vec<Vec<BoostState>>) -> Self {
        self.script.lock().unwrap().boosts = boosts.into();
        self
    }

    pub fn with_balances(self, balances: Vec<Decimal>) -> Self {
        self.script.lock().unwrap().balances = balances.into();
        self
    }

    pub fn with_prices(self, prices: Vec<Decimal>) -> Self {
        self.script.lock().unwrap().prices = prices.into();
        self
    }

    /// Consumed in order; once exhausted every bet loses with no chances left
    pub fn with_assessments(self, assessments: Vec<Assessment>) -> Self {
        self.script.lock().unwrap().assessments = assessments.into();
        self
    }

    /// Consumed in order; once exhausted every purchase is accepted
    pub fn with_purchases(self, purchases: Vec<bool>) -> Self {
        self.script.lock().unwrap().purchases = purchases.into();
        self
    }

    /// Every call made with `credential` answers 401
    pub fn failing_for(self, credential: &Credential) -> Self {
        self.script.lock().unwrap().failing.insert(credential.clone());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    /// Credentials in the order their workflow reached the API
    pub fn accounts(&self) -> Vec<Credential> {
        self.script.lock().unwrap().accounts.clone()
    }

    fn record(&self, credential: Option<&Credential>, call: String) -> Result<(), RemoteApiError> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(call);
        match credential {
            Some(c) if script.failing.contains(c) => Err(RemoteApiError::new(Some(401), "Unauthorized")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl GameApi for ScriptedGameApi {
    async fn fetch_daily_tasks(&self, credential: &Credential) -> Result<Vec<DailyTask>, RemoteApiError> {
        self.script.lock().unwrap().accounts.push(credential.clone());
        self.record(Some(credential), "tasks".into())?;
        let script = self.script.lock().unwrap();
        if script.fail_tasks {
            return Err(RemoteApiError::new(Some(500), "Internal Server Error"));
        }
        Ok(script.tasks.clone())
    }

    async fn claim_daily_task(
        &self,
        credential: &Credential,
        _account: &AccountIdentity,
        task_id: u32,
    ) -> Result<(), RemoteApiError> {
        self.record(Some(credential), format!("claim:{}", task_id))
    }

    async fn fetch_boosts(&self, credential: &Credential) -> Result<Vec<BoostState>, RemoteApiError> {
        self.record(Some(credential), "boosts".into())?;
        Ok(next_or_last(&mut self.script.lock().unwrap().boosts).unwrap_or_default())
    }

    async fn purchase_boost(&self, credential: &Credential, kind: BoostKind) -> Result<bool, RemoteApiError> {
        self.record(Some(credential), format!("purchase:{:?}", kind))?;
        Ok(self.script.lock().unwrap().purchases.pop_front().unwrap_or(true))
    }

    async fn submit_price_prediction(
        &self,
        credential: &Credential,
        _account: &AccountIdentity,
        prediction: Prediction,
    ) -> Result<Assessment, RemoteApiError> {
        self.record(Some(credential), format!("assess:{}", prediction))?;
        Ok(self
            .script
            .lock()
            .unwrap()
            .assessments
            .pop_front()
            .unwrap_or_else(|| assessment(false, Decimal::ONE, 0)))
    }

    async fn fetch_account_balance(
        &self,
        credential: &Credential,
        _account: &AccountIdentity,
    ) -> Result<Decimal, RemoteApiError> {
        self.record(Some(credential), "balance".into())?;
        Ok(next_or_last(&mut self.script.lock().unwrap().balances).unwrap_or_default())
    }

    async fn fetch_reference_price(&self) -> Result<Decimal, RemoteApiError> {
        self.record(None, "price".into())?;
        Ok(self
            .script
            .lock()
            .unwrap()
            .prices
            .pop_front()
            .unwrap_or(Decimal::ONE_HUNDRED))
    }
}

/// Refresher handing out queued results and remembering who asked
#[derive(Default)]
pub struct RecordingRefresher {
    results: Mutex<VecDeque<Result<Credential, RefreshError>>>,
    requested: Mutex<Vec<String>>,
}

impl RecordingRefresher {
    pub fn new(results: Vec<Result<Credential, RefreshError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Names of the handles refreshed so far
    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialRefresher for RecordingRefresher {
    async fn refresh(&self, handle: &SessionHandle) -> Result<Credential, RefreshError> {
        self.requested.lock().unwrap().push(handle.name.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(RefreshError::NoWebAppData("nothing scripted".into())))
    }
}
