//! Core types for the Racer bot

use crate::error::CredentialError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Daily check-in task id in the Racer task list
pub const CHECK_IN_TASK_ID: u32 = 4;

/// Opaque per-account authorization token.
///
/// In practice this is the Telegram web-app init data query string
/// (`query_id=..&user=..&auth_date=..&hash=..`) that the game expects in the
/// `X-Telegram-Init-Data` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the account this token belongs to
    pub fn decode(&self) -> Result<AccountIdentity, CredentialError> {
        let raw = self
            .0
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "user")
            .map(|(_, value)| value)
            .ok_or(CredentialError::MissingUser)?;

        // The user JSON is percent-encoded once inside the query string, and
        // tokens copied from a browser are sometimes encoded twice.
        let mut candidate = percent_decode(raw);
        let user = match serde_json::from_str::<WebAppUser>(&candidate) {
            Ok(user) => user,
            Err(first) => {
                candidate = percent_decode(&candidate);
                serde_json::from_str::<WebAppUser>(&candidate)
                    .map_err(|_| CredentialError::InvalidUser(first.to_string()))?
            }
        };

        let user_name = user
            .username
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| user.id.to_string());

        Ok(AccountIdentity {
            user_id: user.id,
            user_name,
        })
    }
}

impl fmt::Display for Credential {
    /// Tokens are secrets; only show a short prefix
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "{}…", prefix)
    }
}

fn percent_decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

#[derive(Debug, Deserialize)]
struct WebAppUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

/// Remote account identity decoded from a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub user_id: i64,
    pub user_name: String,
}

/// A registered messaging session that can mint replacement credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub name: String,
    pub path: PathBuf,
}

impl SessionHandle {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Purchasable in-game boosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoostKind {
    /// Refills chances when they run out
    Refuel,
    /// Capacity upgrade
    FuelTank,
    /// Rate upgrade
    Turbo,
}

impl BoostKind {
    pub fn id(self) -> u32 {
        match self {
            BoostKind::Refuel => 1,
            BoostKind::FuelTank => 2,
            BoostKind::Turbo => 3,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(BoostKind::Refuel),
            2 => Some(BoostKind::FuelTank),
            3 => Some(BoostKind::Turbo),
            _ => None,
        }
    }
}

impl fmt::Display for BoostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoostKind::Refuel => write!(f, "Reload Fuel Tank"),
            BoostKind::FuelTank => write!(f, "Fuel Tank"),
            BoostKind::Turbo => write!(f, "Turbo Charger"),
        }
    }
}

/// Current level and price of one boost
#[derive(Debug, Clone, PartialEq)]
pub struct BoostState {
    pub id: u32,
    pub name: String,
    pub current_stage: u32,
    pub total_stage: u32,
    pub point_cost: Decimal,
}

impl BoostState {
    pub fn is_maxed(&self) -> bool {
        self.current_stage >= self.total_stage
    }

    /// Upgrade gate: not at max stage and strictly more points than the cost
    pub fn can_purchase(&self, balance: Decimal) -> bool {
        !self.is_maxed() && balance > self.point_cost
    }
}

/// Find a boost by kind in a freshly fetched list
pub fn find_boost(boosts: &[BoostState], kind: BoostKind) -> Option<&BoostState> {
    boosts.iter().find(|b| b.id == kind.id())
}

/// One entry of the daily task list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTask {
    pub id: u32,
    /// 0 = unclaimed
    pub state: i32,
}

impl DailyTask {
    pub fn is_claimable(&self) -> bool {
        self.state == 0
    }
}

/// Direction of a price prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    Buy,
    Sell,
}

impl Prediction {
    /// Sell iff the price dropped between samples. An unchanged price counts
    /// as Buy because the game has no "flat" outcome.
    pub fn from_samples(first: Decimal, second: Decimal) -> Self {
        if first > second {
            Prediction::Sell
        } else {
            Prediction::Buy
        }
    }

    /// Value of the `predict` field on the assess endpoint
    pub fn wire_value(self) -> u8 {
        match self {
            Prediction::Sell => 0,
            Prediction::Buy => 1,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Buy => write!(f, "Buy"),
            Prediction::Sell => write!(f, "Sell"),
        }
    }
}

/// Settlement of a submitted prediction, as returned by the game
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub won: bool,
    pub base_point: Decimal,
    pub multiplier: Decimal,
    pub balance_points: Decimal,
    pub prev_price: Decimal,
    pub current_price: Decimal,
    pub num_chance: i64,
}

/// One bet outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub predicted: Prediction,
    pub won: bool,
    pub multiplier: Decimal,
    pub base_points: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub remaining_chances: i64,
}

impl RoundResult {
    pub fn from_assessment(predicted: Prediction, balance_before: Decimal, a: &Assessment) -> Self {
        Self {
            predicted,
            won: a.won,
            multiplier: a.multiplier,
            base_points: a.base_point,
            balance_before,
            balance_after: a.balance_points,
            remaining_chances: a.num_chance,
        }
    }

    /// Points at stake in this round
    pub fn points(&self) -> Decimal {
        self.base_points * self.multiplier
    }

    /// Points won (positive) or lost (negative)
    pub fn profit_delta(&self) -> Decimal {
        if self.won {
            self.points()
        } else {
            -self.points()
        }
    }

    pub fn has_chances_left(&self) -> bool {
        self.remaining_chances > 0
    }
}
