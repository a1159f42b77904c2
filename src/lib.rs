//! OKX Racer Bot Library
//!
//! Cycles a pool of Telegram web-app credentials through the OKX Racer
//! mini-game:
//!
//! 1. **Account workflow**: claim the daily check-in, optionally upgrade the
//!    fuel tank and turbo charger, then predict the BTC price direction until
//!    the account is out of chances and refuels.
//!
//! 2. **Credential rotation**: dead credentials are dropped from the store and
//!    re-minted from the messaging session bound to their slot.
//!
//! Progress is aggregated and pushed to an operator chat at a throttled rate.

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod refresher;
pub mod services;
pub mod stats;
pub mod store;
pub mod telegram;
pub mod types;
pub mod workflow;

#[cfg(test)]
mod test_support;

pub use client::{GameApi, RacerClient};
pub use clock::{Clock, SystemClock};
pub use config::{Config, RacerApi, Timings};
pub use error::{CredentialError, RefreshError, RemoteApiError, StorageError, WorkflowError};
pub use orchestrator::{Orchestrator, PassSummary};
pub use refresher::{CredentialRefresher, HelperRefresher, SessionDirectory, SessionHelper, SessionRegistrar};
pub use stats::{Stats, StatsEvent, StatsReporter, StatusChannel};
pub use store::CredentialStore;
pub use telegram::{CommandListener, TelegramBot};
pub use types::{BoostKind, Credential, Prediction, SessionHandle};
pub use workflow::{AccountWorkflow, UpgradeOptions, WorkflowOutcome};
