//! Per-account workflow: daily check-in, optional upgrades, then bet until the
//! account runs out of chances.

use crate::client::GameApi;
use crate::clock::Clock;
use crate::config::Timings;
use crate::error::WorkflowError;
use crate::stats::{StatsEvent, StatsReporter};
use crate::types::{find_boost, AccountIdentity, BoostKind, BoostState, Credential, Prediction, RoundResult, CHECK_IN_TASK_ID};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which upgrades the operator opted into for this run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub fuel_tank: bool,
    pub turbo: bool,
}

/// How an account's pass ended when nothing went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// The betting loop ran until no chances or refuels were left
    Completed { rounds: u32 },
    /// An upgrade did not take effect; betting was skipped this pass
    SoftStopped { boost: BoostKind },
}

enum UpgradeGate {
    Proceed,
    Stop,
}

pub struct AccountWorkflow {
    api: Arc<dyn GameApi>,
    reporter: StatsReporter,
    clock: Arc<dyn Clock>,
    timings: Timings,
    options: UpgradeOptions,
}

impl AccountWorkflow {
    pub fn new(
        api: Arc<dyn GameApi>,
        reporter: StatsReporter,
        clock: Arc<dyn Clock>,
        timings: Timings,
        options: UpgradeOptions,
    ) -> Self {
        Self {
            api,
            reporter,
            clock,
            timings,
            options,
        }
    }

    /// Run one credential through the full workflow.
    ///
    /// Errors are account-fatal: the caller should treat the credential as
    /// dead.
    pub async fn run(&self, slot: usize, credential: &Credential) -> Result<WorkflowOutcome, WorkflowError> {
        let account = credential.decode()?;
        info!("========== Account {} | {} ==========", slot + 1, account.user_name);

        self.daily_check(credential, &account).await;

        let mut boosts = self
            .api
            .fetch_boosts(credential)
            .await
            .map_err(WorkflowError::remote("boosts"))?;
        for boost in &boosts {
            info!("{}: {}/{}", boost.name, boost.current_stage, boost.total_stage);
        }

        let upgrades = [
            (self.options.fuel_tank, BoostKind::FuelTank),
            (self.options.turbo, BoostKind::Turbo),
        ];
        for (enabled, kind) in upgrades {
            if !enabled {
                continue;
            }
            if let UpgradeGate::Stop = self.evaluate_upgrade(credential, &account, kind, &mut boosts).await? {
                return Ok(WorkflowOutcome::SoftStopped { boost: kind });
            }
        }

        let rounds = self.betting_loop(credential, &account, boosts).await?;

        self.reporter.update(StatsEvent::Activity).await;
        Ok(WorkflowOutcome::Completed { rounds })
    }

    /// Claim the check-in bonus if it is still open. Failures are recorded and
    /// never abort the account.
    async fn daily_check(&self, credential: &Credential, account: &AccountIdentity) {
        let tasks = match self.api.fetch_daily_tasks(credential).await {
            Ok(tasks) => tasks,
            Err(e) => {
                self.reporter.update(StatsEvent::error("daily check", e)).await;
                return;
            }
        };

        let Some(task) = tasks.iter().find(|t| t.id == CHECK_IN_TASK_ID) else {
            debug!("No check-in task offered for {}", account.user_name);
            return;
        };

        if !task.is_claimable() {
            self.reporter.update(StatsEvent::DailyTask { completed: false }).await;
            return;
        }

        match self.api.claim_daily_task(credential, account, task.id).await {
            Ok(()) => {
                info!("Daily check-in claimed for {}", account.user_name);
                self.reporter.update(StatsEvent::DailyTask { completed: true }).await;
            }
            Err(e) => self.reporter.update(StatsEvent::error("daily check-in", e)).await,
        }
    }

    async fn evaluate_upgrade(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        kind: BoostKind,
        boosts: &mut Vec<BoostState>,
    ) -> Result<UpgradeGate, WorkflowError> {
        let Some(before) = find_boost(boosts, kind).cloned() else {
            debug!("{} not offered", kind);
            return Ok(UpgradeGate::Proceed);
        };

        let balance = self.balance(credential, account).await?;
        if !before.can_purchase(balance) {
            warn!(
                "Not eligible to upgrade {} ({}/{}, cost {}, balance {})",
                kind, before.current_stage, before.total_stage, before.point_cost, balance
            );
            return Ok(UpgradeGate::Proceed);
        }

        let accepted = self
            .api
            .purchase_boost(credential, kind)
            .await
            .map_err(WorkflowError::remote("upgrade"))?;
        if accepted {
            info!("Upgraded {} to stage {}", kind, before.current_stage + 1);
            self.reporter.update(StatsEvent::Upgrade { boost: kind }).await;
        }

        *boosts = self
            .api
            .fetch_boosts(credential)
            .await
            .map_err(WorkflowError::remote("boosts"))?;
        let balance_after = self.balance(credential, account).await?;

        let advanced = find_boost(boosts, kind)
            .map(|after| after.current_stage > before.current_stage)
            .unwrap_or(false);
        if !advanced || balance_after < before.point_cost {
            warn!("{} upgrade did not go through, skipping account for this pass", kind);
            return Ok(UpgradeGate::Stop);
        }

        Ok(UpgradeGate::Proceed)
    }

    async fn betting_loop(
        &self,
        credential: &Credential,
        account: &AccountIdentity,
        mut boosts: Vec<BoostState>,
    ) -> Result<u32, WorkflowError> {
        let mut rounds = 0;

        loop {
            let round = self.play_round(credential, account).await?;
            rounds += 1;
            self.reporter
                .update(StatsEvent::AccountUpdate {
                    won: round.won,
                    points: round.points(),
                })
                .await;

            if round.has_chances_left() {
                self.clock.sleep(self.timings.chance_interval).await;
                continue;
            }

            let refuel_open = find_boost(&boosts, BoostKind::Refuel)
                .map(|b| !b.is_maxed())
                .unwrap_or(false);
            if !refuel_open {
                break;
            }

            let accepted = self
                .api
                .purchase_boost(credential, BoostKind::Refuel)
                .await
                .map_err(WorkflowError::remote("refuel"))?;
            if !accepted {
                info!("Refuel refused for {}", account.user_name);
                break;
            }

            info!("Refueled {}", account.user_name);
            self.reporter
                .update(StatsEvent::BoostUse {
                    boost: BoostKind::Refuel,
                })
                .await;
            self.clock.sleep(self.timings.refuel_settle).await;
            boosts = self
                .api
                .fetch_boosts(credential)
                .await
                .map_err(WorkflowError::remote("boosts"))?;
        }

        Ok(rounds)
    }

    /// Sample the reference price twice, bet on the direction and settle
    async fn play_round(&self, credential: &Credential, account: &AccountIdentity) -> Result<RoundResult, WorkflowError> {
        let first = self.reference_price().await?;
        self.clock.sleep(self.timings.sample_interval).await;
        let second = self.reference_price().await?;
        let prediction = Prediction::from_samples(first, second);

        let balance = self.balance(credential, account).await?;

        let assessment = self
            .api
            .submit_price_prediction(credential, account, prediction)
            .await
            .map_err(WorkflowError::remote("assess"))?;
        let round = RoundResult::from_assessment(prediction, balance, &assessment);

        info!(
            "Predicted {} | {} x{} | balance {} -> {} ({:+}) | old price {} | current price {}",
            round.predicted,
            if round.won { "Win" } else { "Lose" },
            round.multiplier.normalize(),
            round.balance_before,
            round.balance_after,
            round.profit_delta().normalize(),
            assessment.prev_price,
            assessment.current_price
        );

        Ok(round)
    }

    async fn balance(&self, credential: &Credential, account: &AccountIdentity) -> Result<Decimal, WorkflowError> {
        self.api
            .fetch_account_balance(credential, account)
            .await
            .map_err(WorkflowError::remote("balance"))
    }

    async fn reference_price(&self) -> Result<Decimal, WorkflowError> {
        self.api
            .fetch_reference_price()
            .await
            .map_err(WorkflowError::remote("ticker"))
    }
}
