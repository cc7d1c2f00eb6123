//! The distribution engine: sequences the collaborators and the state
//! components into one settlement, and fronts every administrative
//! operation.
//!
//! Every mutating call runs under a single engine-wide lock, so
//! operations are applied in one global order. A collaborator that calls
//! back into the engine while a call is in progress is rejected with
//! [`RewardError::ReentrantSettlement`].

use crate::access::{AccessController, PauseSwitch};
use crate::calculator::{RewardBreakdown, RewardCalculator};
use crate::config_store::ConfigStore;
use crate::error::{Result, RewardError};
use crate::events::{EngineEvent, ServiceRole, SettlementReceipt, EVENT_CHANNEL_CAPACITY};
use crate::history::FarmerHistoryTracker;
use crate::ledger::{Reservation, SubmissionLedger};
use crate::services::{ServiceDirectory, VerificationService};
use crate::settings::{EngineSettings, ServiceAddresses};
use crate::storage::{load_global_state, GlobalState, RewardStorage};
use crate::transaction::UnitOfWork;
use chrono::Utc;
use harvest_types::{
    Checkpoint, ConfigHistoryEntry, ContributorId, FarmerHistory, ImpactMetrics, RewardConfig,
    ServiceAddress, SubmissionId, SubmissionRecord, TokenAmount, VerifiedSubmission,
    MAX_QUALITY_SCORE,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

tokio::task_local! {
    static IN_ENGINE_CALL: ();
}

/// Scalar reward parameters changed by `set_config`. The tier list is
/// managed separately by `set_tier_multipliers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardParameters {
    pub base_rate: u64,
    pub carbon_multiplier: u64,
    pub water_multiplier: u64,
    pub yield_multiplier: u64,
    pub quality_threshold: u8,
}

pub struct DistributionEngine {
    storage: Arc<dyn RewardStorage>,
    directory: Arc<dyn ServiceDirectory>,
    access: AccessController,
    pause: PauseSwitch,
    config_store: ConfigStore,
    ledger: SubmissionLedger,
    farmers: FarmerHistoryTracker,
    max_stake_multiplier: u64,
    write_lock: Mutex<()>,
    events: broadcast::Sender<EngineEvent>,
}

impl DistributionEngine {
    /// Open the engine over `storage`. Empty storage is initialised from
    /// `settings` (owner, reward config, collaborator addresses); storage
    /// that already holds engine globals is resumed untouched.
    pub async fn new(
        storage: Arc<dyn RewardStorage>,
        directory: Arc<dyn ServiceDirectory>,
        settings: &EngineSettings,
    ) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| RewardError::ConfigUpdateFailed(e.to_string()))?;
        let owner = settings
            .owner()
            .map_err(|e| RewardError::ConfigUpdateFailed(e.to_string()))?;
        let services = settings
            .service_addresses()
            .map_err(|e| RewardError::ConfigUpdateFailed(e.to_string()))?;

        let access = AccessController::new(storage.clone());
        let pause = PauseSwitch::new(storage.clone(), access.clone());
        let config_store = ConfigStore::new(storage.clone(), access.clone());
        let ledger = SubmissionLedger::new(storage.clone());
        let farmers = FarmerHistoryTracker::new(storage.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        match storage.get_global_state().await? {
            None => {
                let mut uow = UnitOfWork::open(storage.as_ref()).await?;
                uow.stage_global(GlobalState {
                    owner,
                    paused: false,
                    total_rewards_distributed: TokenAmount::ZERO,
                    verification_service: services.verification,
                    staking_service: services.staking,
                    token_service: services.token,
                });
                config_store.stage_genesis(settings.reward.clone(), owner, &mut uow)?;
                let checkpoint = uow.commit(storage.as_ref()).await?;
                info!(
                    owner = %owner,
                    checkpoint = checkpoint.value(),
                    "🌱 Distribution engine initialised"
                );
            }
            Some(global) => {
                info!(
                    owner = %global.owner,
                    paused = global.paused,
                    total = global.total_rewards_distributed.units(),
                    checkpoint = storage.get_checkpoint().await?.value(),
                    "🔄 Distribution engine resumed from storage"
                );
            }
        }

        Ok(Self {
            storage,
            directory,
            access,
            pause,
            config_store,
            ledger,
            farmers,
            max_stake_multiplier: settings.engine.max_stake_multiplier,
            write_lock: Mutex::new(()),
            events,
        })
    }

    /// Settle one submission and return the amount paid.
    pub async fn settle(
        &self,
        submission_id: SubmissionId,
        caller: &ContributorId,
    ) -> Result<TokenAmount> {
        Ok(self
            .settle_with_receipt(submission_id, caller)
            .await?
            .amount)
    }

    pub async fn settle_with_receipt(
        &self,
        submission_id: SubmissionId,
        caller: &ContributorId,
    ) -> Result<SettlementReceipt> {
        let result = self
            .exclusive(self.run_settlement(submission_id, caller))
            .await;
        if let Err(e) = &result {
            warn!(
                submission = %submission_id,
                caller = %caller,
                error = %e,
                "❌ Settlement rejected"
            );
        }
        result
    }

    async fn run_settlement(
        &self,
        submission_id: SubmissionId,
        caller: &ContributorId,
    ) -> Result<SettlementReceipt> {
        if self.pause.is_paused().await? {
            return Err(RewardError::Paused);
        }
        let global = load_global_state(self.storage.as_ref()).await?;

        let verifier = self
            .directory
            .verification(&global.verification_service)
            .ok_or_else(|| RewardError::InvalidSubmission {
                submission: submission_id,
                reason: format!("no verification service at {}", global.verification_service),
            })?;
        let verified = self.fetch_verified(verifier.as_ref(), submission_id).await?;

        let reservation = self.ledger.try_reserve(submission_id).await?;

        let config = self.config_store.get().await?;
        if verified.quality_score < config.quality_threshold {
            return Err(RewardError::DataNotVerified {
                quality_score: verified.quality_score,
                threshold: config.quality_threshold,
            });
        }

        let stake_multiplier = self
            .fetch_stake_multiplier(&global.staking_service, &verified.contributor_id)
            .await?;

        let breakdown = RewardCalculator::breakdown(
            verified.quality_score,
            &verified.impact_metrics,
            stake_multiplier,
            &config,
        )?;
        let amount = breakdown.amount;
        if amount.is_zero() {
            return Err(RewardError::ZeroReward(submission_id));
        }

        let new_total = global
            .total_rewards_distributed
            .checked_add(amount)
            .ok_or_else(|| {
                RewardError::InvalidAmount(format!(
                    "total distributed would overflow adding {}",
                    amount
                ))
            })?;

        self.mint(&global.token_service, submission_id, amount, &verified.contributor_id)
            .await?;

        let checkpoint = match self
            .record_settlement(&reservation, global, verified.contributor_id, amount, new_total)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                error!(
                    submission = %submission_id,
                    contributor = %verified.contributor_id,
                    amount = amount.units(),
                    error = %e,
                    "💥 Mint succeeded but settlement could not be recorded"
                );
                self.flag_unrecorded_mint(submission_id).await;
                return Err(e);
            }
        };
        drop(reservation);

        let notice_delivered = self.deliver_notice(verifier.as_ref(), submission_id).await;

        let receipt = SettlementReceipt {
            submission_id,
            contributor_id: verified.contributor_id,
            amount,
            checkpoint,
            quality_score: verified.quality_score,
            tier_index: breakdown.tier_index,
            stake_multiplier,
            notice_delivered,
            settled_at: Utc::now(),
        };
        info!(
            submission = %submission_id,
            contributor = %receipt.contributor_id,
            caller = %caller,
            amount = amount.units(),
            tier = receipt.tier_index,
            stake = stake_multiplier,
            checkpoint = checkpoint.value(),
            total = new_total.units(),
            "💰 Reward distributed"
        );
        self.publish(EngineEvent::RewardDistributed(receipt.clone()));
        Ok(receipt)
    }

    /// Record a minted settlement. The mint cannot be undone, so the
    /// ledger entry, totals and the queued verification notice land in
    /// one group.
    async fn record_settlement(
        &self,
        reservation: &Reservation,
        mut global: GlobalState,
        contributor: ContributorId,
        amount: TokenAmount,
        new_total: TokenAmount,
    ) -> Result<Checkpoint> {
        let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
        self.ledger.commit(reservation, amount, &mut uow)?;
        global.total_rewards_distributed = new_total;
        uow.stage_global(global);
        self.farmers.record(&mut uow, contributor, amount).await?;
        uow.stage_notice(reservation.submission_id());
        uow.commit(self.storage.as_ref()).await
    }

    /// Queue the notice for a mint whose settlement was not recorded. The
    /// queued notice keeps the id from being settled, and minted, again.
    async fn flag_unrecorded_mint(&self, submission_id: SubmissionId) {
        match self.storage.add_pending_notice(submission_id).await {
            Ok(()) => {
                warn!(
                    submission = %submission_id,
                    "⚠️ Unrecorded mint queued for reconciliation"
                );
            }
            Err(e) => {
                error!(
                    submission = %submission_id,
                    error = %e,
                    "💥 Unrecorded mint could not be queued"
                );
            }
        }
    }

    async fn fetch_verified(
        &self,
        verifier: &dyn VerificationService,
        submission_id: SubmissionId,
    ) -> Result<VerifiedSubmission> {
        let verified = verifier
            .get_verified_data(&submission_id)
            .await
            .map_err(|e| RewardError::InvalidSubmission {
                submission: submission_id,
                reason: format!("verification lookup failed: {:#}", e),
            })?;
        verified
            .validate(&submission_id)
            .map_err(|reason| RewardError::InvalidSubmission {
                submission: submission_id,
                reason,
            })?;
        debug!(
            submission = %submission_id,
            quality = verified.quality_score,
            contributor = %verified.contributor_id,
            "🔍 Verified submission fetched"
        );
        Ok(verified)
    }

    async fn fetch_stake_multiplier(
        &self,
        address: &ServiceAddress,
        contributor: &ContributorId,
    ) -> Result<u64> {
        let staking = self.directory.staking(address).ok_or_else(|| {
            RewardError::InvalidMultiplier(format!("no staking service at {}", address))
        })?;
        let multiplier = staking
            .get_stake_multiplier(contributor)
            .await
            .map_err(|e| RewardError::InvalidMultiplier(format!("stake lookup failed: {:#}", e)))?;
        if multiplier > self.max_stake_multiplier {
            return Err(RewardError::InvalidMultiplier(format!(
                "{} exceeds maximum {}",
                multiplier, self.max_stake_multiplier
            )));
        }
        Ok(multiplier)
    }

    async fn mint(
        &self,
        address: &ServiceAddress,
        submission_id: SubmissionId,
        amount: TokenAmount,
        recipient: &ContributorId,
    ) -> Result<()> {
        let failed = |reason: String| RewardError::TokenTransferFailed {
            submission: submission_id,
            reason,
        };
        let token = self
            .directory
            .token(address)
            .ok_or_else(|| failed(format!("no token service at {}", address)))?;
        match token.mint(amount, recipient).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(failed("mint declined".to_string())),
            Err(e) => Err(failed(format!("mint failed: {:#}", e))),
        }
    }

    /// Send the settlement notice and clear it from the pending set once
    /// acknowledged. Returns whether it was acknowledged.
    async fn deliver_notice(
        &self,
        verifier: &dyn VerificationService,
        submission_id: SubmissionId,
    ) -> bool {
        match verifier.mark_rewarded(&submission_id).await {
            Ok(true) => {
                let mut uow = match UnitOfWork::open(self.storage.as_ref()).await {
                    Ok(uow) => uow,
                    Err(e) => {
                        warn!(
                            submission = %submission_id,
                            error = %e,
                            "⚠️ Could not clear settlement notice"
                        );
                        return false;
                    }
                };
                uow.clear_notice(submission_id);
                if let Err(e) = uow.commit(self.storage.as_ref()).await {
                    warn!(
                        submission = %submission_id,
                        error = %e,
                        "⚠️ Could not clear settlement notice"
                    );
                    return false;
                }
                true
            }
            Ok(false) => {
                warn!(
                    submission = %submission_id,
                    "⚠️ Verification service declined settlement notice"
                );
                false
            }
            Err(e) => {
                warn!(submission = %submission_id, error = %e, "⚠️ Settlement notice failed");
                false
            }
        }
    }

    /// Re-send every queued settlement notice. Returns how many were
    /// acknowledged and cleared.
    pub async fn retry_pending_notices(&self, caller: &ContributorId) -> Result<usize> {
        self.exclusive(async {
            self.access.require_owner(caller).await?;
            let pending = self.storage.get_pending_notices().await?;
            if pending.is_empty() {
                return Ok(0);
            }

            let global = load_global_state(self.storage.as_ref()).await?;
            let Some(verifier) = self.directory.verification(&global.verification_service)
            else {
                warn!(
                    address = %global.verification_service,
                    pending = pending.len(),
                    "⚠️ No verification service to deliver notices to"
                );
                return Ok(0);
            };

            let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
            let mut delivered = 0;
            for submission_id in &pending {
                if !self.ledger.is_rewarded(*submission_id).await? {
                    warn!(
                        submission = %submission_id,
                        "⚠️ Notice kept for a mint with no recorded settlement"
                    );
                    continue;
                }
                match verifier.mark_rewarded(submission_id).await {
                    Ok(true) => {
                        uow.clear_notice(*submission_id);
                        delivered += 1;
                    }
                    Ok(false) => {
                        debug!(submission = %submission_id, "Notice still declined");
                    }
                    Err(e) => {
                        debug!(submission = %submission_id, error = %e, "Notice still failing");
                    }
                }
            }
            uow.commit(self.storage.as_ref()).await?;

            info!(
                delivered,
                remaining = pending.len() - delivered,
                "📨 Pending settlement notices retried"
            );
            Ok(delivered)
        })
        .await
    }

    pub async fn set_config(
        &self,
        params: RewardParameters,
        caller: &ContributorId,
    ) -> Result<ConfigHistoryEntry> {
        self.exclusive(async {
            self.access.require_owner(caller).await?;
            let current = self.config_store.get().await?;
            let config = RewardConfig {
                base_rate: params.base_rate,
                carbon_multiplier: params.carbon_multiplier,
                water_multiplier: params.water_multiplier,
                yield_multiplier: params.yield_multiplier,
                quality_threshold: params.quality_threshold,
                tier_multipliers: current.tier_multipliers,
            };
            let entry = self.config_store.set(config, caller).await?;
            self.publish(EngineEvent::ConfigUpdated(entry.clone()));
            Ok(entry)
        })
        .await
    }

    pub async fn set_tier_multipliers(
        &self,
        tiers: &[u64],
        caller: &ContributorId,
    ) -> Result<ConfigHistoryEntry> {
        self.exclusive(async {
            let entry = self.config_store.set_tiers(tiers, caller).await?;
            self.publish(EngineEvent::TierMultipliersUpdated(entry.clone()));
            Ok(entry)
        })
        .await
    }

    pub async fn pause(&self, caller: &ContributorId) -> Result<Checkpoint> {
        self.set_paused(true, caller).await
    }

    pub async fn unpause(&self, caller: &ContributorId) -> Result<Checkpoint> {
        self.set_paused(false, caller).await
    }

    async fn set_paused(&self, paused: bool, caller: &ContributorId) -> Result<Checkpoint> {
        self.exclusive(async {
            let was_paused = self.pause.is_paused().await?;
            let checkpoint = self.pause.set(paused, caller).await?;
            if was_paused != paused {
                self.publish(EngineEvent::PauseChanged { paused, checkpoint });
            }
            Ok(checkpoint)
        })
        .await
    }

    pub async fn set_verification_service(
        &self,
        address: ServiceAddress,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.repoint(ServiceRole::Verification, address, caller).await
    }

    pub async fn set_staking_service(
        &self,
        address: ServiceAddress,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.repoint(ServiceRole::Staking, address, caller).await
    }

    pub async fn set_token_service(
        &self,
        address: ServiceAddress,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.repoint(ServiceRole::Token, address, caller).await
    }

    async fn repoint(
        &self,
        role: ServiceRole,
        address: ServiceAddress,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.exclusive(async {
            self.access.require_owner(caller).await?;
            if address.is_zero() {
                return Err(RewardError::ConfigUpdateFailed(format!(
                    "{:?} service address cannot be zero",
                    role
                )));
            }

            let mut global = load_global_state(self.storage.as_ref()).await?;
            let slot = match role {
                ServiceRole::Verification => &mut global.verification_service,
                ServiceRole::Staking => &mut global.staking_service,
                ServiceRole::Token => &mut global.token_service,
            };
            let previous = std::mem::replace(slot, address);

            let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
            uow.stage_global(global);
            let checkpoint = uow.commit(self.storage.as_ref()).await?;

            info!(
                role = ?role,
                previous = %previous,
                address = %address,
                checkpoint = checkpoint.value(),
                "🔀 Collaborator repointed"
            );
            self.publish(EngineEvent::ServiceRepointed {
                role,
                address,
                checkpoint,
            });
            Ok(checkpoint)
        })
        .await
    }

    pub async fn transfer_ownership(
        &self,
        new_owner: ContributorId,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.exclusive(async {
            let previous = self.access.owner().await?;
            let checkpoint = self.access.transfer_ownership(new_owner, caller).await?;
            self.publish(EngineEvent::OwnershipTransferred {
                previous,
                new_owner,
                checkpoint,
            });
            Ok(checkpoint)
        })
        .await
    }

    /// Evaluate the reward formula against the current config without
    /// contacting any collaborator or touching state.
    pub async fn preview_reward(
        &self,
        quality_score: u8,
        metrics: &ImpactMetrics,
        stake_multiplier: u64,
    ) -> Result<RewardBreakdown> {
        if quality_score > MAX_QUALITY_SCORE {
            return Err(RewardError::InvalidQualityScore(quality_score));
        }
        if stake_multiplier > self.max_stake_multiplier {
            return Err(RewardError::InvalidMultiplier(format!(
                "{} exceeds maximum {}",
                stake_multiplier, self.max_stake_multiplier
            )));
        }
        let config = self.config_store.get().await?;
        RewardCalculator::breakdown(quality_score, metrics, stake_multiplier, &config)
    }

    pub async fn get_config(&self) -> Result<RewardConfig> {
        self.config_store.get().await
    }

    pub async fn get_total_distributed(&self) -> Result<TokenAmount> {
        Ok(load_global_state(self.storage.as_ref())
            .await?
            .total_rewards_distributed)
    }

    pub async fn get_submission_record(
        &self,
        submission_id: SubmissionId,
    ) -> Result<SubmissionRecord> {
        self.ledger.get(submission_id).await
    }

    pub async fn get_farmer_history(&self, contributor: ContributorId) -> Result<FarmerHistory> {
        self.farmers.get(contributor).await
    }

    pub async fn get_config_history(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<Option<ConfigHistoryEntry>> {
        self.config_store.history(checkpoint).await
    }

    pub async fn config_history_range(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> Result<Vec<ConfigHistoryEntry>> {
        self.config_store.history_range(from, to).await
    }

    pub async fn is_paused(&self) -> Result<bool> {
        self.pause.is_paused().await
    }

    pub async fn get_owner(&self) -> Result<ContributorId> {
        self.access.owner().await
    }

    pub async fn current_checkpoint(&self) -> Result<Checkpoint> {
        self.storage.get_checkpoint().await
    }

    pub async fn pending_notices(&self) -> Result<Vec<SubmissionId>> {
        self.storage.get_pending_notices().await
    }

    pub async fn service_addresses(&self) -> Result<ServiceAddresses> {
        let global = load_global_state(self.storage.as_ref()).await?;
        Ok(ServiceAddresses {
            verification: global.verification_service,
            staking: global.staking_service,
            token: global.token_service,
        })
    }

    pub fn max_stake_multiplier(&self) -> u64 {
        self.max_stake_multiplier
    }

    /// Subscribe to committed state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run a mutating operation under the engine lock, rejecting calls
    /// made from inside another engine call on the same task.
    async fn exclusive<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if IN_ENGINE_CALL.try_with(|_| ()).is_ok() {
            warn!("🚫 Reentrant engine call rejected");
            return Err(RewardError::ReentrantSettlement);
        }
        let _guard = self.write_lock.lock().await;
        IN_ENGINE_CALL.scope((), op).await
    }
}
