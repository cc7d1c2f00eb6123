//! Current reward parameters plus their append-only, checkpoint-keyed
//! history.

use crate::access::AccessController;
use crate::error::{Result, RewardError};
use crate::storage::RewardStorage;
use crate::transaction::UnitOfWork;
use harvest_types::{
    Checkpoint, ConfigChangeKind, ConfigHistoryEntry, ContributorId, RewardConfig,
    MAX_QUALITY_SCORE,
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn RewardStorage>,
    access: AccessController,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn RewardStorage>, access: AccessController) -> Self {
        Self { storage, access }
    }

    pub async fn get(&self) -> Result<RewardConfig> {
        self.storage
            .get_reward_config()
            .await?
            .ok_or_else(|| RewardError::Storage("reward config not initialized".to_string()))
    }

    /// Replace the whole configuration.
    pub async fn set(
        &self,
        new_config: RewardConfig,
        caller: &ContributorId,
    ) -> Result<ConfigHistoryEntry> {
        self.access.require_owner(caller).await?;
        validate(&new_config)?;
        self.write(new_config, *caller, ConfigChangeKind::Parameters)
            .await
    }

    /// Replace only the tier multipliers. Exactly three entries are
    /// required.
    pub async fn set_tiers(
        &self,
        new_tiers: &[u64],
        caller: &ContributorId,
    ) -> Result<ConfigHistoryEntry> {
        self.access.require_owner(caller).await?;
        let tiers = RewardConfig::tiers_from_slice(new_tiers)?;

        let mut config = self.get().await?;
        config.tier_multipliers = tiers;
        self.write(config, *caller, ConfigChangeKind::TierMultipliers)
            .await
    }

    pub async fn history(&self, checkpoint: Checkpoint) -> Result<Option<ConfigHistoryEntry>> {
        debug!(checkpoint = checkpoint.value(), "🔍 Config history lookup");
        self.storage.get_config_history(checkpoint).await
    }

    pub async fn history_range(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> Result<Vec<ConfigHistoryEntry>> {
        self.storage.get_config_history_range(from, to).await
    }

    /// Stage the deployment defaults. Used once, when the engine starts on
    /// empty storage.
    pub(crate) fn stage_genesis(
        &self,
        config: RewardConfig,
        owner: ContributorId,
        uow: &mut UnitOfWork,
    ) -> Result<()> {
        validate(&config)?;
        uow.stage_history(ConfigHistoryEntry {
            checkpoint: uow.checkpoint(),
            config: config.clone(),
            changed_by: owner,
            kind: ConfigChangeKind::Genesis,
        });
        uow.stage_config(config);
        Ok(())
    }

    async fn write(
        &self,
        config: RewardConfig,
        changed_by: ContributorId,
        kind: ConfigChangeKind,
    ) -> Result<ConfigHistoryEntry> {
        let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
        let entry = ConfigHistoryEntry {
            checkpoint: uow.checkpoint(),
            config: config.clone(),
            changed_by,
            kind,
        };
        uow.stage_config(config);
        uow.stage_history(entry.clone());
        uow.commit(self.storage.as_ref()).await?;

        info!(
            checkpoint = entry.checkpoint.value(),
            kind = ?entry.kind,
            base_rate = entry.config.base_rate,
            quality_threshold = entry.config.quality_threshold,
            tiers = ?entry.config.tier_multipliers,
            "⚙️ Reward config updated"
        );
        Ok(entry)
    }
}

fn validate(config: &RewardConfig) -> Result<()> {
    if config.quality_threshold > MAX_QUALITY_SCORE {
        return Err(RewardError::ConfigUpdateFailed(format!(
            "quality threshold {} exceeds {}",
            config.quality_threshold, MAX_QUALITY_SCORE
        )));
    }
    Ok(())
}
