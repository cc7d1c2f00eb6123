//! Single-owner access control and the global pause switch.

use crate::error::{Result, RewardError};
use crate::storage::{load_global_state, RewardStorage};
use crate::transaction::UnitOfWork;
use harvest_types::{Checkpoint, ContributorId};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AccessController {
    storage: Arc<dyn RewardStorage>,
}

impl AccessController {
    pub fn new(storage: Arc<dyn RewardStorage>) -> Self {
        Self { storage }
    }

    pub async fn owner(&self) -> Result<ContributorId> {
        Ok(load_global_state(self.storage.as_ref()).await?.owner)
    }

    pub async fn require_owner(&self, caller: &ContributorId) -> Result<()> {
        let owner = self.owner().await?;
        if &owner != caller {
            warn!(caller = %caller, "🚫 Rejected non-owner caller");
            return Err(RewardError::NotAuthorized { caller: *caller });
        }
        Ok(())
    }

    /// Hand ownership to `new_owner`. Effective immediately: the previous
    /// owner loses every administrative right at the returned checkpoint.
    pub async fn transfer_ownership(
        &self,
        new_owner: ContributorId,
        caller: &ContributorId,
    ) -> Result<Checkpoint> {
        self.require_owner(caller).await?;
        if new_owner.is_zero() {
            return Err(RewardError::ConfigUpdateFailed(
                "new owner cannot be the zero identity".to_string(),
            ));
        }

        let mut global = load_global_state(self.storage.as_ref()).await?;
        let previous = global.owner;
        global.owner = new_owner;

        let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
        uow.stage_global(global);
        let checkpoint = uow.commit(self.storage.as_ref()).await?;

        info!(
            previous = %previous,
            new_owner = %new_owner,
            checkpoint = checkpoint.value(),
            "🔑 Ownership transferred"
        );
        Ok(checkpoint)
    }
}

/// Global kill-switch consulted before any settlement work starts.
#[derive(Clone)]
pub struct PauseSwitch {
    storage: Arc<dyn RewardStorage>,
    access: AccessController,
}

impl PauseSwitch {
    pub fn new(storage: Arc<dyn RewardStorage>, access: AccessController) -> Self {
        Self { storage, access }
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(load_global_state(self.storage.as_ref()).await?.paused)
    }

    /// Returns the checkpoint the flag was written at, or the current one
    /// when the flag already had the requested value.
    pub async fn set(&self, paused: bool, caller: &ContributorId) -> Result<Checkpoint> {
        self.access.require_owner(caller).await?;

        let mut global = load_global_state(self.storage.as_ref()).await?;
        if global.paused == paused {
            return self.storage.get_checkpoint().await;
        }
        global.paused = paused;

        let mut uow = UnitOfWork::open(self.storage.as_ref()).await?;
        uow.stage_global(global);
        let checkpoint = uow.commit(self.storage.as_ref()).await?;

        if paused {
            warn!(checkpoint = checkpoint.value(), "⏸️ Distribution paused");
        } else {
            info!(checkpoint = checkpoint.value(), "▶️ Distribution resumed");
        }
        Ok(checkpoint)
    }
}
