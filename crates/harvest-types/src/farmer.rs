use crate::amount::{Checkpoint, TokenAmount};
use crate::id::ContributorId;
use serde::{Deserialize, Serialize};

/// Running totals for one contributor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmerHistory {
    pub contributor_id: ContributorId,
    pub total_rewards: TokenAmount,
    pub last_claim_checkpoint: Checkpoint,
    pub submission_count: u64,
}

impl FarmerHistory {
    pub fn empty(contributor_id: ContributorId) -> Self {
        Self {
            contributor_id,
            total_rewards: TokenAmount::ZERO,
            last_claim_checkpoint: Checkpoint::GENESIS,
            submission_count: 0,
        }
    }

    /// Fold one paid submission into the totals. Saturates rather than
    /// wrapping so totals never decrease.
    pub fn credited(&self, amount: TokenAmount, checkpoint: Checkpoint) -> Self {
        Self {
            contributor_id: self.contributor_id,
            total_rewards: self.total_rewards.saturating_add(amount),
            last_claim_checkpoint: checkpoint.max(self.last_claim_checkpoint),
            submission_count: self.submission_count.saturating_add(1),
        }
    }
}
