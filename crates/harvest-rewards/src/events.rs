use chrono::{DateTime, Utc};
use harvest_types::{
    Checkpoint, ConfigHistoryEntry, ContributorId, ServiceAddress, SubmissionId, TokenAmount,
};
use serde::{Deserialize, Serialize};

/// Maximum number of buffered events per subscriber before the oldest are
/// dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one successful settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub submission_id: SubmissionId,
    pub contributor_id: ContributorId,
    pub amount: TokenAmount,
    pub checkpoint: Checkpoint,
    pub quality_score: u8,
    pub tier_index: usize,
    pub stake_multiplier: u64,
    /// Whether the verification service acknowledged the settlement. When
    /// false the notice stays queued for `retry_pending_notices`.
    pub notice_delivered: bool,
    pub settled_at: DateTime<Utc>,
}

/// Collaborator role whose address was changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRole {
    Verification,
    Staking,
    Token,
}

/// Committed state changes, published after the storage transaction
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    RewardDistributed(SettlementReceipt),
    ConfigUpdated(ConfigHistoryEntry),
    TierMultipliersUpdated(ConfigHistoryEntry),
    PauseChanged {
        paused: bool,
        checkpoint: Checkpoint,
    },
    OwnershipTransferred {
        previous: ContributorId,
        new_owner: ContributorId,
        checkpoint: Checkpoint,
    },
    ServiceRepointed {
        role: ServiceRole,
        address: ServiceAddress,
        checkpoint: Checkpoint,
    },
}
