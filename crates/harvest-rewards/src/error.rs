use harvest_types::{ContributorId, SubmissionId, TypesError};
use thiserror::Error;

/// Reward engine result type
pub type Result<T> = std::result::Result<T, RewardError>;

/// Every failure the engine reports. All of them are recoverable by the
/// caller; a failed operation leaves no state behind.
#[derive(Debug, Error)]
pub enum RewardError {
    #[error("Not authorized: {caller} is not the owner")]
    NotAuthorized { caller: ContributorId },

    #[error("Invalid submission {submission}: {reason}")]
    InvalidSubmission {
        submission: SubmissionId,
        reason: String,
    },

    #[error("Submission already rewarded: {0}")]
    AlreadyRewarded(SubmissionId),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Config update failed: {0}")]
    ConfigUpdateFailed(String),

    #[error("Distribution is paused")]
    Paused,

    #[error("Invalid stake multiplier: {0}")]
    InvalidMultiplier(String),

    #[error("Token transfer failed for {submission}: {reason}")]
    TokenTransferFailed {
        submission: SubmissionId,
        reason: String,
    },

    #[error("Data not verified: quality {quality_score} below threshold {threshold}")]
    DataNotVerified { quality_score: u8, threshold: u8 },

    #[error("Invalid quality score: {0}")]
    InvalidQualityScore(u8),

    #[error("Computed reward is zero for {0}")]
    ZeroReward(SubmissionId),

    #[error("Reentrant call into the distribution engine")]
    ReentrantSettlement,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<TypesError> for RewardError {
    fn from(e: TypesError) -> Self {
        Self::ConfigUpdateFailed(e.to_string())
    }
}
