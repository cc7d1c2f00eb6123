use crate::amount::{Checkpoint, TokenAmount};
use crate::config::MAX_QUALITY_SCORE;
use crate::id::{ContributorId, SubmissionId};
use serde::{Deserialize, Serialize};

/// Environmental impact attributed to a submission by the verification
/// service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactMetrics {
    pub carbon_sequestered: u64,
    pub water_saved: u64,
    pub yield_increase: u64,
}

/// Verified facts about a submission, fetched fresh on every settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSubmission {
    pub submission_id: SubmissionId,
    pub quality_score: u8,
    pub impact_metrics: ImpactMetrics,
    pub contributor_id: ContributorId,
}

impl VerifiedSubmission {
    /// Structural checks only; whether the score clears the configured
    /// threshold is decided by the engine.
    pub fn validate(&self, requested: &SubmissionId) -> Result<(), String> {
        if &self.submission_id != requested {
            return Err(format!(
                "verification returned {} for request {}",
                self.submission_id, requested
            ));
        }
        if self.quality_score > MAX_QUALITY_SCORE {
            return Err(format!(
                "quality score {} exceeds {}",
                self.quality_score, MAX_QUALITY_SCORE
            ));
        }
        if self.contributor_id.is_zero() {
            return Err("submission has no contributor".to_string());
        }
        Ok(())
    }
}

/// Ledger entry for one submission. Once `rewarded` is set the record
/// never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: SubmissionId,
    pub rewarded: bool,
    pub amount: TokenAmount,
    pub checkpoint: Checkpoint,
}

impl SubmissionRecord {
    /// Record returned for ids the ledger has never paid.
    pub fn unpaid(submission_id: SubmissionId) -> Self {
        Self {
            submission_id,
            rewarded: false,
            amount: TokenAmount::ZERO,
            checkpoint: Checkpoint::GENESIS,
        }
    }
}
