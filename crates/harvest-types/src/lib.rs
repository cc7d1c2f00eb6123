pub mod amount;
pub mod config;
pub mod error;
pub mod farmer;
pub mod id;
pub mod submission;

pub use amount::{Checkpoint, TokenAmount, MICRO_UNIT};
pub use config::{
    ConfigChangeKind, ConfigHistoryEntry, RewardConfig, MAX_QUALITY_SCORE, PERCENT_DENOMINATOR,
    TIER_COUNT, TIER_WIDTH,
};
pub use error::{Result, TypesError};
pub use farmer::FarmerHistory;
pub use id::{ContributorId, ServiceAddress, SubmissionId};
pub use submission::{ImpactMetrics, SubmissionRecord, VerifiedSubmission};
