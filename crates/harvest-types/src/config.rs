use crate::amount::Checkpoint;
use crate::error::{Result, TypesError};
use crate::id::ContributorId;
use serde::{Deserialize, Serialize};

/// Number of quality tiers.
pub const TIER_COUNT: usize = 3;

/// Width of one quality tier: `tier = quality_score / TIER_WIDTH`.
pub const TIER_WIDTH: u8 = 34;

/// Highest valid quality score.
pub const MAX_QUALITY_SCORE: u8 = 100;

/// Multipliers are percentages; 100 means "unchanged".
pub const PERCENT_DENOMINATOR: u64 = 100;

/// Reward parameters. Multipliers apply per unit of the matching impact
/// metric; tier multipliers are percentages indexed by quality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    pub base_rate: u64,
    pub carbon_multiplier: u64,
    pub water_multiplier: u64,
    pub yield_multiplier: u64,
    pub quality_threshold: u8,
    pub tier_multipliers: [u64; TIER_COUNT],
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_rate: 100,
            carbon_multiplier: 50,
            water_multiplier: 30,
            yield_multiplier: 20,
            quality_threshold: 50,
            tier_multipliers: [100, 150, 200],
        }
    }
}

impl RewardConfig {
    /// Build the fixed tier array from a caller-supplied list.
    pub fn tiers_from_slice(tiers: &[u64]) -> Result<[u64; TIER_COUNT]> {
        tiers
            .try_into()
            .map_err(|_| TypesError::InvalidTierCount {
                expected: TIER_COUNT,
                actual: tiers.len(),
            })
    }
}

/// What an audit history entry recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigChangeKind {
    /// Deployment defaults written when the engine is first created.
    Genesis,
    /// Base rate, metric multipliers and threshold replaced.
    Parameters,
    /// Only the tier multipliers replaced.
    TierMultipliers,
}

/// Immutable snapshot of the reward configuration at the checkpoint where
/// it took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHistoryEntry {
    pub checkpoint: Checkpoint,
    pub config: RewardConfig,
    pub changed_by: ContributorId,
    pub kind: ConfigChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_from_slice() {
        assert_eq!(
            RewardConfig::tiers_from_slice(&[100, 120, 140]).unwrap(),
            [100, 120, 140]
        );

        let err = RewardConfig::tiers_from_slice(&[100, 120]).unwrap_err();
        assert!(matches!(
            err,
            TypesError::InvalidTierCount {
                expected: 3,
                actual: 2
            }
        ));
        assert!(RewardConfig::tiers_from_slice(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_tier_width_covers_score_range() {
        assert_eq!((MAX_QUALITY_SCORE / TIER_WIDTH) as usize, TIER_COUNT - 1);
    }
}
