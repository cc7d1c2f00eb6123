//! Reward formula.
//!
//! ```text
//! subtotal = base + carbon*carbon_mul + water*water_mul + yield*yield_mul
//! tiered   = subtotal * tier_multipliers[quality / 34] / 100
//! final    = tiered * stake_multiplier / 100
//! amount   = final / MICRO_UNIT
//! ```
//!
//! Every division truncates and no remainder is carried into the next
//! step. With `MICRO_UNIT = 10^6` and the default parameters most
//! realistic inputs truncate to zero; the arithmetic is kept exactly as
//! documented and the caller rejects zero results.

use crate::error::{Result, RewardError};
use harvest_types::{
    ImpactMetrics, RewardConfig, TokenAmount, MAX_QUALITY_SCORE, MICRO_UNIT, PERCENT_DENOMINATOR,
    TIER_WIDTH,
};
use serde::{Deserialize, Serialize};

/// Intermediate values of one evaluation, in micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub subtotal: u128,
    pub tier_index: usize,
    pub tier_multiplier: u64,
    pub tiered: u128,
    pub final_micro: u128,
    pub amount: TokenAmount,
}

/// Stateless reward calculator.
pub struct RewardCalculator;

impl RewardCalculator {
    /// Quality tier for a score: 0..=33 -> 0, 34..=67 -> 1, 68..=100 -> 2.
    pub fn tier_index(quality_score: u8) -> Result<usize> {
        if quality_score > MAX_QUALITY_SCORE {
            return Err(RewardError::InvalidQualityScore(quality_score));
        }
        Ok((quality_score / TIER_WIDTH) as usize)
    }

    pub fn compute(
        quality_score: u8,
        metrics: &ImpactMetrics,
        stake_multiplier: u64,
        config: &RewardConfig,
    ) -> Result<TokenAmount> {
        Self::breakdown(quality_score, metrics, stake_multiplier, config).map(|b| b.amount)
    }

    pub fn breakdown(
        quality_score: u8,
        metrics: &ImpactMetrics,
        stake_multiplier: u64,
        config: &RewardConfig,
    ) -> Result<RewardBreakdown> {
        let tier_index = Self::tier_index(quality_score)?;
        let tier_multiplier = *config
            .tier_multipliers
            .get(tier_index)
            .ok_or(RewardError::InvalidQualityScore(quality_score))?;

        let subtotal = [
            (metrics.carbon_sequestered, config.carbon_multiplier),
            (metrics.water_saved, config.water_multiplier),
            (metrics.yield_increase, config.yield_multiplier),
        ]
        .iter()
        .try_fold(config.base_rate as u128, |acc, &(quantity, multiplier)| {
            acc.checked_add(quantity as u128 * multiplier as u128)
        })
        .ok_or_else(|| overflow("subtotal"))?;

        let tiered = subtotal
            .checked_mul(tier_multiplier as u128)
            .ok_or_else(|| overflow("tier multiplier"))?
            / PERCENT_DENOMINATOR as u128;

        let final_micro = tiered
            .checked_mul(stake_multiplier as u128)
            .ok_or_else(|| overflow("stake multiplier"))?
            / PERCENT_DENOMINATOR as u128;

        let units = u64::try_from(final_micro / MICRO_UNIT as u128)
            .map_err(|_| overflow("settlement amount"))?;

        Ok(RewardBreakdown {
            subtotal,
            tier_index,
            tier_multiplier,
            tiered,
            final_micro,
            amount: TokenAmount::new(units),
        })
    }
}

fn overflow(step: &str) -> RewardError {
    RewardError::InvalidAmount(format!("reward arithmetic overflow at {}", step))
}
