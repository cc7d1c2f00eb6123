use crate::error::Result;
use crate::storage::RewardStorage;
use crate::transaction::UnitOfWork;
use harvest_types::{ContributorId, FarmerHistory, TokenAmount};
use std::sync::Arc;

/// Per-contributor lifetime totals.
#[derive(Clone)]
pub struct FarmerHistoryTracker {
    storage: Arc<dyn RewardStorage>,
}

impl FarmerHistoryTracker {
    pub fn new(storage: Arc<dyn RewardStorage>) -> Self {
        Self { storage }
    }

    /// Contributors never paid read as all-zero history.
    pub async fn get(&self, contributor: ContributorId) -> Result<FarmerHistory> {
        Ok(self
            .storage
            .get_farmer_history(contributor)
            .await?
            .unwrap_or_else(|| FarmerHistory::empty(contributor)))
    }

    /// Stage one paid submission. Only the settlement path calls this,
    /// after the mint has gone through.
    pub(crate) async fn record(
        &self,
        uow: &mut UnitOfWork,
        contributor: ContributorId,
        amount: TokenAmount,
    ) -> Result<FarmerHistory> {
        let current = match uow.staged_farmer(&contributor) {
            Some(staged) => staged.clone(),
            None => self.get(contributor).await?,
        };
        let updated = current.credited(amount, uow.checkpoint());
        uow.stage_farmer(updated.clone());
        Ok(updated)
    }
}
