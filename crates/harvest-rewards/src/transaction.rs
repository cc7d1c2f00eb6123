//! Staged state changes applied as one storage batch.
//!
//! Components never write to storage directly while an operation is in
//! flight. They stage writes into a [`UnitOfWork`], and the caller commits
//! the whole group once every external call has succeeded. Dropping a
//! unit of work without committing it is the no-op rollback path.

use crate::error::Result;
use crate::storage::{GlobalState, RewardStorage, WriteBatch};
use harvest_types::{
    Checkpoint, ConfigHistoryEntry, ContributorId, FarmerHistory, RewardConfig, SubmissionId,
    SubmissionRecord,
};
use tracing::{debug, error};

#[derive(Debug)]
pub struct UnitOfWork {
    checkpoint: Checkpoint,
    batch: WriteBatch,
}

impl UnitOfWork {
    /// Open a unit of work stamped with the checkpoint it will produce.
    pub async fn open(storage: &dyn RewardStorage) -> Result<Self> {
        let current = storage.get_checkpoint().await?;
        Ok(Self {
            checkpoint: current.next(),
            batch: WriteBatch::default(),
        })
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn stage_record(&mut self, record: SubmissionRecord) {
        self.batch.records.push(record);
    }

    pub fn staged_record(&self, id: &SubmissionId) -> Option<&SubmissionRecord> {
        self.batch.records.iter().find(|r| &r.submission_id == id)
    }

    pub fn stage_farmer(&mut self, history: FarmerHistory) {
        self.batch.farmers.retain(|h| h.contributor_id != history.contributor_id);
        self.batch.farmers.push(history);
    }

    pub fn staged_farmer(&self, contributor: &ContributorId) -> Option<&FarmerHistory> {
        self.batch.farmers.iter().find(|h| &h.contributor_id == contributor)
    }

    pub fn stage_config(&mut self, config: RewardConfig) {
        self.batch.config = Some(config);
    }

    pub fn stage_history(&mut self, entry: ConfigHistoryEntry) {
        self.batch.history.push(entry);
    }

    pub fn stage_global(&mut self, state: GlobalState) {
        self.batch.global = Some(state);
    }

    pub fn stage_notice(&mut self, id: SubmissionId) {
        self.batch.notices_added.push(id);
    }

    pub fn clear_notice(&mut self, id: SubmissionId) {
        self.batch.notices_cleared.push(id);
    }

    /// Whether committing would change versioned state. Notice
    /// bookkeeping alone does not advance the checkpoint.
    pub fn advances_checkpoint(&self) -> bool {
        !self.batch.records.is_empty()
            || !self.batch.farmers.is_empty()
            || self.batch.config.is_some()
            || !self.batch.history.is_empty()
            || self.batch.global.is_some()
    }

    /// Apply every staged write as one batch. Returns the checkpoint the
    /// state is now at.
    pub async fn commit(self, storage: &dyn RewardStorage) -> Result<Checkpoint> {
        let advance = self.advances_checkpoint();
        let mut batch = self.batch;
        if advance {
            batch.checkpoint = Some(self.checkpoint);
        }

        match storage.apply_batch(batch).await {
            Ok(checkpoint) => {
                debug!(checkpoint = checkpoint.value(), "✅ Unit of work committed");
                Ok(checkpoint)
            }
            Err(e) => {
                error!(error = %e, "❌ Unit of work failed, nothing applied");
                Err(e)
            }
        }
    }
}
