use crate::error::{Result, RewardError};
use async_trait::async_trait;
use harvest_types::{
    Checkpoint, ConfigHistoryEntry, ContributorId, FarmerHistory, RewardConfig, ServiceAddress,
    SubmissionId, SubmissionRecord, TokenAmount,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Scalar globals: owner, pause flag, running total and collaborator
/// addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    pub owner: ContributorId,
    pub paused: bool,
    pub total_rewards_distributed: TokenAmount,
    pub verification_service: ServiceAddress,
    pub staking_service: ServiceAddress,
    pub token_service: ServiceAddress,
}

/// Every write of one unit of work. A backend applies a batch as a whole:
/// either every write lands or none does, and readers never observe part
/// of one.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub records: Vec<SubmissionRecord>,
    pub farmers: Vec<FarmerHistory>,
    pub config: Option<RewardConfig>,
    pub history: Vec<ConfigHistoryEntry>,
    pub global: Option<GlobalState>,
    pub notices_added: Vec<SubmissionId>,
    pub notices_cleared: Vec<SubmissionId>,
    /// Set when the batch changes versioned state.
    pub checkpoint: Option<Checkpoint>,
}

/// Persisted engine state. Reads of absent keys return `None`; the
/// components above decide what the default is.
///
/// The single-value writers are shorthands for a one-write batch.
#[async_trait]
pub trait RewardStorage: Send + Sync {
    /// Apply `batch` atomically and return the checkpoint the state is
    /// now at.
    async fn apply_batch(&self, batch: WriteBatch) -> Result<Checkpoint>;

    async fn get_submission_record(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>>;
    /// Fails with `AlreadyRewarded` if a rewarded record already exists
    /// for the id.
    async fn put_submission_record(&self, record: SubmissionRecord) -> Result<()> {
        self.apply_batch(WriteBatch {
            records: vec![record],
            ..WriteBatch::default()
        })
        .await
        .map(|_| ())
    }

    async fn get_farmer_history(
        &self,
        contributor: ContributorId,
    ) -> Result<Option<FarmerHistory>>;

    async fn get_reward_config(&self) -> Result<Option<RewardConfig>>;

    async fn get_config_history(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<Option<ConfigHistoryEntry>>;
    /// History is append-only: an entry for an already recorded
    /// checkpoint is rejected.
    async fn append_config_history(&self, entry: ConfigHistoryEntry) -> Result<()> {
        self.apply_batch(WriteBatch {
            history: vec![entry],
            ..WriteBatch::default()
        })
        .await
        .map(|_| ())
    }
    async fn get_config_history_range(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> Result<Vec<ConfigHistoryEntry>>;

    async fn get_global_state(&self) -> Result<Option<GlobalState>>;
    async fn put_global_state(&self, state: GlobalState) -> Result<()> {
        self.apply_batch(WriteBatch {
            global: Some(state),
            ..WriteBatch::default()
        })
        .await
        .map(|_| ())
    }

    async fn get_checkpoint(&self) -> Result<Checkpoint>;
    async fn set_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        self.apply_batch(WriteBatch {
            checkpoint: Some(checkpoint),
            ..WriteBatch::default()
        })
        .await
        .map(|_| ())
    }

    async fn get_pending_notices(&self) -> Result<Vec<SubmissionId>>;
    async fn is_notice_pending(&self, id: SubmissionId) -> Result<bool>;
    async fn add_pending_notice(&self, id: SubmissionId) -> Result<()> {
        self.apply_batch(WriteBatch {
            notices_added: vec![id],
            ..WriteBatch::default()
        })
        .await
        .map(|_| ())
    }
}

/// Load the globals written at genesis.
pub async fn load_global_state(storage: &dyn RewardStorage) -> Result<GlobalState> {
    storage
        .get_global_state()
        .await?
        .ok_or_else(|| RewardError::Storage("engine globals not initialized".to_string()))
}

#[derive(Debug, Default)]
struct Tables {
    submissions: HashMap<SubmissionId, SubmissionRecord>,
    farmers: HashMap<ContributorId, FarmerHistory>,
    config: Option<RewardConfig>,
    config_history: BTreeMap<Checkpoint, ConfigHistoryEntry>,
    global: Option<GlobalState>,
    checkpoint: Checkpoint,
    pending_notices: BTreeSet<SubmissionId>,
}

impl Tables {
    /// Reject the batch if any of its writes would fail. Nothing is
    /// touched until every write has been checked.
    fn check(&self, batch: &WriteBatch) -> Result<()> {
        let mut paid = HashSet::new();
        for record in &batch.records {
            let id = record.submission_id;
            let already = self.submissions.get(&id).is_some_and(|r| r.rewarded);
            if already || paid.contains(&id) {
                return Err(RewardError::AlreadyRewarded(id));
            }
            if record.rewarded {
                paid.insert(id);
            }
        }

        let mut appended = HashSet::new();
        for entry in &batch.history {
            if self.config_history.contains_key(&entry.checkpoint)
                || !appended.insert(entry.checkpoint)
            {
                return Err(RewardError::Storage(format!(
                    "config history already has an entry at checkpoint {}",
                    entry.checkpoint
                )));
            }
        }

        if let Some(checkpoint) = batch.checkpoint {
            if checkpoint < self.checkpoint {
                return Err(RewardError::Storage(format!(
                    "checkpoint cannot move backwards from {} to {}",
                    self.checkpoint, checkpoint
                )));
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: WriteBatch) -> Checkpoint {
        for record in batch.records {
            debug!(
                submission = %record.submission_id,
                rewarded = record.rewarded,
                amount = record.amount.units(),
                checkpoint = record.checkpoint.value(),
                storage_type = "memory",
                "💾 Submission record stored"
            );
            self.submissions.insert(record.submission_id, record);
        }
        for history in batch.farmers {
            debug!(
                contributor = %history.contributor_id,
                total_rewards = history.total_rewards.units(),
                submission_count = history.submission_count,
                storage_type = "memory",
                "💾 Farmer history stored"
            );
            self.farmers.insert(history.contributor_id, history);
        }
        if let Some(config) = batch.config {
            self.config = Some(config);
        }
        for entry in batch.history {
            self.config_history.insert(entry.checkpoint, entry);
        }
        if let Some(global) = batch.global {
            self.global = Some(global);
        }
        self.pending_notices.extend(batch.notices_added);
        for id in &batch.notices_cleared {
            self.pending_notices.remove(id);
        }
        if let Some(checkpoint) = batch.checkpoint {
            self.checkpoint = checkpoint;
        }
        self.checkpoint
    }
}

/// In-memory backend. A batch is checked and applied under one write
/// guard, so readers see either none of it or all of it.
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }
}

#[async_trait]
impl RewardStorage for MemoryStorage {
    async fn apply_batch(&self, batch: WriteBatch) -> Result<Checkpoint> {
        let mut tables = self.tables.write().await;
        if let Err(e) = tables.check(&batch) {
            info!(
                checkpoint = tables.checkpoint.value(),
                error = %e,
                storage_type = "memory",
                "❌ Write batch rejected"
            );
            return Err(e);
        }

        let writes = batch.records.len() + batch.farmers.len() + batch.history.len();
        let checkpoint = tables.apply(batch);
        debug!(
            checkpoint = checkpoint.value(),
            writes,
            storage_type = "memory",
            "✅ Write batch applied"
        );
        Ok(checkpoint)
    }

    async fn get_submission_record(&self, id: SubmissionId) -> Result<Option<SubmissionRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.submissions.get(&id).cloned())
    }

    async fn get_farmer_history(
        &self,
        contributor: ContributorId,
    ) -> Result<Option<FarmerHistory>> {
        let tables = self.tables.read().await;
        Ok(tables.farmers.get(&contributor).cloned())
    }

    async fn get_reward_config(&self) -> Result<Option<RewardConfig>> {
        let tables = self.tables.read().await;
        Ok(tables.config.clone())
    }

    async fn get_config_history(
        &self,
        checkpoint: Checkpoint,
    ) -> Result<Option<ConfigHistoryEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.config_history.get(&checkpoint).cloned())
    }

    async fn get_config_history_range(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> Result<Vec<ConfigHistoryEntry>> {
        if from > to {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .config_history
            .range(from..=to)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn get_global_state(&self) -> Result<Option<GlobalState>> {
        let tables = self.tables.read().await;
        Ok(tables.global.clone())
    }

    async fn get_checkpoint(&self) -> Result<Checkpoint> {
        let tables = self.tables.read().await;
        Ok(tables.checkpoint)
    }

    async fn get_pending_notices(&self) -> Result<Vec<SubmissionId>> {
        let tables = self.tables.read().await;
        Ok(tables.pending_notices.iter().copied().collect())
    }

    async fn is_notice_pending(&self, id: SubmissionId) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables.pending_notices.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_types::ConfigChangeKind;

    fn record(id: SubmissionId, rewarded: bool) -> SubmissionRecord {
        SubmissionRecord {
            submission_id: id,
            rewarded,
            amount: TokenAmount::new(10),
            checkpoint: Checkpoint::new(1),
        }
    }

    fn history_entry(checkpoint: u64) -> ConfigHistoryEntry {
        ConfigHistoryEntry {
            checkpoint: Checkpoint::new(checkpoint),
            config: RewardConfig::default(),
            changed_by: ContributorId::from_bytes([1; 32]),
            kind: ConfigChangeKind::Parameters,
        }
    }

    #[tokio::test]
    async fn test_rewarded_record_cannot_be_overwritten() {
        let storage = MemoryStorage::new();
        let id = SubmissionId::new(b"field-1");

        storage.put_submission_record(record(id, true)).await.unwrap();
        let err = storage
            .put_submission_record(record(id, true))
            .await
            .unwrap_err();
        assert!(matches!(err, RewardError::AlreadyRewarded(found) if found == id));
    }

    #[tokio::test]
    async fn test_config_history_is_append_only() {
        let storage = MemoryStorage::new();
        storage.append_config_history(history_entry(3)).await.unwrap();
        assert!(storage.append_config_history(history_entry(3)).await.is_err());
        assert!(storage
            .get_config_history(Checkpoint::new(4))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_config_history_range_is_ordered() {
        let storage = MemoryStorage::new();
        for cp in [7, 2, 5] {
            storage.append_config_history(history_entry(cp)).await.unwrap();
        }

        let entries = storage
            .get_config_history_range(Checkpoint::new(2), Checkpoint::new(6))
            .await
            .unwrap();
        let checkpoints: Vec<u64> = entries.iter().map(|e| e.checkpoint.value()).collect();
        assert_eq!(checkpoints, vec![2, 5]);

        assert!(storage
            .get_config_history_range(Checkpoint::new(6), Checkpoint::new(2))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let storage = MemoryStorage::new();
        storage.set_checkpoint(Checkpoint::new(5)).await.unwrap();
        assert!(storage.set_checkpoint(Checkpoint::new(4)).await.is_err());
        assert_eq!(storage.get_checkpoint().await.unwrap(), Checkpoint::new(5));
    }

    #[tokio::test]
    async fn test_rejected_batch_changes_nothing() {
        let storage = MemoryStorage::new();
        let kept = SubmissionId::new(b"kept");
        let fresh = SubmissionId::new(b"fresh");
        let farmer = ContributorId::from_bytes([2; 32]);
        storage.put_submission_record(record(kept, true)).await.unwrap();

        let batch = WriteBatch {
            records: vec![record(fresh, true), record(kept, true)],
            farmers: vec![FarmerHistory::empty(farmer)],
            history: vec![history_entry(9)],
            notices_added: vec![fresh],
            checkpoint: Some(Checkpoint::new(9)),
            ..WriteBatch::default()
        };
        let err = storage.apply_batch(batch).await.unwrap_err();
        assert!(matches!(err, RewardError::AlreadyRewarded(found) if found == kept));

        assert!(storage.get_submission_record(fresh).await.unwrap().is_none());
        assert!(storage.get_farmer_history(farmer).await.unwrap().is_none());
        assert!(storage
            .get_config_history(Checkpoint::new(9))
            .await
            .unwrap()
            .is_none());
        assert!(!storage.is_notice_pending(fresh).await.unwrap());
        assert_eq!(storage.get_checkpoint().await.unwrap(), Checkpoint::GENESIS);
    }

    #[tokio::test]
    async fn test_batch_rejects_duplicate_writes_within_itself() {
        let storage = MemoryStorage::new();
        let id = SubmissionId::new(b"twice");

        let records = WriteBatch {
            records: vec![record(id, true), record(id, true)],
            ..WriteBatch::default()
        };
        assert!(storage.apply_batch(records).await.is_err());
        assert!(storage.get_submission_record(id).await.unwrap().is_none());

        let history = WriteBatch {
            history: vec![history_entry(4), history_entry(4)],
            ..WriteBatch::default()
        };
        assert!(storage.apply_batch(history).await.is_err());
        assert!(storage
            .get_config_history(Checkpoint::new(4))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_batch_clears_notices_and_keeps_checkpoint_when_unversioned() {
        let storage = MemoryStorage::new();
        let id = SubmissionId::new(b"noticed");
        storage.set_checkpoint(Checkpoint::new(3)).await.unwrap();
        storage.add_pending_notice(id).await.unwrap();
        assert!(storage.is_notice_pending(id).await.unwrap());

        let batch = WriteBatch {
            notices_cleared: vec![id],
            ..WriteBatch::default()
        };
        assert_eq!(storage.apply_batch(batch).await.unwrap(), Checkpoint::new(3));
        assert!(storage.get_pending_notices().await.unwrap().is_empty());
    }
}
