//! Exactly-once record of paid submissions.
//!
//! A settlement first reserves the submission id, which fails if the id is
//! already paid or another settlement holds it, then stages the paid
//! record into the settlement's unit of work. The reservation is released
//! when the guard drops, whether or not the unit of work was committed.
//! An id whose settlement notice is still queued is never reserved again.

use crate::error::{Result, RewardError};
use crate::storage::RewardStorage;
use crate::transaction::UnitOfWork;
use harvest_types::{SubmissionId, SubmissionRecord, TokenAmount};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SubmissionLedger {
    storage: Arc<dyn RewardStorage>,
    in_flight: Arc<Mutex<HashSet<SubmissionId>>>,
}

/// Exclusive claim on a submission id for the duration of one settlement.
#[derive(Debug)]
pub struct Reservation {
    submission_id: SubmissionId,
    in_flight: Arc<Mutex<HashSet<SubmissionId>>>,
}

impl Reservation {
    pub fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.submission_id);
    }
}

impl SubmissionLedger {
    pub fn new(storage: Arc<dyn RewardStorage>) -> Self {
        Self {
            storage,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Ids never paid read as an unpaid zero record.
    pub async fn get(&self, submission_id: SubmissionId) -> Result<SubmissionRecord> {
        Ok(self
            .storage
            .get_submission_record(submission_id)
            .await?
            .unwrap_or_else(|| SubmissionRecord::unpaid(submission_id)))
    }

    pub async fn is_rewarded(&self, submission_id: SubmissionId) -> Result<bool> {
        Ok(self.get(submission_id).await?.rewarded)
    }

    pub async fn try_reserve(&self, submission_id: SubmissionId) -> Result<Reservation> {
        if self.is_rewarded(submission_id).await? {
            debug!(submission = %submission_id, "Submission already paid");
            return Err(RewardError::AlreadyRewarded(submission_id));
        }

        // A queued notice without a paid record means the mint went through
        // but recording it failed.
        if self.storage.is_notice_pending(submission_id).await? {
            warn!(submission = %submission_id, "⚠️ Submission minted but unrecorded");
            return Err(RewardError::AlreadyRewarded(submission_id));
        }

        if !lock(&self.in_flight).insert(submission_id) {
            debug!(submission = %submission_id, "Submission settlement in flight");
            return Err(RewardError::AlreadyRewarded(submission_id));
        }

        Ok(Reservation {
            submission_id,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Stage the paid record at the unit of work's checkpoint.
    pub fn commit(
        &self,
        reservation: &Reservation,
        amount: TokenAmount,
        uow: &mut UnitOfWork,
    ) -> Result<SubmissionRecord> {
        let submission_id = reservation.submission_id();
        if uow.staged_record(&submission_id).is_some() {
            return Err(RewardError::AlreadyRewarded(submission_id));
        }

        let record = SubmissionRecord {
            submission_id,
            rewarded: true,
            amount,
            checkpoint: uow.checkpoint(),
        };
        uow.stage_record(record.clone());
        Ok(record)
    }
}

fn lock(set: &Mutex<HashSet<SubmissionId>>) -> MutexGuard<'_, HashSet<SubmissionId>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}
