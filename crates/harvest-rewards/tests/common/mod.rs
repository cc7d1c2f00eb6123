//! Recording collaborator doubles and an engine harness shared by the
//! integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use harvest_rewards::{
    DistributionEngine, EngineSettings, GlobalState, MemoryStorage, RewardError, RewardStorage,
    StakingService, StaticDirectory, TokenService, VerificationService, WriteBatch,
};
use harvest_types::{
    Checkpoint, ConfigHistoryEntry, ContributorId, FarmerHistory, ImpactMetrics, RewardConfig,
    ServiceAddress, SubmissionId, SubmissionRecord, TokenAmount, VerifiedSubmission,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How a double answers a call that can be declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Accept,
    Decline,
    Fail,
}

#[derive(Default)]
pub struct MockVerifier {
    submissions: Mutex<HashMap<SubmissionId, VerifiedSubmission>>,
    notice_reply: Mutex<Option<Reply>>,
    pub fail_fetch: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub notice_calls: AtomicUsize,
    pub acknowledged: Mutex<Vec<SubmissionId>>,
}

impl MockVerifier {
    pub fn insert(&self, submission: VerifiedSubmission) {
        self.submissions
            .lock()
            .unwrap()
            .insert(submission.submission_id, submission);
    }

    /// Answer lookups for `key` with `submission`, whatever id it carries.
    pub fn insert_for(&self, key: SubmissionId, submission: VerifiedSubmission) {
        self.submissions.lock().unwrap().insert(key, submission);
    }

    pub fn set_notice_reply(&self, reply: Reply) {
        *self.notice_reply.lock().unwrap() = Some(reply);
    }
}

#[async_trait]
impl VerificationService for MockVerifier {
    async fn get_verified_data(
        &self,
        submission_id: &SubmissionId,
    ) -> anyhow::Result<VerifiedSubmission> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            anyhow::bail!("verification backend unavailable");
        }
        self.submissions
            .lock()
            .unwrap()
            .get(submission_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown submission {}", submission_id))
    }

    async fn mark_rewarded(&self, submission_id: &SubmissionId) -> anyhow::Result<bool> {
        self.notice_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.notice_reply.lock().unwrap().unwrap_or(Reply::Accept);
        match reply {
            Reply::Accept => {
                self.acknowledged.lock().unwrap().push(*submission_id);
                Ok(true)
            }
            Reply::Decline => Ok(false),
            Reply::Fail => anyhow::bail!("notice endpoint down"),
        }
    }
}

pub struct MockStaking {
    default_multiplier: AtomicU64,
    overrides: Mutex<HashMap<ContributorId, u64>>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl MockStaking {
    pub fn new(default_multiplier: u64) -> Self {
        Self {
            default_multiplier: AtomicU64::new(default_multiplier),
            overrides: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_default(&self, multiplier: u64) {
        self.default_multiplier.store(multiplier, Ordering::SeqCst);
    }

    pub fn set_for(&self, contributor: ContributorId, multiplier: u64) {
        self.overrides.lock().unwrap().insert(contributor, multiplier);
    }
}

#[async_trait]
impl StakingService for MockStaking {
    async fn get_stake_multiplier(&self, contributor: &ContributorId) -> anyhow::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("staking backend unavailable");
        }
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .get(contributor)
            .copied()
            .unwrap_or_else(|| self.default_multiplier.load(Ordering::SeqCst)))
    }
}

pub struct MockToken {
    reply: Mutex<Reply>,
    pub calls: AtomicUsize,
    pub minted: Mutex<Vec<(ContributorId, TokenAmount)>>,
}

impl Default for MockToken {
    fn default() -> Self {
        Self {
            reply: Mutex::new(Reply::Accept),
            calls: AtomicUsize::new(0),
            minted: Mutex::new(Vec::new()),
        }
    }
}

impl MockToken {
    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn total_minted(&self) -> u64 {
        self.minted.lock().unwrap().iter().map(|(_, a)| a.units()).sum()
    }
}

#[async_trait]
impl TokenService for MockToken {
    async fn mint(&self, amount: TokenAmount, recipient: &ContributorId) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = *self.reply.lock().unwrap();
        match reply {
            Reply::Accept => {
                self.minted.lock().unwrap().push((*recipient, amount));
                Ok(true)
            }
            Reply::Decline => Ok(false),
            Reply::Fail => anyhow::bail!("token contract reverted"),
        }
    }
}

/// Storage that can be told to fail every write carrying a submission
/// record, as a full disk would after the mint has gone through.
pub struct FaultyStorage {
    inner: Arc<MemoryStorage>,
    pub fail_settlements: AtomicBool,
}

impl FaultyStorage {
    pub fn new(inner: Arc<MemoryStorage>) -> Self {
        Self {
            inner,
            fail_settlements: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RewardStorage for FaultyStorage {
    async fn apply_batch(&self, batch: WriteBatch) -> harvest_rewards::Result<Checkpoint> {
        if self.fail_settlements.load(Ordering::SeqCst) && !batch.records.is_empty() {
            return Err(RewardError::Storage("no space left on device".to_string()));
        }
        self.inner.apply_batch(batch).await
    }

    async fn get_submission_record(
        &self,
        id: SubmissionId,
    ) -> harvest_rewards::Result<Option<SubmissionRecord>> {
        self.inner.get_submission_record(id).await
    }

    async fn get_farmer_history(
        &self,
        contributor: ContributorId,
    ) -> harvest_rewards::Result<Option<FarmerHistory>> {
        self.inner.get_farmer_history(contributor).await
    }

    async fn get_reward_config(&self) -> harvest_rewards::Result<Option<RewardConfig>> {
        self.inner.get_reward_config().await
    }

    async fn get_config_history(
        &self,
        checkpoint: Checkpoint,
    ) -> harvest_rewards::Result<Option<ConfigHistoryEntry>> {
        self.inner.get_config_history(checkpoint).await
    }

    async fn get_config_history_range(
        &self,
        from: Checkpoint,
        to: Checkpoint,
    ) -> harvest_rewards::Result<Vec<ConfigHistoryEntry>> {
        self.inner.get_config_history_range(from, to).await
    }

    async fn get_global_state(&self) -> harvest_rewards::Result<Option<GlobalState>> {
        self.inner.get_global_state().await
    }

    async fn get_checkpoint(&self) -> harvest_rewards::Result<Checkpoint> {
        self.inner.get_checkpoint().await
    }

    async fn get_pending_notices(&self) -> harvest_rewards::Result<Vec<SubmissionId>> {
        self.inner.get_pending_notices().await
    }

    async fn is_notice_pending(&self, id: SubmissionId) -> harvest_rewards::Result<bool> {
        self.inner.is_notice_pending(id).await
    }
}

pub fn owner() -> ContributorId {
    ContributorId::from_bytes([0xAA; 32])
}

pub fn stranger() -> ContributorId {
    ContributorId::from_bytes([0x66; 32])
}

pub fn farmer(n: u8) -> ContributorId {
    ContributorId::from_bytes([n; 32])
}

pub fn metrics(carbon: u64, water: u64, yield_increase: u64) -> ImpactMetrics {
    ImpactMetrics {
        carbon_sequestered: carbon,
        water_saved: water,
        yield_increase,
    }
}

/// Settings with a base rate large enough that settlements pay whole
/// units: with zero metrics and a 100% stake, tiers pay 10, 15 and 20.
pub fn paying_settings() -> EngineSettings {
    let mut settings = EngineSettings::default();
    settings.reward.base_rate = 10_000_000;
    settings
}

pub struct Harness {
    pub engine: Arc<DistributionEngine>,
    pub storage: Arc<MemoryStorage>,
    pub faults: Arc<FaultyStorage>,
    pub directory: Arc<StaticDirectory>,
    pub verifier: Arc<MockVerifier>,
    pub staking: Arc<MockStaking>,
    pub token: Arc<MockToken>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(paying_settings()).await
    }

    pub async fn with_settings(settings: EngineSettings) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let faults = Arc::new(FaultyStorage::new(storage.clone()));
        let directory = Arc::new(StaticDirectory::new());
        let verifier = Arc::new(MockVerifier::default());
        let staking = Arc::new(MockStaking::new(100));
        let token = Arc::new(MockToken::default());

        let addresses = settings.service_addresses().unwrap();
        directory.register_verification(addresses.verification, verifier.clone());
        directory.register_staking(addresses.staking, staking.clone());
        directory.register_token(addresses.token, token.clone());

        let engine = DistributionEngine::new(faults.clone(), directory.clone(), &settings)
            .await
            .unwrap();

        Self {
            engine: Arc::new(engine),
            storage,
            faults,
            directory,
            verifier,
            staking,
            token,
        }
    }

    /// Register a verified submission and return its id.
    pub fn submit(
        &self,
        label: &str,
        quality_score: u8,
        impact_metrics: ImpactMetrics,
        contributor: ContributorId,
    ) -> SubmissionId {
        let submission_id = SubmissionId::new(label.as_bytes());
        self.verifier.insert(VerifiedSubmission {
            submission_id,
            quality_score,
            impact_metrics,
            contributor_id: contributor,
        });
        submission_id
    }

    /// Calls made to any collaborator so far.
    pub fn collaborator_calls(&self) -> usize {
        self.verifier.fetch_calls.load(Ordering::SeqCst)
            + self.verifier.notice_calls.load(Ordering::SeqCst)
            + self.staking.calls.load(Ordering::SeqCst)
            + self.token.calls.load(Ordering::SeqCst)
    }
}

pub fn service(name: &str) -> ServiceAddress {
    ServiceAddress::from_name(name)
}
