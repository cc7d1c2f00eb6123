//! Capability interfaces of the external collaborators and the directory
//! that resolves their addresses.

use async_trait::async_trait;
use harvest_types::{ContributorId, ServiceAddress, SubmissionId, TokenAmount, VerifiedSubmission};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Source of verified submission facts.
#[async_trait]
pub trait VerificationService: Send + Sync {
    async fn get_verified_data(
        &self,
        submission_id: &SubmissionId,
    ) -> anyhow::Result<VerifiedSubmission>;

    /// Tell the verification service a submission has been paid.
    /// `Ok(false)` means the service declined the notice.
    async fn mark_rewarded(&self, submission_id: &SubmissionId) -> anyhow::Result<bool>;
}

/// Source of per-contributor stake multipliers (percentages).
#[async_trait]
pub trait StakingService: Send + Sync {
    async fn get_stake_multiplier(&self, contributor: &ContributorId) -> anyhow::Result<u64>;
}

/// Reward token issuer. `Ok(false)` means the mint was declined.
#[async_trait]
pub trait TokenService: Send + Sync {
    async fn mint(&self, amount: TokenAmount, recipient: &ContributorId) -> anyhow::Result<bool>;
}

/// Resolves collaborator addresses to live service handles.
pub trait ServiceDirectory: Send + Sync {
    fn verification(&self, address: &ServiceAddress) -> Option<Arc<dyn VerificationService>>;
    fn staking(&self, address: &ServiceAddress) -> Option<Arc<dyn StakingService>>;
    fn token(&self, address: &ServiceAddress) -> Option<Arc<dyn TokenService>>;
}

type Registry<T> = RwLock<HashMap<ServiceAddress, Arc<T>>>;

/// In-process directory of registered service handles.
#[derive(Default)]
pub struct StaticDirectory {
    verification: Registry<dyn VerificationService>,
    staking: Registry<dyn StakingService>,
    token: Registry<dyn TokenService>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_verification(
        &self,
        address: ServiceAddress,
        service: Arc<dyn VerificationService>,
    ) {
        write(&self.verification).insert(address, service);
    }

    pub fn register_staking(&self, address: ServiceAddress, service: Arc<dyn StakingService>) {
        write(&self.staking).insert(address, service);
    }

    pub fn register_token(&self, address: ServiceAddress, service: Arc<dyn TokenService>) {
        write(&self.token).insert(address, service);
    }
}

impl ServiceDirectory for StaticDirectory {
    fn verification(&self, address: &ServiceAddress) -> Option<Arc<dyn VerificationService>> {
        read(&self.verification).get(address).cloned()
    }

    fn staking(&self, address: &ServiceAddress) -> Option<Arc<dyn StakingService>> {
        read(&self.staking).get(address).cloned()
    }

    fn token(&self, address: &ServiceAddress) -> Option<Arc<dyn TokenService>> {
        read(&self.token).get(address).cloned()
    }
}

// A poisoned registry still holds a consistent map: inserts are single
// operations.
fn read<T: ?Sized>(
    registry: &Registry<T>,
) -> std::sync::RwLockReadGuard<'_, HashMap<ServiceAddress, Arc<T>>> {
    registry.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T: ?Sized>(
    registry: &Registry<T>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<ServiceAddress, Arc<T>>> {
    registry.write().unwrap_or_else(|e| e.into_inner())
}
