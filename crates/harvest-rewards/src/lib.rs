pub mod access;
pub mod calculator;
pub mod config_store;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod ledger;
pub mod logging;
pub mod services;
pub mod settings;
pub mod storage;
pub mod transaction;

pub use access::{AccessController, PauseSwitch};
pub use calculator::{RewardBreakdown, RewardCalculator};
pub use config_store::ConfigStore;
pub use engine::{DistributionEngine, RewardParameters};
pub use error::{Result, RewardError};
pub use events::{EngineEvent, ServiceRole, SettlementReceipt};
pub use history::FarmerHistoryTracker;
pub use ledger::{Reservation, SubmissionLedger};
pub use logging::init_logging;
pub use services::{
    ServiceDirectory, StakingService, StaticDirectory, TokenService, VerificationService,
};
pub use settings::{EngineSettings, LoggingSettings, ServiceAddresses};
pub use storage::{GlobalState, MemoryStorage, RewardStorage, WriteBatch};
pub use transaction::UnitOfWork;
