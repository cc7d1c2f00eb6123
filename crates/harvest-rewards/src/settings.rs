//! Deployment settings loaded from TOML, with environment overrides.

use anyhow::{bail, Context, Result};
use harvest_types::{ContributorId, RewardConfig, ServiceAddress, MAX_QUALITY_SCORE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Stake multipliers above this percentage are rejected unless
/// configured otherwise.
pub const DEFAULT_MAX_STAKE_MULTIPLIER: u64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub engine: EngineSection,
    pub reward: RewardConfig,
    pub services: ServiceSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Hex identity of the initial owner.
    pub owner: String,
    pub max_stake_multiplier: u64,
}

/// Collaborator addresses: 32-byte hex, or a plain name hashed into an
/// address with `ServiceAddress::from_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    pub verification: String,
    pub staking: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    /// `pretty`, `compact` or `json`
    pub format: String,
    #[serde(default)]
    pub module_filters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_output: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            module_filters: HashMap::new(),
            file_output: None,
        }
    }
}

/// Resolved collaborator addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAddresses {
    pub verification: ServiceAddress,
    pub staking: ServiceAddress,
    pub token: ServiceAddress,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            engine: EngineSection {
                owner: ContributorId::from_bytes([0xAA; 32]).to_hex(),
                max_stake_multiplier: DEFAULT_MAX_STAKE_MULTIPLIER,
            },
            reward: RewardConfig::default(),
            services: ServiceSettings {
                verification: "verification".to_string(),
                staking: "staking".to_string(),
                token: "token".to_string(),
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let settings: Self = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(owner) = env::var("HARVEST_OWNER") {
            if !owner.is_empty() {
                self.engine.owner = owner;
            }
        }
        if let Ok(max) = env::var("HARVEST_MAX_STAKE_MULTIPLIER") {
            if let Ok(max) = max.parse() {
                self.engine.max_stake_multiplier = max;
            }
        }
        if let Ok(threshold) = env::var("HARVEST_QUALITY_THRESHOLD") {
            if let Ok(threshold) = threshold.parse() {
                self.reward.quality_threshold = threshold;
            }
        }
        if let Ok(base) = env::var("HARVEST_BASE_RATE") {
            if let Ok(base) = base.parse() {
                self.reward.base_rate = base;
            }
        }
        if let Ok(level) = env::var("HARVEST_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("HARVEST_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reward.quality_threshold > MAX_QUALITY_SCORE {
            bail!(
                "quality_threshold {} exceeds {}",
                self.reward.quality_threshold,
                MAX_QUALITY_SCORE
            );
        }
        if self.engine.max_stake_multiplier == 0 {
            bail!("max_stake_multiplier must be positive");
        }
        if self.owner()?.is_zero() {
            bail!("owner cannot be the zero identity");
        }
        let services = self.service_addresses()?;
        for (role, address) in [
            ("verification", services.verification),
            ("staking", services.staking),
            ("token", services.token),
        ] {
            if address.is_zero() {
                bail!("{} service address cannot be zero", role);
            }
        }
        Ok(())
    }

    pub fn owner(&self) -> Result<ContributorId> {
        ContributorId::from_hex(&self.engine.owner)
            .with_context(|| format!("invalid owner identity {:?}", self.engine.owner))
    }

    pub fn service_addresses(&self) -> Result<ServiceAddresses> {
        Ok(ServiceAddresses {
            verification: parse_service(&self.services.verification)?,
            staking: parse_service(&self.services.staking)?,
            token: parse_service(&self.services.token)?,
        })
    }
}

fn parse_service(value: &str) -> Result<ServiceAddress> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(ServiceAddress::from_hex(raw)?);
    }
    if value.trim().is_empty() {
        bail!("empty service address");
    }
    Ok(ServiceAddress::from_name(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.engine.max_stake_multiplier, 200);
        assert_eq!(
            settings.service_addresses().unwrap().staking,
            ServiceAddress::from_name("staking")
        );
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("harvest.toml");

        let mut settings = EngineSettings::default();
        settings.reward.tier_multipliers = [90, 140, 210];
        settings.services.token = ServiceAddress::from_bytes([0x11; 32]).to_hex();
        settings.save_to_file(&path).unwrap();

        let loaded = EngineSettings::from_file(&path).unwrap();
        assert_eq!(loaded.reward, settings.reward);
        assert_eq!(
            loaded.service_addresses().unwrap().token,
            ServiceAddress::from_bytes([0x11; 32])
        );
    }

    #[test]
    fn test_parses_handwritten_toml() {
        let settings: EngineSettings = toml::from_str(
            r#"
            [engine]
            owner = "0x0101010101010101010101010101010101010101010101010101010101010101"
            max_stake_multiplier = 300

            [reward]
            base_rate = 1000000
            carbon_multiplier = 5
            water_multiplier = 3
            yield_multiplier = 2
            quality_threshold = 60
            tier_multipliers = [100, 125, 150]

            [services]
            verification = "verifier-v2"
            staking = "staking"
            token = "token"
            "#,
        )
        .unwrap();

        settings.validate().unwrap();
        assert_eq!(settings.owner().unwrap(), ContributorId::from_bytes([1; 32]));
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.reward.tier_multipliers, [100, 125, 150]);
    }

    #[test]
    fn test_tier_list_must_have_three_entries() {
        let result: std::result::Result<EngineSettings, _> = toml::from_str(
            r#"
            [engine]
            owner = "aa"
            max_stake_multiplier = 200

            [reward]
            base_rate = 1
            carbon_multiplier = 1
            water_multiplier = 1
            yield_multiplier = 1
            quality_threshold = 1
            tier_multipliers = [100, 150]

            [services]
            verification = "v"
            staking = "s"
            token = "t"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = EngineSettings::default();
        settings.reward.quality_threshold = 120;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.engine.max_stake_multiplier = 0;
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.engine.owner = ContributorId::ZERO.to_hex();
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.engine.owner = "not-hex".to_string();
        assert!(settings.validate().is_err());
    }
}
