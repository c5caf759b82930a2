//! Radio CLI configuration

use serde::{Deserialize, Serialize};

use crate::error::CliError;

/// Highest accepted `txpwrlimit` value
pub const TX_POWER_LIMIT_MAX: u8 = 44;

/// Longest firmware version string read from the RCP
pub const MAX_VERSION_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// The RCP expresses manufacturing tx power in half-dBm steps
    pub tx_power_half_dbm: bool,
    pub tx_power_limit_max: u8,
    pub max_version_len: usize,
    /// Start with manufacturing commands enabled
    pub mfg_enabled: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_power_half_dbm: false,
            tx_power_limit_max: TX_POWER_LIMIT_MAX,
            max_version_len: MAX_VERSION_LEN,
            mfg_enabled: false,
        }
    }
}

impl RadioConfig {
    pub fn from_json(json: &str) -> Result<Self, CliError> {
        let config: Self = serde_json::from_str(json).map_err(|e| CliError::Config(e.to_string()))?;
        if config.tx_power_limit_max == 0 {
            return Err(CliError::Config("tx_power_limit_max must be at least 1".into()));
        }
        Ok(config)
    }
}
