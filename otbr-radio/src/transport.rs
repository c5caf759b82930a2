//! Vendor property access over the RCP link

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// First vendor property id
pub const PROP_VENDOR_BEGIN: u32 = 0x3C00;
/// First vendor command id
pub const CMD_VENDOR_BEGIN: u32 = 0x3C00;

/// Independent-reset mode (0 disabled, 1 out-of-band, 2 in-band)
pub const PROP_IR_CONFIG: u32 = PROP_VENDOR_BEGIN + 0x100;
pub const PROP_IR_CMD: u32 = PROP_VENDOR_BEGIN + 0x101;
pub const PROP_SET_EUI64: u32 = PROP_VENDOR_BEGIN + 0x10A;
pub const PROP_TX_POWER_LIMIT: u32 = PROP_VENDOR_BEGIN + 0x10B;
pub const PROP_CCA_CONFIG: u32 = PROP_VENDOR_BEGIN + 0x10C;
pub const PROP_FW_VERSION: u32 = PROP_VENDOR_BEGIN + 0x10D;
/// Manufacturing test command
pub const CMD_MFG: u32 = CMD_VENDOR_BEGIN + 0x3FF;

/// 802.15.4 clear-channel-assessment configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CcaConfig {
    /// 1..=4, or 0xFF for no CCA
    pub mode: u8,
    pub cca1_threshold: u8,
    pub cca2_corr_threshold: u8,
    /// 0..=6
    pub cca2_min_corr: u8,
}

pub const CCA_MODE_NONE: u8 = 0xFF;

impl CcaConfig {
    pub fn is_valid(&self) -> bool {
        (matches!(self.mode, 1..=4) || self.mode == CCA_MODE_NONE) && self.cca2_min_corr <= 6
    }
}

/// Property and command access to the radio co-processor
pub trait RadioTransport {
    fn set_prop_u8(&mut self, prop: u32, value: u8) -> Result<(), TransportError>;

    fn get_prop_u8(&mut self, prop: u32) -> Result<u8, TransportError>;

    fn set_prop_u64(&mut self, prop: u32, value: u64) -> Result<(), TransportError>;

    /// Read a string property of at most `max_len` bytes
    fn get_prop_string(&mut self, prop: u32, max_len: usize) -> Result<String, TransportError>;

    fn get_cca_config(&mut self, prop: u32) -> Result<CcaConfig, TransportError>;

    fn set_cca_config(&mut self, prop: u32, config: &CcaConfig) -> Result<(), TransportError>;

    /// Exchange a manufacturing frame in place; returns the response length
    fn mfg_command(&mut self, cmd: u32, frame: &mut [u8]) -> Result<usize, TransportError>;

    /// Independent reset of the RCP
    fn reset_rcp(&mut self) -> Result<(), TransportError>;
}
