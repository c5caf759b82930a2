//! Border-router configuration

use serde::{Deserialize, Serialize};

use crate::error::BorderRouterError;
use crate::netif::DEFAULT_ADDRESS_SLOTS;
use crate::pbuf::{DEFAULT_SEGMENT_COUNT, DEFAULT_SEGMENT_SIZE};

/// Physical (infra) interface to bring up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InfraConfig {
    Ethernet { mac: [u8; 6] },
    Wifi { ssid: String, password: String },
    /// No physical interface; border routing stays disabled
    None,
}

/// Single or multiple mesh stack instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceMode {
    #[default]
    Single,
    Multiple,
}

/// How to wait for the mesh to learn the infra link's on-link prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PrefixWait {
    /// Poll without sleeping until a prefix is available
    #[default]
    Spin,
    /// Poll with exponential backoff, giving up after `attempts`
    Backoff {
        attempts: u32,
        initial_ms: u64,
        max_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorderRouterConfig {
    pub infra: InfraConfig,
    /// IPv6 address slots per local interface, slot 0 included
    pub address_slots: usize,
    pub instance_mode: InstanceMode,
    pub diagnostics: bool,
    pub cli: bool,
    pub mdns_proxy: bool,
    pub prefix_wait: PrefixWait,
    pub pool_segment_size: usize,
    pub pool_segment_count: usize,
    pub inbound_queue_depth: usize,
    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for BorderRouterConfig {
    fn default() -> Self {
        Self {
            infra: InfraConfig::None,
            address_slots: DEFAULT_ADDRESS_SLOTS,
            instance_mode: InstanceMode::Single,
            diagnostics: false,
            cli: true,
            mdns_proxy: true,
            prefix_wait: PrefixWait::Spin,
            pool_segment_size: DEFAULT_SEGMENT_SIZE,
            pool_segment_count: DEFAULT_SEGMENT_COUNT,
            inbound_queue_depth: 64,
            log_filter: "info".to_string(),
        }
    }
}

impl BorderRouterConfig {
    pub fn from_json(json: &str) -> Result<Self, BorderRouterError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BorderRouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BorderRouterError> {
        if self.address_slots < 2 {
            return Err(BorderRouterError::Config(format!(
                "address_slots must be at least 2 (link-local plus one static), got {}",
                self.address_slots
            )));
        }
        if self.pool_segment_size == 0 {
            return Err(BorderRouterError::Config("pool_segment_size must be non-zero".into()));
        }
        if self.inbound_queue_depth == 0 {
            return Err(BorderRouterError::Config("inbound_queue_depth must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config = BorderRouterConfig::from_json("{}").unwrap();
        assert_eq!(config, BorderRouterConfig::default());
        assert_eq!(config.address_slots, 6);
    }

    #[test]
    fn test_parse_ethernet_with_backoff() {
        let config = BorderRouterConfig::from_json(
            r#"{
                "infra": { "kind": "ethernet", "mac": [2, 0, 0, 0, 0, 1] },
                "prefix_wait": { "mode": "backoff", "attempts": 10, "initial_ms": 5, "max_ms": 100 },
                "instance_mode": "multiple",
                "diagnostics": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.infra, InfraConfig::Ethernet { mac: [2, 0, 0, 0, 0, 1] });
        assert_eq!(
            config.prefix_wait,
            PrefixWait::Backoff {
                attempts: 10,
                initial_ms: 5,
                max_ms: 100
            }
        );
        assert_eq!(config.instance_mode, InstanceMode::Multiple);
        assert!(config.diagnostics);
    }

    #[test]
    fn test_rejects_single_slot_table() {
        let err = BorderRouterConfig::from_json(r#"{ "address_slots": 1 }"#).unwrap_err();
        assert!(matches!(err, BorderRouterError::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_infra_kind() {
        assert!(BorderRouterConfig::from_json(r#"{ "infra": { "kind": "serial" } }"#).is_err());
    }
}
