//! `radio` CLI commands for the RCP: independent reset, EUI-64, TX power
//! limit, CCA configuration, firmware version and manufacturing tests.

pub mod args;
pub mod cli;
pub mod config;
pub mod error;
pub mod mfg;
pub mod transport;

pub use cli::{COMMANDS, RadioCli};
pub use config::RadioConfig;
pub use error::{CliError, TransportError};
pub use transport::{CcaConfig, RadioTransport};
