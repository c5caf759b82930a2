//! Error types for the radio CLI

use thiserror::Error;

/// Failures reported by the RCP link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("RCP did not respond")]
    Timeout,

    #[error("RCP rejected property {prop:#06x}")]
    Rejected { prop: u32 },

    #[error("RCP response truncated")]
    Truncated,

    #[error("RCP link failure: {0}")]
    Link(String),
}

/// Result of a radio CLI command
#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid arguments")]
    InvalidArgs,

    #[error("command failed")]
    Failed,

    #[error("command not implemented")]
    NotImplemented,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to write command output")]
    Output(#[from] std::fmt::Error),

    #[error("invalid radio configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
