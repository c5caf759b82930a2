//! Error types for the border-router network glue

use std::io;

use thiserror::Error;

use crate::mesh::MeshError;
use crate::netif::NetifId;

/// Errors reported by the local network-stack model
#[derive(Debug, Error)]
pub enum NetError {
    #[error("no free address slot on interface")]
    NoSpace,

    #[error("interface {0} not found")]
    NoInterface(NetifId),

    #[error("address slot {0} out of range")]
    InvalidSlot(usize),

    #[error("buffer allocation failed")]
    NoBuffer,

    #[error("inbound queue full, packet dropped")]
    QueueFull,

    #[error("interface {0} has no output hook")]
    NoOutput(NetifId),

    #[error("interface output failed: {0}")]
    Output(#[from] MeshError),
}

/// Errors from opening a platform socket
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("failed to open socket: {0}")]
    Open(#[source] io::Error),

    #[error("failed to bind socket to device {device}: {source}")]
    BindDevice {
        device: String,
        #[source]
        source: io::Error,
    },
}

/// Errors that abort border-router bring-up
#[derive(Debug, Error)]
pub enum BorderRouterError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("mesh stack error: {0}")]
    Mesh(#[from] MeshError),

    #[error("network stack error: {0}")]
    Net(#[from] NetError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, BorderRouterError>;
