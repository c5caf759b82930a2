use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings buffer would exceed {max} bytes")]
    NoBufs { max: usize },

    #[error("settings key {0:#06x} not found")]
    NotFound(u16),

    #[error("record {0:#06x} not found")]
    MissingRecord(u16),

    #[error("record {id:#06x} is {len} bytes, buffer holds {capacity}")]
    Oversized { id: u16, len: usize, capacity: usize },

    #[error("record id range exhausted after {0:#06x}")]
    IdRange(u16),

    #[error("settings buffer busy")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
