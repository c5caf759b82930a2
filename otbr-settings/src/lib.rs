//! Persistent settings glue: RAM settings buffers backed by a flash record
//! manager, with saves deferred to the idle hook.

pub mod error;
pub mod idle_queue;
pub mod ram_buffer;
pub mod store;

pub use error::{Result, SettingsError};
pub use idle_queue::{IdleSaveQueue, PAGE_SIZE, QUEUE_CAPACITY};
pub use ram_buffer::{MAX_ALLOC, REALLOC_STEP, RamBuffer, SharedRamBuffer, acquire_buffer};
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore};
