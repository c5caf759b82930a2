//! Deferred record saves drained from the RTOS idle hook
//!
//! Writers queue a save instead of touching flash; the idle hook writes the
//! queued records out a few at a time. Records larger than one flash page
//! are split over consecutive record ids.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, SettingsError};
use crate::ram_buffer::{RamBuffer, SharedRamBuffer};
use crate::store::RecordStore;

pub const QUEUE_CAPACITY: usize = 16;

/// Flash page minus the segment header
pub const PAGE_SIZE: usize = 4096 - 256;

struct Entry {
    id: u16,
    buffer: SharedRamBuffer,
}

pub struct IdleSaveQueue {
    store: Arc<dyn RecordStore>,
    queue: Mutex<VecDeque<Entry>>,
}

fn page_id(id: u16, page: usize) -> Result<u16> {
    u16::try_from(page)
        .ok()
        .and_then(|p| id.checked_add(p))
        .ok_or(SettingsError::IdRange(id))
}

/// Write `buffer` as pages at `id`, `id + 1`, ...
fn save_pages(store: &dyn RecordStore, id: u16, buffer: &RamBuffer) -> Result<()> {
    let data = buffer.as_bytes();
    if data.is_empty() {
        return store.save(id, &[]);
    }
    for (page, chunk) in data.chunks(PAGE_SIZE).enumerate() {
        store.save(page_id(id, page)?, chunk)?;
    }
    Ok(())
}

impl IdleSaveQueue {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            queue: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Ids waiting to be saved, oldest first
    pub fn pending(&self) -> Vec<u16> {
        self.queue.lock().iter().map(|e| e.id).collect()
    }

    /// Queue a save of `buffer` under `id`
    ///
    /// A second request for an id already queued is dropped. When the queue
    /// is full the oldest entry is written out synchronously first; if that
    /// entry's buffer is locked, the queue is left as it was and `Busy` is
    /// returned.
    pub fn queue_save(&self, id: u16, buffer: &SharedRamBuffer) -> Result<()> {
        let evicted = {
            let mut queue = self.queue.lock();
            if queue.iter().any(|e| e.id == id) {
                trace!(id, "Save already queued");
                return Ok(());
            }
            let evicted = if queue.len() >= QUEUE_CAPACITY {
                queue.pop_front()
            } else {
                None
            };
            queue.push_back(Entry {
                id,
                buffer: Arc::clone(buffer),
            });
            evicted
        };

        let Some(oldest) = evicted else {
            return Ok(());
        };
        debug!(id = oldest.id, "Save queue full, saving oldest entry now");
        let saved = oldest
            .buffer
            .try_lock()
            .map(|buffer| save_pages(self.store.as_ref(), oldest.id, &buffer));
        match saved {
            Some(result) => result.inspect_err(|e| {
                warn!(id = oldest.id, error = %e, "Synchronous save failed");
            }),
            None => {
                debug!(id = oldest.id, "Oldest entry busy, not queueing");
                self.restore(oldest, id);
                Err(SettingsError::Busy)
            }
        }
    }

    /// Undo an eviction: put `oldest` back in front and withdraw `id`
    fn restore(&self, oldest: Entry, id: u16) {
        let mut queue = self.queue.lock();
        queue.retain(|e| e.id != id);
        queue.push_front(oldest);
    }

    /// Save `buffer` under `id` right away, bypassing the queue
    pub fn save_now(&self, id: u16, buffer: &SharedRamBuffer) -> Result<()> {
        save_pages(self.store.as_ref(), id, &buffer.lock())
    }

    /// Idle hook: write out at most `writes_allowed` queued records
    ///
    /// A record whose buffer is busy or whose save fails goes back on the
    /// queue. Returns the number of records saved.
    pub fn run_idle(&self, writes_allowed: u8) -> usize {
        let budget = usize::from(writes_allowed).min(QUEUE_CAPACITY);
        let mut saved = 0;

        for _ in 0..budget {
            let Some(entry) = self.queue.lock().pop_front() else {
                break;
            };
            match self.try_save(&entry) {
                Ok(()) => saved += 1,
                Err(e) => {
                    debug!(id = entry.id, error = %e, "Deferred save failed, requeueing");
                    self.requeue(entry);
                }
            }
        }
        saved
    }

    fn try_save(&self, entry: &Entry) -> Result<()> {
        let buffer = entry.buffer.try_lock().ok_or(SettingsError::Busy)?;
        save_pages(self.store.as_ref(), entry.id, &buffer)
    }

    fn requeue(&self, entry: Entry) {
        let mut queue = self.queue.lock();
        if queue.iter().any(|e| e.id == entry.id) {
            return;
        }
        if queue.len() >= QUEUE_CAPACITY {
            warn!(id = entry.id, "Save queue full, dropping deferred save");
            return;
        }
        queue.push_back(entry);
    }
}
