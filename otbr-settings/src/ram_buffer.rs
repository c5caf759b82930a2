//! RAM copy of a settings record
//!
//! The record is a sequence of settings blocks, each a 4-byte header (key
//! u16 LE, value length u16 LE) followed by the value. The buffer grows in
//! [`REALLOC_STEP`] increments and never beyond [`MAX_ALLOC`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, SettingsError};
use crate::store::RecordStore;

pub const REALLOC_STEP: usize = 512;
pub const MAX_ALLOC: usize = 8192;
pub const BLOCK_HEADER_LEN: usize = 4;

/// A buffer shared between its writer and the idle saver
pub type SharedRamBuffer = Arc<Mutex<RamBuffer>>;

#[derive(Debug, Clone)]
pub struct RamBuffer {
    id: u16,
    data: Vec<u8>,
    capacity: usize,
}

/// Round `capacity` up in [`REALLOC_STEP`] steps until it holds `needed` bytes
fn grow_to(mut capacity: usize, needed: usize) -> Result<usize> {
    while capacity < needed {
        capacity += REALLOC_STEP;
    }
    if capacity > MAX_ALLOC {
        return Err(SettingsError::NoBufs { max: MAX_ALLOC });
    }
    Ok(capacity)
}

/// Load record `id` into a new buffer of at least `initial_size` bytes
///
/// A record that cannot be read back is deleted and the buffer starts empty.
pub fn acquire_buffer(store: &dyn RecordStore, id: u16, initial_size: usize) -> Result<RamBuffer> {
    let stored = store.data_len(id);
    let capacity = grow_to(initial_size, stored.unwrap_or(0))?;

    let mut buffer = RamBuffer {
        id,
        data: Vec::with_capacity(capacity),
        capacity,
    };

    if stored.is_some() {
        buffer.data.resize(capacity, 0);
        match store.read(id, &mut buffer.data) {
            Ok(len) if len <= capacity => {
                buffer.data.truncate(len);
                debug!(id, len, capacity, "Loaded settings record");
            }
            result => {
                warn!(id, error = ?result.err(), "Settings record unreadable, deleting");
                buffer.data.clear();
                if let Err(e) = store.delete(id) {
                    warn!(id, error = %e, "Failed to delete settings record");
                }
            }
        }
    }

    Ok(buffer)
}

struct Block<'a> {
    offset: usize,
    key: u16,
    value: &'a [u8],
}

impl Block<'_> {
    fn end(&self) -> usize {
        self.offset + BLOCK_HEADER_LEN + self.value.len()
    }
}

/// Iterator over well-formed blocks; stops at a truncated tail
struct Blocks<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Block<'a>;

    fn next(&mut self) -> Option<Block<'a>> {
        let header = self.data.get(self.offset..self.offset + BLOCK_HEADER_LEN)?;
        let key = u16::from_le_bytes([header[0], header[1]]);
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        let start = self.offset + BLOCK_HEADER_LEN;
        let value = self.data.get(start..start + len)?;
        let block = Block {
            offset: self.offset,
            key,
            value,
        };
        self.offset = block.end();
        Some(block)
    }
}

impl RamBuffer {
    pub fn new(id: u16, initial_size: usize) -> Result<Self> {
        let capacity = grow_to(initial_size, 0)?;
        Ok(Self {
            id,
            data: Vec::with_capacity(capacity),
            capacity,
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_shared(self) -> SharedRamBuffer {
        Arc::new(Mutex::new(self))
    }

    fn blocks(&self) -> Blocks<'_> {
        Blocks {
            data: &self.data,
            offset: 0,
        }
    }

    /// Make room for one more block carrying `value_len` bytes
    pub fn resize(&mut self, key: u16, value_len: usize) -> Result<()> {
        let needed = self.data.len() + BLOCK_HEADER_LEN + value_len;
        if needed <= self.capacity {
            return Ok(());
        }
        let capacity = grow_to(self.capacity, needed).inspect_err(|_| {
            debug!(id = self.id, key, needed, "Settings buffer full");
        })?;
        self.data.reserve_exact(capacity - self.data.len());
        trace!(id = self.id, key, from = self.capacity, to = capacity, "Grew settings buffer");
        self.capacity = capacity;
        Ok(())
    }

    /// Append a block for `key`
    pub fn add(&mut self, key: u16, value: &[u8]) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| SettingsError::NoBufs { max: MAX_ALLOC })?;
        self.resize(key, value.len())?;
        self.data.extend_from_slice(&key.to_le_bytes());
        self.data.extend_from_slice(&len.to_le_bytes());
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// The `index`-th value stored under `key`
    pub fn get(&self, key: u16, index: usize) -> Option<&[u8]> {
        self.blocks().filter(|b| b.key == key).nth(index).map(|b| b.value)
    }

    /// Delete the `index`-th block of `key`, or every block of `key` when `index` is `None`
    pub fn delete(&mut self, key: u16, index: Option<usize>) -> Result<()> {
        let ranges: Vec<(usize, usize)> = {
            let matching = self.blocks().filter(|b| b.key == key);
            match index {
                Some(i) => matching.skip(i).take(1).map(|b| (b.offset, b.end())).collect(),
                None => matching.map(|b| (b.offset, b.end())).collect(),
            }
        };
        if ranges.is_empty() {
            return Err(SettingsError::NotFound(key));
        }
        for (start, end) in ranges.into_iter().rev() {
            self.data.drain(start..end);
        }
        Ok(())
    }

    pub fn wipe(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;

    #[test]
    fn test_acquire_new_record() {
        let store = MemoryRecordStore::new();
        let buffer = acquire_buffer(&store, 0x5000, 1024).unwrap();
        assert_eq!(buffer.capacity(), 1024);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_acquire_grows_to_fit_record() {
        let store = MemoryRecordStore::new();
        store.save(0x5000, &[0xaa; 1500]).unwrap();

        let buffer = acquire_buffer(&store, 0x5000, 1024).unwrap();
        assert_eq!(buffer.capacity(), 1536);
        assert_eq!(buffer.len(), 1500);
    }

    #[test]
    fn test_acquire_rejects_oversized_record() {
        let store = MemoryRecordStore::new();
        store.save(1, &vec![0u8; MAX_ALLOC + 1]).unwrap();
        assert!(matches!(
            acquire_buffer(&store, 1, 1024),
            Err(SettingsError::NoBufs { max: MAX_ALLOC })
        ));
    }

    struct Unreadable(MemoryRecordStore);

    impl RecordStore for Unreadable {
        fn data_len(&self, id: u16) -> Option<usize> {
            self.0.data_len(id)
        }

        fn read(&self, id: u16, _buf: &mut [u8]) -> Result<usize> {
            Err(SettingsError::MissingRecord(id))
        }

        fn save(&self, id: u16, data: &[u8]) -> Result<()> {
            self.0.save(id, data)
        }

        fn delete(&self, id: u16) -> Result<()> {
            self.0.delete(id)
        }
    }

    #[test]
    fn test_unreadable_record_is_deleted() {
        let store = Unreadable(MemoryRecordStore::new());
        store.save(9, b"garbage").unwrap();

        let buffer = acquire_buffer(&store, 9, 512).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(store.data_len(9), None);
    }

    #[test]
    fn test_blocks_add_get_delete() {
        let mut buffer = RamBuffer::new(1, 64).unwrap();
        buffer.add(0x0001, b"one").unwrap();
        buffer.add(0x0002, b"two").unwrap();
        buffer.add(0x0001, b"uno").unwrap();

        assert_eq!(buffer.as_bytes()[..7], [0x01, 0x00, 0x03, 0x00, b'o', b'n', b'e']);
        assert_eq!(buffer.get(0x0001, 1), Some(&b"uno"[..]));
        assert_eq!(buffer.get(0x0002, 0), Some(&b"two"[..]));
        assert_eq!(buffer.get(0x0002, 1), None);

        buffer.delete(0x0001, Some(0)).unwrap();
        assert_eq!(buffer.get(0x0001, 0), Some(&b"uno"[..]));

        buffer.delete(0x0001, None).unwrap();
        assert_eq!(buffer.get(0x0001, 0), None);
        assert_eq!(buffer.get(0x0002, 0), Some(&b"two"[..]));
        assert!(matches!(buffer.delete(0x0001, None), Err(SettingsError::NotFound(1))));

        buffer.wipe();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_resize_steps_and_limit() {
        let mut buffer = RamBuffer::new(1, 512).unwrap();
        buffer.add(7, &[0u8; 508]).unwrap();
        assert_eq!(buffer.capacity(), 512);

        buffer.add(7, &[0u8; 1]).unwrap();
        assert_eq!(buffer.capacity(), 1024);

        let big = vec![0u8; MAX_ALLOC];
        assert!(matches!(buffer.add(8, &big), Err(SettingsError::NoBufs { .. })));
        assert_eq!(buffer.capacity(), 1024);
        assert_eq!(buffer.len(), 517);
    }
}
