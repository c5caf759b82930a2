//! Packet buffers of the local network stack
//!
//! A [`PacketBuf`] is a chain of segments. Transport-layer buffers are a
//! single heap segment; link-layer buffers are assembled from fixed-size
//! segments of a shared [`BufferPool`] and may be chained. Pool segments go
//! back to the pool when the buffer is dropped.

use std::borrow::Cow;
use std::io::IoSlice;
use std::sync::Arc;

use parking_lot::Mutex;

/// Default size of one pool segment
pub const DEFAULT_SEGMENT_SIZE: usize = 512;

/// Default number of segments in the pool
pub const DEFAULT_SEGMENT_COUNT: usize = 64;

/// Layer a buffer is allocated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayer {
    /// Contiguous heap buffer, used for outbound UDP payloads
    Transport,
    /// Pooled, possibly chained buffer, used for packets entering the stack
    Link,
}

struct PoolInner {
    segment_size: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

/// Fixed pool of equally sized segments
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(segment_size: usize, segment_count: usize) -> Self {
        let free = (0..segment_count)
            .map(|_| vec![0u8; segment_size].into_boxed_slice())
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                segment_size,
                free: Mutex::new(free),
            }),
        }
    }

    pub fn segment_size(&self) -> usize {
        self.inner.segment_size
    }

    /// Number of segments currently free
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Allocate a buffer of `len` bytes; `None` when the pool is exhausted
    pub fn alloc(&self, layer: BufferLayer, len: usize) -> Option<PacketBuf> {
        match layer {
            BufferLayer::Transport => Some(PacketBuf {
                segments: vec![Segment {
                    data: vec![0u8; len].into_boxed_slice(),
                    len,
                }],
                tot_len: len,
                pool: None,
            }),
            BufferLayer::Link => self.alloc_chain(len),
        }
    }

    fn alloc_chain(&self, len: usize) -> Option<PacketBuf> {
        let size = self.inner.segment_size;
        let needed = len.div_ceil(size).max(1);

        let mut free = self.inner.free.lock();
        if free.len() < needed {
            return None;
        }
        let at = free.len() - needed;
        let taken: Vec<Box<[u8]>> = free.drain(at..).collect();
        drop(free);

        let mut remaining = len;
        let segments = taken
            .into_iter()
            .map(|data| {
                let seg_len = remaining.min(size);
                remaining -= seg_len;
                Segment { data, len: seg_len }
            })
            .collect();

        Some(PacketBuf {
            segments,
            tot_len: len,
            pool: Some(self.clone()),
        })
    }

    fn release(&self, data: Box<[u8]>) {
        self.inner.free.lock().push(data);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_SIZE, DEFAULT_SEGMENT_COUNT)
    }
}

struct Segment {
    data: Box<[u8]>,
    len: usize,
}

/// A chained packet buffer
pub struct PacketBuf {
    segments: Vec<Segment>,
    /// Declared total length of the chain
    tot_len: usize,
    pool: Option<BufferPool>,
}

impl PacketBuf {
    /// Build an unpooled chain from explicit segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        let segments: Vec<Segment> = segments
            .into_iter()
            .map(|s| {
                let data = s.into().into_boxed_slice();
                Segment { len: data.len(), data }
            })
            .collect();
        let tot_len = segments.iter().map(|s| s.len).sum();
        Self {
            segments,
            tot_len,
            pool: None,
        }
    }

    /// Single-segment buffer holding a copy of `data`
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_segments([data.to_vec()])
    }

    pub fn tot_len(&self) -> usize {
        self.tot_len
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_chained(&self) -> bool {
        self.segments.len() > 1
    }

    pub fn segments(&self) -> impl Iterator<Item = &[u8]> {
        self.segments.iter().map(|s| &s.data[..s.len])
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        self.segments.iter_mut().map(|s| &mut s.data[..s.len])
    }

    /// Payload of the first segment
    pub fn first_segment(&self) -> &[u8] {
        self.segments().next().unwrap_or(&[])
    }

    /// Contiguous view of the whole chain, copying only when chained
    pub fn contiguous(&self) -> Cow<'_, [u8]> {
        if self.segments.len() == 1 {
            Cow::Borrowed(self.first_segment())
        } else {
            Cow::Owned(self.to_vec())
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tot_len);
        for seg in self.segments() {
            out.extend_from_slice(seg);
        }
        out
    }

    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.segments().map(IoSlice::new).collect()
    }

    /// Copy `data` into the chain from the start; returns the number of bytes written
    pub fn copy_from_slice(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        for seg in self.segments_mut() {
            if written == data.len() {
                break;
            }
            let n = seg.len().min(data.len() - written);
            seg[..n].copy_from_slice(&data[written..written + n]);
            written += n;
        }
        written
    }

    #[cfg(test)]
    pub(crate) fn with_declared_len(mut self, tot_len: usize) -> Self {
        self.tot_len = tot_len;
        self
    }
}

impl Drop for PacketBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            for seg in self.segments.drain(..) {
                pool.release(seg.data);
            }
        }
    }
}

impl std::fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuf")
            .field("tot_len", &self.tot_len)
            .field("segments", &self.segments.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_alloc_chains_segments() {
        let pool = BufferPool::new(64, 8);
        let buf = pool.alloc(BufferLayer::Link, 150).unwrap();

        assert_eq!(buf.tot_len(), 150);
        assert_eq!(buf.segment_count(), 3);
        let lens: Vec<usize> = buf.segments().map(|s| s.len()).collect();
        assert_eq!(lens, vec![64, 64, 22]);
        assert_eq!(pool.available(), 5);

        drop(buf);
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn test_link_alloc_exhausted() {
        let pool = BufferPool::new(64, 2);
        assert!(pool.alloc(BufferLayer::Link, 200).is_none());
        // a failed allocation takes nothing from the pool
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_transport_alloc_is_contiguous() {
        let pool = BufferPool::new(64, 0);
        let buf = pool.alloc(BufferLayer::Transport, 1000).unwrap();
        assert_eq!(buf.segment_count(), 1);
        assert_eq!(buf.first_segment().len(), 1000);
    }

    #[test]
    fn test_copy_across_segments() {
        let pool = BufferPool::new(4, 4);
        let mut buf = pool.alloc(BufferLayer::Link, 10).unwrap();
        let data: Vec<u8> = (0..10).collect();

        assert_eq!(buf.copy_from_slice(&data), 10);
        assert_eq!(buf.to_vec(), data);
        assert!(matches!(buf.contiguous(), Cow::Owned(_)));
    }
}
