//! Conversion between mesh messages and local packet buffers
//!
//! Both directions copy the payload; neither consumes its input.

use tracing::debug;

use crate::mesh::{MeshMessage, MeshStack, MessageSettings};
use crate::pbuf::{BufferLayer, BufferPool, PacketBuf};

/// Copy a mesh message into a freshly allocated local buffer
///
/// Returns `None` if allocation fails or the message reads short; a
/// partially filled buffer is released before returning.
pub fn to_local_buffer<T: MeshMessage>(
    message: &T,
    pool: &BufferPool,
    layer: BufferLayer,
) -> Option<PacketBuf> {
    let len = message.len();
    let Some(mut buf) = pool.alloc(layer, len) else {
        debug!(len, ?layer, "Failed to allocate local buffer");
        return None;
    };

    let mut offset = 0;
    for seg in buf.segments_mut() {
        let read = message.read(offset, seg);
        if read != seg.len() {
            debug!(len, offset, read, "Short read from mesh message");
            return None;
        }
        offset += read;
    }

    Some(buf)
}

/// Copy a local buffer chain into a new mesh message
///
/// The chain's segment lengths must add up exactly to its declared total
/// length. Returns `None` on allocation or append failure, or on a length
/// mismatch; the partial message is freed.
pub fn to_mesh_message<M: MeshStack>(mesh: &M, buf: &PacketBuf) -> Option<M::Message> {
    let Some(mut message) = mesh.new_message(MessageSettings::INSECURE) else {
        debug!(len = buf.tot_len(), "Failed to allocate mesh message");
        return None;
    };

    let mut remaining = buf.tot_len();
    for seg in buf.segments() {
        if seg.len() > remaining {
            debug!(tot_len = buf.tot_len(), "Buffer chain longer than declared length");
            return None;
        }
        if let Err(e) = message.append(seg) {
            debug!(error = %e, "Failed to append to mesh message");
            return None;
        }
        remaining -= seg.len();
    }

    if remaining != 0 {
        debug!(tot_len = buf.tot_len(), remaining, "Buffer chain shorter than declared length");
        return None;
    }

    Some(message)
}
