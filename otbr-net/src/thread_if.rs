//! The mesh interface ("ot") in the local stack
//!
//! Outbound IPv6 packets routed to the interface go through its output
//! hook, which converts them and hands them to the mesh under the task
//! lock; inbound mesh packets are converted into pooled buffers and queued
//! for local input.

use std::net::Ipv6Addr;
use std::sync::{Arc, Weak};

use tracing::{debug, info, trace};

use crate::addr_sync::AddressSync;
use crate::context::{BorderRouterContext, TaskLock};
use crate::convert::{to_local_buffer, to_mesh_message};
use crate::error::NetError;
use crate::mesh::{ChangedFlags, EchoMode, MeshError, MeshMessage, MeshStack};
use crate::netif::NetifId;
use crate::pbuf::{BufferLayer, BufferPool, PacketBuf};
use crate::stack::NetCore;

pub const THREAD_NETIF_NAME: &str = "ot";

/// IPv6 minimum MTU, the largest packet the mesh carries
pub const THREAD_NETIF_MTU: u16 = 1280;

/// Local-stack side of the mesh interface
pub struct ThreadNetif<M: MeshStack> {
    id: NetifId,
    task: Arc<TaskLock<M>>,
}

impl<M: MeshStack> ThreadNetif<M> {
    /// Register the interface with the local stack and hook up both directions
    pub fn attach(ctx: &BorderRouterContext<M>, capacity: usize) -> Self {
        let id = ctx.with_core(|table| table.add(THREAD_NETIF_NAME, THREAD_NETIF_MTU, capacity));

        let task: Weak<TaskLock<M>> = Arc::downgrade(&ctx.task);
        ctx.core.set_output(
            id,
            Some(Arc::new(move |packet: &PacketBuf, next_hop: Ipv6Addr| {
                let task = task.upgrade().ok_or(NetError::NoOutput(id))?;
                send_to_mesh(&task, id, packet, next_hop)
            })),
        );

        let core = Arc::clone(&ctx.core);
        let pool = ctx.pool.clone();
        ctx.with_mesh(|mesh| {
            mesh.set_receive_callback(Some(Box::new(move |_mesh: &M, message: M::Message| {
                deliver_to_stack(&core, &pool, id, message);
            })));
            mesh.set_echo_mode(EchoMode::All);
            mesh.set_receive_filter_enabled(true);
        });

        info!(netif = %id, name = THREAD_NETIF_NAME, mtu = THREAD_NETIF_MTU, "Attached mesh interface");

        Self {
            id,
            task: Arc::clone(&ctx.task),
        }
    }

    /// Keep the interface's link state and addresses in sync with the mesh
    pub fn install_state_listener(&self, ctx: &BorderRouterContext<M>, capacity: usize) {
        let core = Arc::clone(&ctx.core);
        let mut sync = AddressSync::new(self.id, capacity);
        ctx.with_mesh(|mesh| {
            mesh.set_state_changed_callback(Some(Box::new(move |mesh: &M, flags: ChangedFlags| {
                sync.on_state_changed(mesh, &core, flags);
            })));
        });
    }

    pub fn id(&self) -> NetifId {
        self.id
    }

    /// IPv6 output: send `packet` into the mesh
    ///
    /// Called by the local stack without the core lock held.
    pub fn output_ip6(&self, packet: &PacketBuf, next_hop: Ipv6Addr) -> Result<(), NetError> {
        send_to_mesh(&self.task, self.id, packet, next_hop)
    }

    /// Remove the output hook and the mesh callbacks
    pub fn detach(&self, ctx: &BorderRouterContext<M>) {
        ctx.core.set_output(self.id, None);
        ctx.with_mesh(|mesh| {
            mesh.set_receive_callback(None);
            mesh.set_state_changed_callback(None);
        });
        debug!(netif = %self.id, "Detached mesh interface");
    }
}

/// Mesh send path; the packet stays owned by the caller
fn send_to_mesh<M: MeshStack>(
    task: &TaskLock<M>,
    id: NetifId,
    packet: &PacketBuf,
    next_hop: Ipv6Addr,
) -> Result<(), NetError> {
    let mesh = task.lock();
    trace!(netif = %id, len = packet.tot_len(), next_hop = %next_hop, "Mesh interface output");

    let Some(message) = to_mesh_message(&*mesh, packet) else {
        return Err(NetError::Output(MeshError::NoBufs));
    };
    mesh.ip6_send(message).map_err(|e| {
        debug!(netif = %id, error = %e, "Mesh rejected outbound packet");
        NetError::Output(e)
    })
}

/// Mesh receive path; the message is always released
fn deliver_to_stack<T: MeshMessage>(core: &NetCore, pool: &BufferPool, id: NetifId, message: T) {
    match to_local_buffer(&message, pool, BufferLayer::Link) {
        Some(buf) => {
            if let Err(e) = core.input(id, buf) {
                debug!(netif = %id, error = %e, "Dropping inbound mesh packet");
            }
        }
        None => debug!(netif = %id, len = message.len(), "Failed to convert inbound mesh packet"),
    }
}
