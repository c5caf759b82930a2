//! Board and driver seam
//!
//! A [`Platform`] supplies everything the border router cannot do
//! portably: hardware bring-up, creating the mesh stack instance, the
//! physical interface driver and the sockets on it.

use std::net::Ipv6Addr;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::{InfraConfig, InstanceMode};
use crate::error::{BorderRouterError, SocketError};
use crate::infra_if::{Icmp6Socket, RawIcmp6Socket};
use crate::mdns::{MdnsSocket, UdpMdnsSocket};
use crate::mesh::{MeshError, MeshStack};
use crate::netif::NetifId;
use crate::notify::TaskNotifier;
use crate::stack::{InboundPacket, NetCore};

pub trait Platform: Send + 'static {
    type Mesh: MeshStack;

    /// One-time board initialization
    fn init_hardware(&mut self) {}

    /// Create the mesh stack instance; `notifier` wakes the main loop when tasklets are pending
    fn init_mesh(&mut self, mode: InstanceMode, notifier: TaskNotifier) -> Result<Self::Mesh, MeshError>;

    /// Register CLI commands with the mesh stack's console
    fn register_cli(&mut self, _mesh: &Self::Mesh) {}

    /// Start the local stack's input thread, draining `inbound`
    fn start_stack(&mut self, core: Arc<NetCore>, inbound: Receiver<InboundPacket>);

    /// Bring up the physical interface and register it with the local stack
    ///
    /// Returns `None` when no physical interface is available. The interface
    /// gets `address_slots` IPv6 address slots.
    fn bring_up_infra(
        &mut self,
        core: &NetCore,
        infra: &InfraConfig,
        address_slots: usize,
    ) -> Result<Option<NetifId>, BorderRouterError>;

    fn open_icmp6_socket(&self, src: Ipv6Addr, if_index: u32, ifname: &str) -> Result<Box<dyn Icmp6Socket>, SocketError> {
        Ok(Box::new(RawIcmp6Socket::open(src, if_index, ifname)?))
    }

    fn open_mdns_socket(&self, if_index: u32) -> std::io::Result<Arc<dyn MdnsSocket>> {
        Ok(Arc::new(UdpMdnsSocket::open(if_index)?))
    }
}
