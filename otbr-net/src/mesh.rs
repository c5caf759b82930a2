//! Seam to the Thread mesh stack
//!
//! The mesh stack is single-threaded. Every call into it happens while the
//! task lock ([`crate::context::TaskLock`]) is held, so implementations may
//! keep their state behind plain interior mutability. Methods therefore take
//! `&self`.
//!
//! Callbacks registered with the stack are invoked from inside
//! [`MeshStack::process_tasklets`] (task lock already held) and receive the
//! stack itself so they can query it without re-locking.

use std::net::Ipv6Addr;
use std::sync::Arc;

use bitflags::bitflags;
use ipnet::Ipv6Net;
use thiserror::Error;

/// Error codes returned by the mesh stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MeshError {
    #[error("operation failed")]
    Failed,
    #[error("insufficient buffers")]
    NoBufs,
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("invalid state")]
    InvalidState,
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    Already,
    #[error("not implemented")]
    NotImplemented,
    #[error("message dropped")]
    Drop,
}

bitflags! {
    /// State-change notification bits delivered by the mesh stack
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangedFlags: u32 {
        const IP6_ADDRESS_ADDED = 1 << 0;
        const IP6_ADDRESS_REMOVED = 1 << 1;
        const THREAD_ROLE = 1 << 2;
        const THREAD_LL_ADDR = 1 << 3;
        const THREAD_ML_ADDR = 1 << 4;
        const THREAD_RLOC_ADDED = 1 << 5;
        const THREAD_RLOC_REMOVED = 1 << 6;
        const THREAD_PARTITION_ID = 1 << 7;
        const THREAD_NETDATA = 1 << 9;
        const IP6_MULTICAST_SUBSCRIBED = 1 << 12;
        const IP6_MULTICAST_UNSUBSCRIBED = 1 << 13;
    }
}

/// How a mesh address was configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOrigin {
    /// Assigned by the Thread protocol itself (ML-EID, ALOC, ...)
    Thread,
    Slaac,
    Dhcpv6,
    Manual,
}

/// One unicast address as reported by the mesh stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshAddress {
    pub address: Ipv6Addr,
    pub prefix_len: u8,
    pub origin: AddressOrigin,
    pub preferred: bool,
    pub valid: bool,
    /// Routing locator, never mirrored to the local stack
    pub rloc: bool,
}

impl MeshAddress {
    /// A valid, preferred address of the given origin
    pub fn new(address: Ipv6Addr, prefix_len: u8, origin: AddressOrigin) -> Self {
        Self {
            address,
            prefix_len,
            origin,
            preferred: true,
            valid: true,
            rloc: false,
        }
    }

    pub fn is_link_local(&self) -> bool {
        self.address.is_unicast_link_local()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessagePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Settings used when allocating a mesh message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSettings {
    pub link_security: bool,
    pub priority: MessagePriority,
}

impl MessageSettings {
    /// No link security, normal priority
    pub const INSECURE: Self = Self {
        link_security: false,
        priority: MessagePriority::Normal,
    };
}

/// Which ICMPv6 echo requests the mesh stack answers itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EchoMode {
    Disabled,
    UnicastOnly,
    MulticastOnly,
    #[default]
    All,
}

/// A message buffer owned by the mesh stack
///
/// Dropping the message frees it.
pub trait MeshMessage: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy up to `buf.len()` bytes starting at `offset`; returns the number copied
    fn read(&self, offset: usize, buf: &mut [u8]) -> usize;

    fn append(&mut self, data: &[u8]) -> Result<(), MeshError>;
}

/// Destination of a UDP payload forwarded out of the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpForwardTarget {
    pub peer_addr: Ipv6Addr,
    pub peer_port: u16,
    pub sock_port: u16,
}

/// Services the border-routing manager needs from the physical interface
pub trait InfraIfPlatform: Send + Sync {
    /// Send an ICMPv6 neighbor-discovery message out of the infra interface
    fn send_icmp6_nd(&self, infra_if_index: u32, dst: Ipv6Addr, buf: &[u8]) -> Result<(), MeshError>;

    /// Whether the infra interface currently holds `addr`
    fn has_address(&self, infra_if_index: u32, addr: Ipv6Addr) -> bool;
}

pub type ReceiveCallback<M> = Box<dyn FnMut(&M, <M as MeshStack>::Message) + Send>;
pub type StateChangedCallback<M> = Box<dyn FnMut(&M, ChangedFlags) + Send>;
pub type UdpForwarder<M> = Box<dyn FnMut(&M, <M as MeshStack>::Message, UdpForwardTarget) + Send>;

/// The Thread mesh stack as seen by the border-router glue
pub trait MeshStack: Send + Sized + 'static {
    type Message: MeshMessage;

    /// Allocate an empty IPv6 message; `None` when the stack is out of buffers
    fn new_message(&self, settings: MessageSettings) -> Option<Self::Message>;

    /// Allocate a message pre-filled with `data`
    fn new_message_from_buffer(&self, data: &[u8], settings: MessageSettings) -> Option<Self::Message>;

    /// Hand a complete IPv6 packet to the mesh. Ownership passes on success and failure.
    fn ip6_send(&self, message: Self::Message) -> Result<(), MeshError>;

    fn is_ip6_enabled(&self) -> bool;

    /// Snapshot of the unicast address list
    fn unicast_addresses(&self) -> Vec<MeshAddress>;

    fn set_receive_callback(&self, callback: Option<ReceiveCallback<Self>>);
    fn set_state_changed_callback(&self, callback: Option<StateChangedCallback<Self>>);
    fn set_udp_forwarder(&self, forwarder: Option<UdpForwarder<Self>>);

    fn set_echo_mode(&self, mode: EchoMode);

    /// When enabled, mesh-internal control traffic is not passed to the receive callback
    fn set_receive_filter_enabled(&self, enabled: bool);

    /// Inject a UDP payload received on the physical interface
    fn udp_forward_receive(&self, message: Self::Message, peer_port: u16, peer_addr: Ipv6Addr, sock_port: u16);

    /// Deliver an ICMPv6 neighbor-discovery message received on the infra interface
    fn infra_if_recv_icmp6_nd(&self, infra_if_index: u32, src: Ipv6Addr, icmp6: &[u8]);

    fn border_routing_init(&self, infra_if_index: u32, infra_if_running: bool) -> Result<(), MeshError>;
    fn set_border_routing_enabled(&self, enabled: bool) -> Result<(), MeshError>;
    fn set_srp_server_enabled(&self, enabled: bool);

    /// Current on-link prefix of the infra link; `InvalidState` until one is known
    fn on_link_prefix(&self) -> Result<Ipv6Net, MeshError>;

    fn set_infra_if_platform(&self, platform: Option<Arc<dyn InfraIfPlatform>>);

    /// Run queued mesh tasks
    fn process_tasklets(&self);

    /// Service radio and platform drivers
    fn process_drivers(&self);

    fn pseudo_reset_requested(&self) -> bool;

    fn diag_init(&self) {}

    /// Tear the instance down; the stack must not be used afterwards
    fn finalize(&self);
}
