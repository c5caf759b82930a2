//! ICMPv6 neighbor-discovery bridge on the physical (infra) interface
//!
//! Router solicitations, router advertisements and neighbor advertisements
//! received on the physical interface are copied to the mesh stack's
//! border-routing manager. The receive hook only observes: it never
//! consumes the packet, so the local stack keeps processing it normally.
//! In the other direction the border-routing manager sends ND messages
//! through a raw ICMPv6 socket bound to the interface.

use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smoltcp::wire::{IpProtocol, Icmpv6Message};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::context::{BorderRouterContext, TaskLock};
use crate::error::SocketError;
use crate::mesh::{InfraIfPlatform, MeshError, MeshStack};
use crate::netif::{LINK_LOCAL_SLOT, NetifId};
use crate::pbuf::PacketBuf;
use crate::platform::Platform;
use crate::stack::{NetCore, RawPcbId, RawVerdict};

/// Offset of the ICMPv6 type byte: a fixed IPv6 header, no extension headers
pub const ICMP6_TYPE_OFFSET: usize = 40;

/// Socket used to send ND messages out of the infra interface
pub trait Icmp6Socket: Send + Sync {
    fn send_to(&self, buf: &[u8], dst: SocketAddrV6) -> io::Result<usize>;
}

/// Raw ICMPv6 socket bound to the interface's link-local address and device
pub struct RawIcmp6Socket {
    socket: Socket,
}

impl RawIcmp6Socket {
    pub fn open(src: Ipv6Addr, if_index: u32, ifname: &str) -> Result<Self, SocketError> {
        let socket =
            Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6)).map_err(SocketError::Open)?;

        let scope = if src.is_unicast_link_local() { if_index } else { 0 };
        socket
            .bind(&SocketAddrV6::new(src, 0, 0, scope).into())
            .map_err(SocketError::Open)?;
        // ND messages must carry hop limit 255
        socket.set_unicast_hops_v6(255).map_err(SocketError::Open)?;
        socket.set_multicast_hops_v6(255).map_err(SocketError::Open)?;

        socket
            .bind_device(Some(ifname.as_bytes()))
            .map_err(|source| SocketError::BindDevice {
                device: ifname.to_string(),
                source,
            })?;

        Ok(Self { socket })
    }
}

impl Icmp6Socket for RawIcmp6Socket {
    fn send_to(&self, buf: &[u8], dst: SocketAddrV6) -> io::Result<usize> {
        self.socket.send_to(buf, &dst.into())
    }
}

/// Whether an ICMPv6 type is bridged to the mesh
pub fn is_bridged_nd_type(msg: Icmpv6Message) -> bool {
    matches!(
        msg,
        Icmpv6Message::RouterSolicit | Icmpv6Message::RouterAdvert | Icmpv6Message::NeighborAdvert
    )
}

/// Classify a received IPv6 packet; returns the ICMPv6 part when it should be bridged
pub fn classify(packet: &[u8]) -> Option<&[u8]> {
    let icmp_type = *packet.get(ICMP6_TYPE_OFFSET)?;
    if is_bridged_nd_type(Icmpv6Message::from(icmp_type)) {
        Some(&packet[ICMP6_TYPE_OFFSET..])
    } else {
        None
    }
}

/// Raw receive hook body: forward RS/RA/NA to the mesh, never consume
pub fn handle_icmp6<M: MeshStack>(mesh: &M, infra_if_index: u32, packet: &PacketBuf, src: Ipv6Addr) -> RawVerdict {
    let bytes = packet.contiguous();
    if let Some(icmp6) = classify(&bytes) {
        trace!(src = %src, icmp_type = icmp6[0], "Forwarding ND message to mesh");
        mesh.infra_if_recv_icmp6_nd(infra_if_index, src, icmp6);
    }
    RawVerdict::NotConsumed
}

/// The ND bridge on one physical interface
pub struct InfraIf {
    netif: NetifId,
    index: u32,
    core: Arc<NetCore>,
    socket: Mutex<Option<Box<dyn Icmp6Socket>>>,
    raw_pcb: Mutex<Option<RawPcbId>>,
}

impl InfraIf {
    /// Set up the bridge on `netif` and register it with the mesh stack
    ///
    /// Returns `None` without side effects when there is no physical
    /// interface. A socket that cannot be opened leaves a receive-only
    /// bridge; a socket that cannot be bound to the device aborts before
    /// the receive hook is registered.
    pub fn init<M, P>(ctx: &BorderRouterContext<M>, platform: &P, netif: Option<NetifId>) -> Option<Arc<Self>>
    where
        M: MeshStack,
        P: Platform<Mesh = M> + ?Sized,
    {
        let Some(netif) = netif else {
            info!("Border Routing feature is disabled: infra interface is missing");
            return None;
        };

        let (name, src) = match ctx.with_core(|table| {
            table.require(netif).map(|n| {
                (
                    n.name().to_string(),
                    n.addr_slot(LINK_LOCAL_SLOT).map(|s| s.addr).unwrap_or(Ipv6Addr::UNSPECIFIED),
                )
            })
        }) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Infra interface not registered");
                return None;
            }
        };
        let index = netif.0;

        let infra = Arc::new(Self {
            netif,
            index,
            core: Arc::clone(&ctx.core),
            socket: Mutex::new(None),
            raw_pcb: Mutex::new(None),
        });

        match platform.open_icmp6_socket(src, index, &name) {
            Ok(socket) => *infra.socket.lock() = Some(socket),
            Err(e @ SocketError::Open(_)) => {
                warn!(error = %e, "Failed to open ICMPv6 socket, ND transmit disabled");
            }
            Err(e @ SocketError::BindDevice { .. }) => {
                warn!(error = %e, "Failed to bind ICMPv6 socket to the interface");
                return Some(infra);
            }
        }

        let task: Weak<TaskLock<M>> = Arc::downgrade(&ctx.task);
        let notifier = ctx.notifier.clone();
        let pcb = ctx.core.raw_bind(
            netif,
            IpProtocol::Icmpv6,
            Arc::new(move |packet: &PacketBuf, src: Ipv6Addr| {
                let Some(task) = task.upgrade() else {
                    return RawVerdict::NotConsumed;
                };
                let verdict = handle_icmp6(&*task.lock(), index, packet, src);
                notifier.notify();
                verdict
            }),
        );
        *infra.raw_pcb.lock() = Some(pcb);

        ctx.with_mesh(|mesh| {
            mesh.set_infra_if_platform(Some(Arc::clone(&infra) as Arc<dyn InfraIfPlatform>));
        });

        info!(netif = %netif, name = %name, index, "ND bridge ready on infra interface");
        Some(infra)
    }

    pub fn netif(&self) -> NetifId {
        self.netif
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn has_socket(&self) -> bool {
        self.socket.lock().is_some()
    }

    pub fn has_receive_hook(&self) -> bool {
        self.raw_pcb.lock().is_some()
    }

    /// Close the ND socket and drop the receive hook
    pub fn deinit(&self) {
        if self.socket.lock().take().is_some() {
            debug!(index = self.index, "Closed ICMPv6 socket");
        }
        if let Some(pcb) = self.raw_pcb.lock().take() {
            self.core.raw_remove(pcb);
        }
    }
}

impl InfraIfPlatform for InfraIf {
    fn send_icmp6_nd(&self, infra_if_index: u32, dst: Ipv6Addr, buf: &[u8]) -> Result<(), MeshError> {
        let socket = self.socket.lock();
        let Some(socket) = socket.as_ref() else {
            return Err(MeshError::Failed);
        };
        let dst = SocketAddrV6::new(dst, 0, 0, self.index);
        socket.send_to(buf, dst).map(|_| ()).map_err(|e| {
            debug!(index = infra_if_index, dst = %dst.ip(), error = %e, "Failed to send ND message");
            MeshError::Failed
        })
    }

    fn has_address(&self, _infra_if_index: u32, addr: Ipv6Addr) -> bool {
        self.core
            .lock()
            .get(self.netif)
            .and_then(|n| n.addr_match(&addr))
            .is_some()
    }
}
