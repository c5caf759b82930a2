//! mDNS proxy between the mesh and the physical interface
//!
//! Datagrams arriving on UDP port 5353 of the physical interface are
//! injected into the mesh's UDP forwarding path; UDP traffic the mesh wants
//! forwarded goes out the physical interface to the requested peer.

use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use socket2::{Domain, MaybeUninitSlice, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::context::{BorderRouterContext, TaskLock};
use crate::convert::to_local_buffer;
use crate::error::BorderRouterError;
use crate::mesh::{MeshMessage, MeshStack, MessageSettings, UdpForwardTarget};
use crate::netif::NetifId;
use crate::notify::TaskNotifier;
use crate::pbuf::{BufferLayer, BufferPool, PacketBuf};
use crate::platform::Platform;

pub const MDNS_PORT: u16 = 5353;

/// ff02::fb
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Largest mDNS message, including when carried over a jumbo-frame link (RFC 6762 section 17)
pub const MAX_DATAGRAM: usize = 9000;

/// One datagram read from an [`MdnsSocket`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    /// Bytes written into the receive buffer
    pub len: usize,
    pub src: SocketAddrV6,
    /// The datagram did not fit the buffer and was cut to `len`
    pub truncated: bool,
}

/// UDP socket on the physical interface's mDNS port
pub trait MdnsSocket: Send + Sync {
    fn send_to(&self, packet: &PacketBuf, dst: SocketAddrV6) -> io::Result<usize>;

    /// Blocking receive with a short timeout; times out with `WouldBlock` or `TimedOut`
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Datagram>;
}

/// Dual-stack UDP socket bound to port 5353 and joined to ff02::fb
pub struct UdpMdnsSocket {
    socket: Socket,
}

impl UdpMdnsSocket {
    pub fn open(if_index: u32) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_only_v6(false)?;
        socket.bind(&SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0).into())?;
        socket.join_multicast_v6(&MDNS_GROUP_V6, if_index)?;
        socket.set_multicast_if_v6(if_index)?;
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        Ok(Self { socket })
    }
}

impl MdnsSocket for UdpMdnsSocket {
    fn send_to(&self, packet: &PacketBuf, dst: SocketAddrV6) -> io::Result<usize> {
        self.socket.send_to_vectored(&packet.io_slices(), &dst.into())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        recv_datagram(&self.socket, buf)
    }
}

/// Receive one datagram, reporting whether the kernel cut it short
fn recv_datagram(socket: &Socket, buf: &mut [u8]) -> io::Result<Datagram> {
    let mut bufs = [MaybeUninitSlice::new(as_uninit(buf))];
    let (len, flags, addr) = socket.recv_from_vectored(&mut bufs)?;
    let src = addr
        .as_socket_ipv6()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "non-IPv6 peer"))?;
    Ok(Datagram {
        len,
        src,
        truncated: flags.is_truncated(),
    })
}

fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: initialized bytes are valid MaybeUninit<u8>, and recv only writes
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

/// Scope id for a peer address reached through interface `if_index`
///
/// Interface- and link-local multicast and link-local unicast addresses are
/// scoped to the interface; everything else is global.
pub fn zone_for(addr: &Ipv6Addr, if_index: u32) -> u32 {
    let scoped = if addr.is_multicast() {
        matches!(addr.octets()[1] & 0x0f, 0x1 | 0x2)
    } else {
        addr.is_unicast_link_local()
    };
    if scoped { if_index } else { 0 }
}

/// The running proxy
pub struct MdnsProxy<M: MeshStack> {
    task: Weak<TaskLock<M>>,
    notifier: TaskNotifier,
    pool: BufferPool,
    socket: Arc<dyn MdnsSocket>,
    if_index: u32,
    shutdown: AtomicBool,
}

impl<M: MeshStack> MdnsProxy<M> {
    /// Join the mDNS group on `infra`, open the socket and install the mesh forwarder
    pub fn start<P>(ctx: &BorderRouterContext<M>, platform: &P, infra: NetifId) -> Result<Arc<Self>, BorderRouterError>
    where
        P: Platform<Mesh = M> + ?Sized,
    {
        let if_index = ctx.with_core(|table| {
            let netif = table.require_mut(infra)?;
            netif.join_mld6_group(MDNS_GROUP_V6);
            Ok::<_, BorderRouterError>(netif.id().0)
        })?;

        let socket = platform.open_mdns_socket(if_index)?;

        let proxy = Arc::new(Self {
            task: Arc::downgrade(&ctx.task),
            notifier: ctx.notifier.clone(),
            pool: ctx.pool.clone(),
            socket: Arc::clone(&socket),
            if_index,
            shutdown: AtomicBool::new(false),
        });

        let pool = ctx.pool.clone();
        ctx.with_mesh(|mesh| {
            mesh.set_udp_forwarder(Some(Box::new(
                move |_mesh: &M, message: M::Message, target: UdpForwardTarget| {
                    forward_to_infra(&*socket, &pool, if_index, &message, target);
                },
            )));
        });

        info!(index = if_index, group = %MDNS_GROUP_V6, port = MDNS_PORT, "mDNS proxy started");
        Ok(proxy)
    }

    pub fn if_index(&self) -> u32 {
        self.if_index
    }

    /// Physical to mesh: hand a received datagram to the mesh's UDP forwarding path
    ///
    /// The whole chain is forwarded. The buffer is released in all cases.
    pub fn handle_infra_datagram(&self, packet: PacketBuf, src: SocketAddrV6) {
        let Some(task) = self.task.upgrade() else {
            return;
        };
        let payload = packet.to_vec();
        drop(packet);

        {
            let mesh = task.lock();
            let Some(message) = mesh.new_message_from_buffer(&payload, MessageSettings::INSECURE) else {
                debug!(src = %src, len = payload.len(), "Failed to allocate mesh message for mDNS datagram");
                return;
            };
            trace!(src = %src, len = payload.len(), "Forwarding mDNS datagram to mesh");
            mesh.udp_forward_receive(message, src.port(), *src.ip(), MDNS_PORT);
        }
        self.notifier.notify();
    }

    /// Socket receive pump; runs until [`MdnsProxy::stop`]
    pub fn run_receiver(&self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !self.shutdown.load(Ordering::Acquire) {
            match self.socket.recv_from(&mut buf) {
                Ok(Datagram { src, truncated: true, .. }) => {
                    warn!(src = %src, max = MAX_DATAGRAM, "Dropping truncated mDNS datagram");
                }
                Ok(Datagram { len, src, .. }) => {
                    let Some(mut packet) = self.pool.alloc(BufferLayer::Transport, len) else {
                        debug!(len, "Failed to allocate buffer for mDNS datagram");
                        continue;
                    };
                    packet.copy_from_slice(&buf[..len]);
                    self.handle_infra_datagram(packet, src);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "mDNS socket receive failed, stopping receiver");
                    break;
                }
            }
        }
        debug!("mDNS receiver stopped");
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// Mesh to physical: send one forwarded UDP payload out the infra interface
fn forward_to_infra<T: MeshMessage>(
    socket: &dyn MdnsSocket,
    pool: &BufferPool,
    if_index: u32,
    message: &T,
    target: UdpForwardTarget,
) {
    let dst = SocketAddrV6::new(
        target.peer_addr,
        target.peer_port,
        0,
        zone_for(&target.peer_addr, if_index),
    );

    let Some(packet) = to_local_buffer(message, pool, BufferLayer::Transport) else {
        debug!(dst = %dst, "Failed to convert forwarded UDP payload");
        return;
    };

    match socket.send_to(&packet, dst) {
        Ok(n) => trace!(dst = %dst, len = n, "Forwarded UDP payload to infra link"),
        Err(e) => debug!(dst = %dst, error = %e, "Failed to forward UDP payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::BridgeFixture;

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_zone_selection() {
        assert_eq!(zone_for(&MDNS_GROUP_V6, 3), 3);
        assert_eq!(zone_for(&ip("ff01::1"), 3), 3);
        assert_eq!(zone_for(&ip("ff05::fb"), 3), 0);
        assert_eq!(zone_for(&ip("fe80::1"), 3), 3);
        assert_eq!(zone_for(&ip("2001:db8::1"), 3), 0);
    }

    #[test]
    fn test_start_joins_group_and_installs_forwarder() {
        let fixture = BridgeFixture::with_infra();
        let infra = fixture.infra.unwrap();
        let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, infra).unwrap();

        assert_eq!(proxy.if_index(), infra.0);
        let table = fixture.ctx.core.lock();
        assert!(table.get(infra).unwrap().mld6_groups().contains(&MDNS_GROUP_V6));
        drop(table);
        assert!(fixture.handle.has_udp_forwarder());
    }

    #[test]
    fn test_infra_datagram_reaches_mesh() {
        let fixture = BridgeFixture::with_infra();
        let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, fixture.infra.unwrap()).unwrap();
        let src = SocketAddrV6::new(ip("fe80::1234"), 5353, 0, 0);
        let chained = PacketBuf::from_segments([vec![1u8; 20], vec![2u8; 10]]);

        proxy.handle_infra_datagram(chained, src);

        let state = fixture.handle.state();
        assert_eq!(state.udp_received.len(), 1);
        let received = &state.udp_received[0];
        assert_eq!(received.peer_port, 5353);
        assert_eq!(received.peer_addr, ip("fe80::1234"));
        assert_eq!(received.sock_port, MDNS_PORT);
        assert_eq!(received.payload.len(), 30);
    }

    #[test]
    fn test_infra_datagram_dropped_without_mesh_buffers() {
        let fixture = BridgeFixture::with_infra();
        let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, fixture.infra.unwrap()).unwrap();
        fixture.handle.set_message_budget(Some(0));

        proxy.handle_infra_datagram(PacketBuf::from_slice(&[0u8; 12]), SocketAddrV6::new(ip("fe80::1"), 5353, 0, 0));

        assert!(fixture.handle.state().udp_received.is_empty());
    }

    #[test]
    fn test_mesh_payload_sent_to_infra() {
        let fixture = BridgeFixture::with_infra();
        let infra = fixture.infra.unwrap();
        MdnsProxy::start(&fixture.ctx, &fixture.platform, infra).unwrap();

        fixture.handle.forward_udp(
            b"query",
            UdpForwardTarget {
                peer_addr: MDNS_GROUP_V6,
                peer_port: 5353,
                sock_port: 5353,
            },
        );
        fixture.handle.forward_udp(
            b"unicast",
            UdpForwardTarget {
                peer_addr: ip("2001:db8::5"),
                peer_port: 40000,
                sock_port: 5353,
            },
        );
        fixture.ctx.with_mesh(|mesh| mesh.process_tasklets());

        let sent = fixture.platform.mdns_socket().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (b"query".to_vec(), SocketAddrV6::new(MDNS_GROUP_V6, 5353, 0, infra.0)));
        assert_eq!(sent[1], (b"unicast".to_vec(), SocketAddrV6::new(ip("2001:db8::5"), 40000, 0, 0)));
    }

    #[test]
    fn test_receiver_drops_truncated_datagrams() {
        let fixture = BridgeFixture::with_infra();
        let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, fixture.infra.unwrap()).unwrap();
        let socket = fixture.platform.mdns_socket();
        let src = SocketAddrV6::new(ip("fe80::7"), 5353, 0, 0);
        socket.push_incoming(&vec![0xaa; MAX_DATAGRAM + 1], src);
        socket.push_incoming(&vec![0x55; 4000], src);

        let runner = Arc::clone(&proxy);
        let thread = std::thread::spawn(move || runner.run_receiver());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fixture.handle.state().udp_received.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        proxy.stop();
        thread.join().unwrap();

        let state = fixture.handle.state();
        assert_eq!(state.udp_received.len(), 1);
        assert_eq!(state.udp_received[0].payload, vec![0x55; 4000]);
    }

    #[test]
    fn test_recv_reports_kernel_truncation() {
        let bind = |port| -> Socket {
            let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).unwrap();
            socket.bind(&SocketAddrV6::new(Ipv6Addr::LOCALHOST, port, 0, 0).into()).unwrap();
            socket
        };
        let rx = bind(0);
        let tx = bind(0);
        let dst = rx.local_addr().unwrap();

        tx.send_to(&[7u8; 4000], &dst).unwrap();
        let mut small = vec![0u8; 1500];
        let datagram = recv_datagram(&rx, &mut small).unwrap();
        assert!(datagram.truncated);
        assert_eq!(datagram.len, 1500);

        tx.send_to(&[7u8; 4000], &dst).unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let datagram = recv_datagram(&rx, &mut buf).unwrap();
        assert!(!datagram.truncated);
        assert_eq!(datagram.len, 4000);
        assert_eq!(datagram.src.port(), tx.local_addr().unwrap().as_socket_ipv6().unwrap().port());
    }

    #[test]
    fn test_receiver_pump_forwards_and_stops() {
        let fixture = BridgeFixture::with_infra();
        let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, fixture.infra.unwrap()).unwrap();
        fixture
            .platform
            .mdns_socket()
            .push_incoming(b"answer", SocketAddrV6::new(ip("fe80::7"), 5353, 0, 0));

        let runner = Arc::clone(&proxy);
        let thread = std::thread::spawn(move || runner.run_receiver());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fixture.handle.state().udp_received.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        proxy.stop();
        thread.join().unwrap();

        let state = fixture.handle.state();
        assert_eq!(state.udp_received.len(), 1);
        assert_eq!(state.udp_received[0].payload, b"answer".to_vec());
    }
}
