//! Recording platform and sockets
//!
//! [`SimPlatform`] is cheap to clone: every clone shares the same
//! recordings, so a test can keep one while the border router owns another.

use std::collections::VecDeque;
use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use super::sim_mesh::{SimMesh, SimMeshHandle};
use crate::config::{InfraConfig, InstanceMode};
use crate::error::{BorderRouterError, SocketError};
use crate::infra_if::Icmp6Socket;
use crate::mdns::{Datagram, MdnsSocket};
use crate::mesh::MeshError;
use crate::netif::NetifId;
use crate::notify::TaskNotifier;
use crate::pbuf::PacketBuf;
use crate::platform::Platform;
use crate::stack::{InboundPacket, NetCore};

/// MAC used for the simulated Ethernet interface
pub const SIM_ETH_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0xbe, 0xef];

type SentLog = Arc<Mutex<Vec<(Vec<u8>, SocketAddrV6)>>>;

/// ICMPv6 socket that records what it sends
pub struct RecordingIcmp6Socket {
    sent: SentLog,
    fail_send: Arc<AtomicBool>,
}

impl Icmp6Socket for RecordingIcmp6Socket {
    fn send_to(&self, buf: &[u8], dst: SocketAddrV6) -> io::Result<usize> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "send failed"));
        }
        self.sent.lock().push((buf.to_vec(), dst));
        Ok(buf.len())
    }
}

/// mDNS socket that records sends and replays queued datagrams
#[derive(Default)]
pub struct RecordingMdnsSocket {
    sent: Mutex<Vec<(Vec<u8>, SocketAddrV6)>>,
    incoming: Mutex<VecDeque<(Vec<u8>, SocketAddrV6)>>,
}

impl RecordingMdnsSocket {
    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddrV6)> {
        self.sent.lock().clone()
    }

    pub fn push_incoming(&self, payload: &[u8], src: SocketAddrV6) {
        self.incoming.lock().push_back((payload.to_vec(), src));
    }
}

impl MdnsSocket for RecordingMdnsSocket {
    fn send_to(&self, packet: &PacketBuf, dst: SocketAddrV6) -> io::Result<usize> {
        self.sent.lock().push((packet.to_vec(), dst));
        Ok(packet.tot_len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        let next = self.incoming.lock().pop_front();
        match next {
            Some((payload, src)) => {
                let len = payload.len().min(buf.len());
                buf[..len].copy_from_slice(&payload[..len]);
                Ok(Datagram {
                    len,
                    src,
                    truncated: payload.len() > buf.len(),
                })
            }
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Icmp6OpenFailure {
    Open,
    BindDevice,
}

/// Platform backed by [`SimMesh`] and recording sockets
#[derive(Clone)]
pub struct SimPlatform {
    mesh: Arc<Mutex<Option<SimMesh>>>,
    instance_mode: Arc<Mutex<Option<InstanceMode>>>,
    hardware_inits: Arc<AtomicUsize>,
    cli_registered: Arc<AtomicBool>,
    core: Arc<Mutex<Option<Arc<NetCore>>>>,
    inbound: Arc<Mutex<Option<Receiver<InboundPacket>>>>,
    wifi_join_fails: Arc<AtomicBool>,
    icmp6_failure: Arc<Mutex<Option<Icmp6OpenFailure>>>,
    icmp6_sent: SentLog,
    icmp6_fail_send: Arc<AtomicBool>,
    mdns: Arc<RecordingMdnsSocket>,
}

impl SimPlatform {
    pub fn new() -> (Self, SimMeshHandle) {
        let (mesh, handle) = SimMesh::new();
        let platform = Self {
            mesh: Arc::new(Mutex::new(Some(mesh))),
            instance_mode: Arc::new(Mutex::new(None)),
            hardware_inits: Arc::new(AtomicUsize::new(0)),
            cli_registered: Arc::new(AtomicBool::new(false)),
            core: Arc::new(Mutex::new(None)),
            inbound: Arc::new(Mutex::new(None)),
            wifi_join_fails: Arc::new(AtomicBool::new(false)),
            icmp6_failure: Arc::new(Mutex::new(None)),
            icmp6_sent: Arc::new(Mutex::new(Vec::new())),
            icmp6_fail_send: Arc::new(AtomicBool::new(false)),
            mdns: Arc::new(RecordingMdnsSocket::default()),
        };
        (platform, handle)
    }

    pub fn fail_icmp6_open(&self) {
        *self.icmp6_failure.lock() = Some(Icmp6OpenFailure::Open);
    }

    pub fn fail_icmp6_bind_device(&self) {
        *self.icmp6_failure.lock() = Some(Icmp6OpenFailure::BindDevice);
    }

    pub fn fail_icmp6_send(&self) {
        self.icmp6_fail_send.store(true, Ordering::SeqCst);
    }

    pub fn fail_wifi_join(&self) {
        self.wifi_join_fails.store(true, Ordering::SeqCst);
    }

    pub fn icmp6_sent(&self) -> Vec<(Vec<u8>, SocketAddrV6)> {
        self.icmp6_sent.lock().clone()
    }

    pub fn mdns_socket(&self) -> Arc<RecordingMdnsSocket> {
        Arc::clone(&self.mdns)
    }

    /// The local stack core handed over by `start_stack`
    pub fn core(&self) -> Option<Arc<NetCore>> {
        self.core.lock().clone()
    }

    pub fn take_inbound(&self) -> Option<Receiver<InboundPacket>> {
        self.inbound.lock().take()
    }

    pub fn instance_mode(&self) -> Option<InstanceMode> {
        *self.instance_mode.lock()
    }

    pub fn hardware_inits(&self) -> usize {
        self.hardware_inits.load(Ordering::SeqCst)
    }

    pub fn cli_registered(&self) -> bool {
        self.cli_registered.load(Ordering::SeqCst)
    }
}

impl Platform for SimPlatform {
    type Mesh = SimMesh;

    fn init_hardware(&mut self) {
        self.hardware_inits.fetch_add(1, Ordering::SeqCst);
    }

    fn init_mesh(&mut self, mode: InstanceMode, _notifier: TaskNotifier) -> Result<SimMesh, MeshError> {
        *self.instance_mode.lock() = Some(mode);
        self.mesh.lock().take().ok_or(MeshError::Failed)
    }

    fn register_cli(&mut self, _mesh: &SimMesh) {
        self.cli_registered.store(true, Ordering::SeqCst);
    }

    fn start_stack(&mut self, core: Arc<NetCore>, inbound: Receiver<InboundPacket>) {
        *self.core.lock() = Some(core);
        *self.inbound.lock() = Some(inbound);
    }

    fn bring_up_infra(
        &mut self,
        core: &NetCore,
        infra: &InfraConfig,
        address_slots: usize,
    ) -> Result<Option<NetifId>, BorderRouterError> {
        let (name, mac) = match infra {
            InfraConfig::Ethernet { mac } => ("en0", *mac),
            InfraConfig::Wifi { .. } => {
                if self.wifi_join_fails.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                ("ml1", SIM_ETH_MAC)
            }
            InfraConfig::None => return Ok(None),
        };

        let mut table = core.lock();
        let id = table.add(name, 1500, address_slots);
        let netif = table.require_mut(id)?;
        netif.set_mac(mac);
        netif.set_up(true);
        netif.set_link_up(true);
        Ok(Some(id))
    }

    fn open_icmp6_socket(&self, _src: Ipv6Addr, _if_index: u32, ifname: &str) -> Result<Box<dyn Icmp6Socket>, SocketError> {
        match *self.icmp6_failure.lock() {
            Some(Icmp6OpenFailure::Open) => Err(SocketError::Open(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "raw sockets not permitted",
            ))),
            Some(Icmp6OpenFailure::BindDevice) => Err(SocketError::BindDevice {
                device: ifname.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            }),
            None => Ok(Box::new(RecordingIcmp6Socket {
                sent: Arc::clone(&self.icmp6_sent),
                fail_send: Arc::clone(&self.icmp6_fail_send),
            })),
        }
    }

    fn open_mdns_socket(&self, _if_index: u32) -> io::Result<Arc<dyn MdnsSocket>> {
        Ok(Arc::clone(&self.mdns) as Arc<dyn MdnsSocket>)
    }
}
