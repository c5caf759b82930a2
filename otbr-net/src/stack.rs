//! The local network stack core
//!
//! [`NetCore`] owns the interface table behind the core lock, the raw
//! protocol hooks, the per-interface output hooks and the inbound packet
//! queue drained by the stack's own thread.
//!
//! Lock order: the task lock is always taken before the core lock. The core
//! lock tracks per-thread ownership so the task lock can assert it is never
//! acquired while the core lock is held.

use std::cell::Cell;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Mutex, MutexGuard};
use smoltcp::wire::{IpProtocol, Ipv6Packet};
use tracing::{debug, trace, warn};

use crate::error::NetError;
use crate::netif::{Netif, NetifId};
use crate::pbuf::PacketBuf;

thread_local! {
    static CORE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Whether the current thread holds the core lock
pub fn core_lock_held() -> bool {
    CORE_DEPTH.with(|d| d.get() > 0)
}

/// A packet handed to the local stack for input processing
#[derive(Debug)]
pub struct InboundPacket {
    pub netif: NetifId,
    pub packet: PacketBuf,
}

/// Outcome of a raw protocol hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawVerdict {
    /// Continue normal processing; the stack frees the packet
    NotConsumed,
    /// The hook took the packet
    Consumed,
}

/// Raw receive hook: the packet, its IPv6 source address
pub type RawRecvFn = Arc<dyn Fn(&PacketBuf, Ipv6Addr) -> RawVerdict + Send + Sync>;

/// Interface output hook: send an IPv6 packet toward its next hop
pub type OutputFn = Arc<dyn Fn(&PacketBuf, Ipv6Addr) -> Result<(), NetError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawPcbId(u32);

struct RawPcb {
    id: RawPcbId,
    netif: NetifId,
    protocol: IpProtocol,
    recv: RawRecvFn,
}

/// Interfaces registered with the local stack
#[derive(Debug, Default)]
pub struct NetifTable {
    netifs: Vec<Netif>,
    next_id: u32,
}

impl NetifTable {
    /// Register a new interface; link starts down
    pub fn add(&mut self, name: &str, mtu: u16, capacity: usize) -> NetifId {
        self.next_id += 1;
        let id = NetifId(self.next_id);
        self.netifs.push(Netif::new(id, name, mtu, capacity));
        id
    }

    pub fn remove(&mut self, id: NetifId) -> Option<Netif> {
        let pos = self.netifs.iter().position(|n| n.id() == id)?;
        Some(self.netifs.remove(pos))
    }

    pub fn get(&self, id: NetifId) -> Option<&Netif> {
        self.netifs.iter().find(|n| n.id() == id)
    }

    pub fn get_mut(&mut self, id: NetifId) -> Option<&mut Netif> {
        self.netifs.iter_mut().find(|n| n.id() == id)
    }

    pub fn require(&self, id: NetifId) -> Result<&Netif, NetError> {
        self.get(id).ok_or(NetError::NoInterface(id))
    }

    pub fn require_mut(&mut self, id: NetifId) -> Result<&mut Netif, NetError> {
        self.get_mut(id).ok_or(NetError::NoInterface(id))
    }

    pub fn by_name(&self, name: &str) -> Option<&Netif> {
        self.netifs.iter().find(|n| n.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Netif> {
        self.netifs.iter()
    }
}

/// Guard for the core lock
pub struct CoreGuard<'a> {
    guard: MutexGuard<'a, NetifTable>,
}

impl<'a> CoreGuard<'a> {
    fn new(guard: MutexGuard<'a, NetifTable>) -> Self {
        CORE_DEPTH.with(|d| d.set(d.get() + 1));
        Self { guard }
    }
}

impl Drop for CoreGuard<'_> {
    fn drop(&mut self) {
        CORE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

impl Deref for CoreGuard<'_> {
    type Target = NetifTable;

    fn deref(&self) -> &NetifTable {
        &self.guard
    }
}

impl DerefMut for CoreGuard<'_> {
    fn deref_mut(&mut self) -> &mut NetifTable {
        &mut self.guard
    }
}

/// The local network stack: interface table, raw hooks and input queue
pub struct NetCore {
    table: Mutex<NetifTable>,
    raw_pcbs: Mutex<Vec<RawPcb>>,
    next_pcb: AtomicU32,
    outputs: Mutex<HashMap<NetifId, OutputFn>>,
    inbound: Sender<InboundPacket>,
}

impl NetCore {
    /// Create the stack with an inbound queue of `queue_depth` packets
    pub fn new(queue_depth: usize) -> (Arc<Self>, Receiver<InboundPacket>) {
        let (tx, rx) = bounded(queue_depth);
        let core = Arc::new(Self {
            table: Mutex::new(NetifTable::default()),
            raw_pcbs: Mutex::new(Vec::new()),
            next_pcb: AtomicU32::new(1),
            outputs: Mutex::new(HashMap::new()),
            inbound: tx,
        });
        (core, rx)
    }

    /// Take the core lock
    pub fn lock(&self) -> CoreGuard<'_> {
        CoreGuard::new(self.table.lock())
    }

    /// Queue a packet for input processing on `netif`
    ///
    /// Drops the packet when the queue is full.
    pub fn input(&self, netif: NetifId, packet: PacketBuf) -> Result<(), NetError> {
        match self.inbound.try_send(InboundPacket { netif, packet }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                debug!(netif = %dropped.netif, len = dropped.packet.tot_len(), "Inbound queue full, dropping packet");
                Err(NetError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(netif = %netif, "Inbound queue closed, dropping packet");
                Err(NetError::QueueFull)
            }
        }
    }

    /// Register a raw hook for `protocol` on `netif`
    pub fn raw_bind(&self, netif: NetifId, protocol: IpProtocol, recv: RawRecvFn) -> RawPcbId {
        let id = RawPcbId(self.next_pcb.fetch_add(1, Ordering::Relaxed));
        self.raw_pcbs.lock().push(RawPcb {
            id,
            netif,
            protocol,
            recv,
        });
        id
    }

    pub fn raw_remove(&self, id: RawPcbId) {
        self.raw_pcbs.lock().retain(|pcb| pcb.id != id);
    }

    /// Install or clear the IPv6 output hook of `netif`
    pub fn set_output(&self, netif: NetifId, output: Option<OutputFn>) {
        let mut outputs = self.outputs.lock();
        match output {
            Some(output) => {
                outputs.insert(netif, output);
            }
            None => {
                outputs.remove(&netif);
            }
        }
    }

    pub fn has_output(&self, netif: NetifId) -> bool {
        self.outputs.lock().contains_key(&netif)
    }

    /// Send `packet` out of `netif` through its output hook
    ///
    /// The hook runs without the core lock held; callers must not hold it
    /// either, since output hooks may take the task lock.
    pub fn output_ip6(&self, netif: NetifId, packet: &PacketBuf, next_hop: Ipv6Addr) -> Result<(), NetError> {
        let Some(output) = self.outputs.lock().get(&netif).cloned() else {
            trace!(netif = %netif, len = packet.tot_len(), "No output hook, dropping packet");
            return Err(NetError::NoOutput(netif));
        };
        output(packet, next_hop)
    }

    /// Offer a received IPv6 packet to the raw hooks bound on `netif`
    ///
    /// Hooks run without the core lock held.
    pub fn raw_input(&self, netif: NetifId, packet: &PacketBuf) -> RawVerdict {
        let bytes = packet.contiguous();
        let Ok(ipv6) = Ipv6Packet::new_checked(&bytes[..]) else {
            trace!(netif = %netif, len = packet.tot_len(), "Not a valid IPv6 packet");
            return RawVerdict::NotConsumed;
        };
        let protocol = ipv6.next_header();
        let src = ipv6.src_addr();

        let hooks: Vec<RawRecvFn> = self
            .raw_pcbs
            .lock()
            .iter()
            .filter(|pcb| pcb.netif == netif && pcb.protocol == protocol)
            .map(|pcb| Arc::clone(&pcb.recv))
            .collect();

        for hook in hooks {
            if hook(packet, src) == RawVerdict::Consumed {
                return RawVerdict::Consumed;
            }
        }
        RawVerdict::NotConsumed
    }
}
