//! Network interfaces of the local stack
//!
//! Each interface carries a fixed-size IPv6 address table. Slot 0 is
//! reserved for the link-local address; dynamic additions only ever land
//! in slots 1 and up.

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use crate::error::NetError;

/// Default number of IPv6 address slots per interface
pub const DEFAULT_ADDRESS_SLOTS: usize = 6;

/// Slot holding the link-local address
pub const LINK_LOCAL_SLOT: usize = 0;

/// Interface index in the local stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetifId(pub u32);

impl fmt::Display for NetifId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address slot state
///
/// A static address is not a state of its own: it is a `Valid` or
/// `Preferred` slot whose lifetime is [`AddrLifetime::Static`], see
/// [`AddrSlot::is_static`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrState {
    #[default]
    Invalid,
    Valid,
    Preferred,
}

impl AddrState {
    pub fn is_valid(self) -> bool {
        !matches!(self, AddrState::Invalid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrLifetime {
    /// Never expires
    #[default]
    Static,
    Timed { valid: Duration, preferred: Duration },
}

/// One entry of an interface's address table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrSlot {
    pub addr: Ipv6Addr,
    pub state: AddrState,
    pub lifetime: AddrLifetime,
}

impl AddrSlot {
    /// Live and never expiring
    pub fn is_static(&self) -> bool {
        self.state.is_valid() && self.lifetime == AddrLifetime::Static
    }
}

impl Default for AddrSlot {
    fn default() -> Self {
        Self {
            addr: Ipv6Addr::UNSPECIFIED,
            state: AddrState::Invalid,
            lifetime: AddrLifetime::Static,
        }
    }
}

/// A network interface of the local stack
#[derive(Debug, Clone)]
pub struct Netif {
    id: NetifId,
    name: String,
    mtu: u16,
    mac: Option<[u8; 6]>,
    up: bool,
    link_up: bool,
    addrs: Vec<AddrSlot>,
    mld_groups: Vec<Ipv6Addr>,
}

impl Netif {
    pub(crate) fn new(id: NetifId, name: &str, mtu: u16, capacity: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            mtu,
            mac: None,
            up: false,
            link_up: false,
            addrs: vec![AddrSlot::default(); capacity],
            mld_groups: Vec::new(),
        }
    }

    pub fn id(&self) -> NetifId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn mac(&self) -> Option<[u8; 6]> {
        self.mac
    }

    pub fn set_mac(&mut self, mac: [u8; 6]) {
        self.mac = Some(mac);
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn set_up(&mut self, up: bool) {
        self.up = up;
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn set_link_up(&mut self, link_up: bool) {
        self.link_up = link_up;
    }

    pub fn capacity(&self) -> usize {
        self.addrs.len()
    }

    pub fn addr_slot(&self, idx: usize) -> Option<&AddrSlot> {
        self.addrs.get(idx)
    }

    pub fn addr_slots(&self) -> &[AddrSlot] {
        &self.addrs
    }

    fn slot_mut(&mut self, idx: usize) -> Result<&mut AddrSlot, NetError> {
        self.addrs.get_mut(idx).ok_or(NetError::InvalidSlot(idx))
    }

    /// Write an address into a specific slot without touching its state
    pub fn set_ip6_addr(&mut self, idx: usize, addr: Ipv6Addr) -> Result<(), NetError> {
        self.slot_mut(idx)?.addr = addr;
        Ok(())
    }

    pub fn set_addr_state(&mut self, idx: usize, state: AddrState) -> Result<(), NetError> {
        self.slot_mut(idx)?.state = state;
        Ok(())
    }

    pub fn set_addr_lifetime_static(&mut self, idx: usize) -> Result<(), NetError> {
        self.slot_mut(idx)?.lifetime = AddrLifetime::Static;
        Ok(())
    }

    /// Slot index holding `addr` in a valid state
    pub fn addr_match(&self, addr: &Ipv6Addr) -> Option<usize> {
        self.addrs
            .iter()
            .position(|s| s.state.is_valid() && s.addr == *addr)
    }

    /// Add an address, returning the slot that already holds it if any
    ///
    /// New addresses take the first invalid slot from 1 up and start out
    /// in [`AddrState::Valid`]. Slot 0 is never chosen.
    pub fn add_ip6_address(&mut self, addr: Ipv6Addr) -> Result<usize, NetError> {
        if let Some(idx) = self.addr_match(&addr) {
            return Ok(idx);
        }

        let idx = self
            .addrs
            .iter()
            .skip(1)
            .position(|s| !s.state.is_valid())
            .map(|i| i + 1)
            .ok_or(NetError::NoSpace)?;

        self.addrs[idx] = AddrSlot {
            addr,
            state: AddrState::Valid,
            lifetime: AddrLifetime::Static,
        };
        Ok(idx)
    }

    /// Derive the EUI-64 link-local address from the MAC into slot 0
    pub fn create_ip6_linklocal_address(&mut self) -> Option<Ipv6Addr> {
        let mac = self.mac?;
        let addr = eui64_link_local(mac);
        self.addrs[LINK_LOCAL_SLOT] = AddrSlot {
            addr,
            state: AddrState::Preferred,
            lifetime: AddrLifetime::Static,
        };
        Some(addr)
    }

    pub fn join_mld6_group(&mut self, group: Ipv6Addr) {
        if !self.mld_groups.contains(&group) {
            self.mld_groups.push(group);
        }
    }

    pub fn mld6_groups(&self) -> &[Ipv6Addr] {
        &self.mld_groups
    }
}

/// fe80::/64 with the modified EUI-64 interface identifier of `mac`
pub fn eui64_link_local(mac: [u8; 6]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0] = 0xfe;
    octets[1] = 0x80;
    octets[8] = mac[0] ^ 0x02;
    octets[9] = mac[1];
    octets[10] = mac[2];
    octets[11] = 0xff;
    octets[12] = 0xfe;
    octets[13] = mac[3];
    octets[14] = mac[4];
    octets[15] = mac[5];
    Ipv6Addr::from(octets)
}
