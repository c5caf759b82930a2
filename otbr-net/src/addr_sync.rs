//! Mirror mesh link state and unicast addresses onto the local interface
//!
//! On every relevant state change the full mesh address list is re-read and
//! reconciled against the interface's address table. A shadow set records
//! which slots this module filled during the previous pass; only those are
//! ever invalidated, so addresses configured by someone else survive.

use tracing::{debug, warn};

use crate::error::NetError;
use crate::mesh::{AddressOrigin, ChangedFlags, MeshAddress, MeshStack};
use crate::netif::{AddrState, LINK_LOCAL_SLOT, Netif, NetifId};
use crate::stack::NetCore;

/// Changes that trigger a reconciliation pass
pub const SYNC_TRIGGERS: ChangedFlags = ChangedFlags::THREAD_ROLE
    .union(ChangedFlags::IP6_ADDRESS_ADDED)
    .union(ChangedFlags::IP6_ADDRESS_REMOVED);

/// Keeps one local interface in sync with the mesh stack
pub struct AddressSync {
    netif: NetifId,
    /// Slots assigned by the previous pass
    assigned: Vec<bool>,
}

impl AddressSync {
    pub fn new(netif: NetifId, capacity: usize) -> Self {
        Self {
            netif,
            assigned: vec![false; capacity],
        }
    }

    pub fn netif(&self) -> NetifId {
        self.netif
    }

    /// Slots owned by the synchronizer after the last pass
    pub fn assigned(&self) -> &[bool] {
        &self.assigned
    }

    /// State-change entry point, called with the task lock held
    pub fn on_state_changed<M: MeshStack>(&mut self, mesh: &M, core: &NetCore, flags: ChangedFlags) {
        if !flags.intersects(SYNC_TRIGGERS) {
            return;
        }

        let addr_changed =
            flags.intersects(ChangedFlags::IP6_ADDRESS_ADDED | ChangedFlags::IP6_ADDRESS_REMOVED);

        let mut table = core.lock();
        let Some(netif) = table.get_mut(self.netif) else {
            warn!(netif = %self.netif, "Mesh interface missing, skipping address sync");
            return;
        };

        let enabled = mesh.is_ip6_enabled();
        let addresses = if enabled {
            mesh.unicast_addresses()
        } else {
            Vec::new()
        };
        self.reconcile(netif, enabled, &addresses, addr_changed);
    }

    /// Reconcile the interface against a snapshot of mesh state
    pub fn reconcile(&mut self, netif: &mut Netif, enabled: bool, addresses: &[MeshAddress], addr_changed: bool) {
        let mut addr_changed = addr_changed;

        if netif.is_link_up() != enabled {
            netif.set_link_up(enabled);
            netif.set_up(enabled);
            debug!(netif = %self.netif, up = enabled, "Mesh link state changed");
            addr_changed = true;
        }

        if !addr_changed {
            return;
        }

        let capacity = self.assigned.len().min(netif.capacity());
        let mut current = vec![false; self.assigned.len()];

        if enabled {
            for entry in addresses.iter().filter(|a| a.valid && !a.rloc) {
                let slot = if entry.is_link_local() && !current[LINK_LOCAL_SLOT] {
                    if let Err(e) = netif.set_ip6_addr(LINK_LOCAL_SLOT, entry.address) {
                        warn!(error = %e, "Failed to set link-local address");
                        continue;
                    }
                    LINK_LOCAL_SLOT
                } else {
                    match netif.add_ip6_address(entry.address) {
                        Ok(slot) if slot < capacity => slot,
                        Ok(_) => continue,
                        Err(NetError::NoSpace) => {
                            debug!(netif = %self.netif, address = %entry.address, "Address table full");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, address = %entry.address, "Failed to add address");
                            continue;
                        }
                    }
                };

                let state = if entry.preferred && entry.origin != AddressOrigin::Thread {
                    AddrState::Preferred
                } else {
                    AddrState::Valid
                };
                if let Err(e) = netif.set_addr_state(slot, state) {
                    warn!(netif = %self.netif, slot, error = %e, "Failed to set address state");
                    continue;
                }
                current[slot] = true;
            }
        }

        for slot in 0..capacity {
            if self.assigned[slot] && !current[slot] {
                match netif.set_addr_state(slot, AddrState::Invalid) {
                    Ok(()) => debug!(netif = %self.netif, slot, "Invalidated mesh address slot"),
                    Err(e) => warn!(netif = %self.netif, slot, error = %e, "Failed to invalidate address slot"),
                }
            }
        }

        self.assigned = current;
    }
}
