//! Simulated Thread mesh stack
//!
//! [`SimMesh`] implements [`MeshStack`] over in-memory state. Tests drive it
//! through a [`SimMeshHandle`]: queue address changes, inbound IPv6 packets
//! or forwarded UDP payloads, then let the main loop (or a direct
//! `process_tasklets` call) deliver them to the registered callbacks.

use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::sync::Arc;

use ipnet::Ipv6Net;
use parking_lot::{Mutex, MutexGuard};

use crate::mesh::{
    ChangedFlags, EchoMode, InfraIfPlatform, MeshAddress, MeshError, MeshMessage, MeshStack,
    MessageSettings, ReceiveCallback, StateChangedCallback, UdpForwardTarget, UdpForwarder,
};

/// Message buffer of the simulated stack
#[derive(Debug, Clone)]
pub struct SimMessage {
    data: Vec<u8>,
    settings: MessageSettings,
    max_len: Option<usize>,
    read_limit: Option<usize>,
}

impl SimMessage {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            settings: MessageSettings::INSECURE,
            max_len: None,
            read_limit: None,
        }
    }

    /// Reads beyond `limit` bytes come back short
    pub fn with_read_limit(mut self, limit: usize) -> Self {
        self.read_limit = Some(limit);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn settings(&self) -> MessageSettings {
        self.settings
    }
}

impl MeshMessage for SimMessage {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> usize {
        let end = self.read_limit.unwrap_or(self.data.len()).min(self.data.len());
        if offset >= end {
            return 0;
        }
        let n = (end - offset).min(buf.len());
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        n
    }

    fn append(&mut self, data: &[u8]) -> Result<(), MeshError> {
        if let Some(max) = self.max_len
            && self.data.len() + data.len() > max
        {
            return Err(MeshError::NoBufs);
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// UDP payload injected through `udp_forward_receive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpReceived {
    pub payload: Vec<u8>,
    pub peer_port: u16,
    pub peer_addr: Ipv6Addr,
    pub sock_port: u16,
}

/// Neighbor-discovery message delivered through `infra_if_recv_icmp6_nd`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdReceived {
    pub infra_if_index: u32,
    pub src: Ipv6Addr,
    pub icmp6: Vec<u8>,
}

/// Observable state of the simulated stack
#[derive(Default)]
pub struct SimState {
    pub ip6_enabled: bool,
    pub addresses: Vec<MeshAddress>,
    /// Packets handed to `ip6_send`
    pub sent: Vec<Vec<u8>>,
    pub send_error: Option<MeshError>,
    pub udp_received: Vec<UdpReceived>,
    pub nd_received: Vec<NdReceived>,
    pub echo_mode: Option<EchoMode>,
    pub receive_filter: bool,
    pub border_routing: Option<(u32, bool)>,
    pub border_routing_enabled: bool,
    pub srp_enabled: bool,
    pub on_link_prefix: Option<Ipv6Net>,
    /// Number of prefix polls answered with `InvalidState` before the prefix shows
    pub prefix_ready_after: u32,
    pub prefix_polls: u32,
    pub infra_platform: Option<Arc<dyn InfraIfPlatform>>,
    pub tasklet_runs: u32,
    pub driver_runs: u32,
    pub reset_requested: bool,
    pub diag_initialized: bool,
    pub finalized: bool,
    /// Remaining message allocations; `None` is unlimited
    pub message_budget: Option<usize>,
    pub max_message_len: Option<usize>,
    pending_changes: ChangedFlags,
    pending_rx: VecDeque<Vec<u8>>,
    pending_forward: VecDeque<(Vec<u8>, UdpForwardTarget)>,
}

#[derive(Default)]
struct SimCallbacks {
    receive: Option<ReceiveCallback<SimMesh>>,
    state_changed: Option<StateChangedCallback<SimMesh>>,
    udp_forwarder: Option<UdpForwarder<SimMesh>>,
}

struct SimShared {
    state: Mutex<SimState>,
    callbacks: Mutex<SimCallbacks>,
}

/// In-memory mesh stack
pub struct SimMesh {
    shared: Arc<SimShared>,
}

/// Test-side view of a [`SimMesh`]
#[derive(Clone)]
pub struct SimMeshHandle {
    shared: Arc<SimShared>,
}

impl SimMesh {
    pub fn new() -> (Self, SimMeshHandle) {
        let shared = Arc::new(SimShared {
            state: Mutex::new(SimState {
                ip6_enabled: true,
                ..Default::default()
            }),
            callbacks: Mutex::new(SimCallbacks::default()),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            SimMeshHandle { shared },
        )
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared.state.lock()
    }

    fn fire_state_changed(&self, flags: ChangedFlags) {
        let cb = self.shared.callbacks.lock().state_changed.take();
        if let Some(mut cb) = cb {
            cb(self, flags);
            let mut callbacks = self.shared.callbacks.lock();
            if callbacks.state_changed.is_none() {
                callbacks.state_changed = Some(cb);
            }
        }
    }

    fn fire_receive(&self, message: SimMessage) {
        let cb = self.shared.callbacks.lock().receive.take();
        if let Some(mut cb) = cb {
            cb(self, message);
            let mut callbacks = self.shared.callbacks.lock();
            if callbacks.receive.is_none() {
                callbacks.receive = Some(cb);
            }
        }
    }

    fn fire_forward(&self, message: SimMessage, target: UdpForwardTarget) {
        let cb = self.shared.callbacks.lock().udp_forwarder.take();
        if let Some(mut cb) = cb {
            cb(self, message, target);
            let mut callbacks = self.shared.callbacks.lock();
            if callbacks.udp_forwarder.is_none() {
                callbacks.udp_forwarder = Some(cb);
            }
        }
    }
}

impl MeshStack for SimMesh {
    type Message = SimMessage;

    fn new_message(&self, settings: MessageSettings) -> Option<SimMessage> {
        let mut state = self.state();
        if let Some(budget) = state.message_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }
        Some(SimMessage {
            data: Vec::new(),
            settings,
            max_len: state.max_message_len,
            read_limit: None,
        })
    }

    fn new_message_from_buffer(&self, data: &[u8], settings: MessageSettings) -> Option<SimMessage> {
        let mut message = self.new_message(settings)?;
        message.append(data).ok()?;
        Some(message)
    }

    fn ip6_send(&self, message: SimMessage) -> Result<(), MeshError> {
        let mut state = self.state();
        if let Some(e) = state.send_error {
            return Err(e);
        }
        state.sent.push(message.data);
        Ok(())
    }

    fn is_ip6_enabled(&self) -> bool {
        self.state().ip6_enabled
    }

    fn unicast_addresses(&self) -> Vec<MeshAddress> {
        self.state().addresses.clone()
    }

    fn set_receive_callback(&self, callback: Option<ReceiveCallback<Self>>) {
        self.shared.callbacks.lock().receive = callback;
    }

    fn set_state_changed_callback(&self, callback: Option<StateChangedCallback<Self>>) {
        self.shared.callbacks.lock().state_changed = callback;
    }

    fn set_udp_forwarder(&self, forwarder: Option<UdpForwarder<Self>>) {
        self.shared.callbacks.lock().udp_forwarder = forwarder;
    }

    fn set_echo_mode(&self, mode: EchoMode) {
        self.state().echo_mode = Some(mode);
    }

    fn set_receive_filter_enabled(&self, enabled: bool) {
        self.state().receive_filter = enabled;
    }

    fn udp_forward_receive(&self, message: SimMessage, peer_port: u16, peer_addr: Ipv6Addr, sock_port: u16) {
        self.state().udp_received.push(UdpReceived {
            payload: message.data,
            peer_port,
            peer_addr,
            sock_port,
        });
    }

    fn infra_if_recv_icmp6_nd(&self, infra_if_index: u32, src: Ipv6Addr, icmp6: &[u8]) {
        self.state().nd_received.push(NdReceived {
            infra_if_index,
            src,
            icmp6: icmp6.to_vec(),
        });
    }

    fn border_routing_init(&self, infra_if_index: u32, infra_if_running: bool) -> Result<(), MeshError> {
        self.state().border_routing = Some((infra_if_index, infra_if_running));
        Ok(())
    }

    fn set_border_routing_enabled(&self, enabled: bool) -> Result<(), MeshError> {
        let mut state = self.state();
        if state.border_routing.is_none() {
            return Err(MeshError::InvalidState);
        }
        state.border_routing_enabled = enabled;
        Ok(())
    }

    fn set_srp_server_enabled(&self, enabled: bool) {
        self.state().srp_enabled = enabled;
    }

    fn on_link_prefix(&self) -> Result<Ipv6Net, MeshError> {
        let mut state = self.state();
        state.prefix_polls += 1;
        match state.on_link_prefix {
            Some(prefix) if state.prefix_polls > state.prefix_ready_after => Ok(prefix),
            _ => Err(MeshError::InvalidState),
        }
    }

    fn set_infra_if_platform(&self, platform: Option<Arc<dyn InfraIfPlatform>>) {
        self.state().infra_platform = platform;
    }

    fn process_tasklets(&self) {
        let (flags, rx, forward) = {
            let mut state = self.state();
            state.tasklet_runs += 1;
            (
                std::mem::replace(&mut state.pending_changes, ChangedFlags::empty()),
                std::mem::take(&mut state.pending_rx),
                std::mem::take(&mut state.pending_forward),
            )
        };

        if !flags.is_empty() {
            self.fire_state_changed(flags);
        }
        for data in rx {
            self.fire_receive(SimMessage::from_bytes(&data));
        }
        for (data, target) in forward {
            self.fire_forward(SimMessage::from_bytes(&data), target);
        }
    }

    fn process_drivers(&self) {
        self.state().driver_runs += 1;
    }

    fn pseudo_reset_requested(&self) -> bool {
        self.state().reset_requested
    }

    fn diag_init(&self) {
        self.state().diag_initialized = true;
    }

    fn finalize(&self) {
        let mut callbacks = self.shared.callbacks.lock();
        *callbacks = SimCallbacks::default();
        drop(callbacks);
        let mut state = self.state();
        state.infra_platform = None;
        state.finalized = true;
    }
}

impl SimMeshHandle {
    /// Inspect or tweak the simulated state
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.shared.state.lock()
    }

    pub fn set_ip6_enabled(&self, enabled: bool) {
        self.state().ip6_enabled = enabled;
    }

    pub fn set_addresses(&self, addresses: Vec<MeshAddress>) {
        self.state().addresses = addresses;
    }

    /// Queue a state-change notification for the next tasklet run
    pub fn signal_changes(&self, flags: ChangedFlags) {
        self.state().pending_changes |= flags;
    }

    /// Queue an IPv6 packet for delivery to the receive callback
    pub fn deliver_ip6(&self, packet: &[u8]) {
        self.state().pending_rx.push_back(packet.to_vec());
    }

    /// Queue a UDP payload for the forwarder
    pub fn forward_udp(&self, payload: &[u8], target: UdpForwardTarget) {
        self.state()
            .pending_forward
            .push_back((payload.to_vec(), target));
    }

    pub fn set_on_link_prefix(&self, prefix: Ipv6Net, ready_after_polls: u32) {
        let mut state = self.state();
        state.on_link_prefix = Some(prefix);
        state.prefix_ready_after = ready_after_polls;
    }

    pub fn request_reset(&self) {
        self.state().reset_requested = true;
    }

    pub fn set_message_budget(&self, budget: Option<usize>) {
        self.state().message_budget = budget;
    }

    pub fn set_max_message_len(&self, max: Option<usize>) {
        self.state().max_message_len = max;
    }

    pub fn set_send_error(&self, error: Option<MeshError>) {
        self.state().send_error = error;
    }

    pub fn infra_platform(&self) -> Option<Arc<dyn InfraIfPlatform>> {
        self.state().infra_platform.clone()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state().sent.clone()
    }

    pub fn has_receive_callback(&self) -> bool {
        self.shared.callbacks.lock().receive.is_some()
    }

    pub fn has_udp_forwarder(&self) -> bool {
        self.shared.callbacks.lock().udp_forwarder.is_some()
    }
}
