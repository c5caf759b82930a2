//! Test utilities: a simulated mesh stack and a recording platform
//!
//! Enabled for unit tests and, through the `test-util` feature, for the
//! integration tests under `tests/`.

pub mod packets;
pub mod platform;
pub mod sim_mesh;

use crossbeam_channel::Receiver;

pub use platform::{RecordingIcmp6Socket, RecordingMdnsSocket, SIM_ETH_MAC, SimPlatform};
pub use sim_mesh::{NdReceived, SimMesh, SimMeshHandle, SimMessage, SimState, UdpReceived};

use crate::config::{InfraConfig, InstanceMode};
use crate::context::BorderRouterContext;
use crate::netif::{DEFAULT_ADDRESS_SLOTS, NetifId};
use crate::notify::{TaskWaiter, task_notification};
use crate::pbuf::BufferPool;
use crate::platform::Platform;
use crate::stack::{InboundPacket, NetCore};

/// A context wired to a [`SimMesh`], optionally with a physical interface
pub struct BridgeFixture {
    pub ctx: BorderRouterContext<SimMesh>,
    pub handle: SimMeshHandle,
    pub platform: SimPlatform,
    pub infra: Option<NetifId>,
    pub inbound: Receiver<InboundPacket>,
    pub waiter: TaskWaiter,
}

impl BridgeFixture {
    pub fn new() -> Self {
        let (mut platform, handle) = SimPlatform::new();
        let (notifier, waiter) = task_notification();
        let mesh = match platform.init_mesh(InstanceMode::Single, notifier.clone()) {
            Ok(mesh) => mesh,
            Err(e) => panic!("simulated mesh unavailable: {e}"),
        };
        let (core, inbound) = NetCore::new(16);
        Self {
            ctx: BorderRouterContext::new(mesh, core, BufferPool::default(), notifier),
            handle,
            platform,
            infra: None,
            inbound,
            waiter,
        }
    }

    /// Fixture with an Ethernet interface holding its link-local address
    pub fn with_infra() -> Self {
        let mut fixture = Self::new();
        let infra = InfraConfig::Ethernet { mac: SIM_ETH_MAC };
        let id = match fixture
            .platform
            .bring_up_infra(&fixture.ctx.core, &infra, DEFAULT_ADDRESS_SLOTS)
        {
            Ok(Some(id)) => id,
            other => panic!("simulated infra bring-up failed: {other:?}"),
        };
        if let Some(netif) = fixture.ctx.core.lock().get_mut(id) {
            netif.create_ip6_linklocal_address();
        }
        fixture.infra = Some(id);
        fixture
    }
}

impl Default for BridgeFixture {
    fn default() -> Self {
        Self::new()
    }
}
