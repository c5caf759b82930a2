//! Border-router bring-up and task loop against the simulated mesh
//!
//! Run with: cargo test -p otbr-net --features test-util --test border_router_test

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use otbr_net::config::{BorderRouterConfig, InfraConfig, InstanceMode};
use otbr_net::error::BorderRouterError;
use otbr_net::mdns::MDNS_GROUP_V6;
use otbr_net::mesh::{AddressOrigin, ChangedFlags, MeshAddress, MeshError};
use otbr_net::netif::{AddrLifetime, AddrState, NetifId};
use otbr_net::notify::TaskNotifier;
use otbr_net::pbuf::PacketBuf;
use otbr_net::platform::Platform;
use otbr_net::stack::{InboundPacket, NetCore};
use otbr_net::test_util::packets::icmpv6_packet;
use otbr_net::test_util::{SIM_ETH_MAC, SimMesh, SimPlatform};
use otbr_net::{BorderRouter, Stage};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn ip(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

fn ethernet_config() -> BorderRouterConfig {
    BorderRouterConfig {
        infra: InfraConfig::Ethernet { mac: SIM_ETH_MAC },
        ..Default::default()
    }
}

fn netif_id(core: &NetCore, name: &str) -> NetifId {
    core.lock().by_name(name).map(|n| n.id()).unwrap()
}

#[test]
fn test_ethernet_bring_up_and_reset() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();
    mesh.set_on_link_prefix("fd12:3456:789a:1::/64".parse().unwrap(), 10);

    let router = otbr_net::start(platform, ethernet_config()).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);

    assert_eq!(sim.hardware_inits(), 1);
    assert!(sim.cli_registered());
    assert_eq!(sim.instance_mode(), Some(InstanceMode::Single));

    let core = sim.core().unwrap();
    let en0 = netif_id(&core, "en0");
    {
        let state = mesh.state();
        assert_eq!(state.border_routing, Some((en0.0, true)));
        assert!(state.border_routing_enabled);
        assert!(state.srp_enabled);
        assert!(state.infra_platform.is_some());
        assert_eq!(state.prefix_polls, 11);
    }
    {
        let table = core.lock();
        let infra = table.get(en0).unwrap();
        let ll = infra.addr_slot(0).unwrap();
        assert!(ll.addr.is_unicast_link_local());
        assert_eq!(ll.state, AddrState::Preferred);

        let fixed = infra.addr_slot(1).unwrap();
        assert_eq!(fixed.addr, ip("fd12:3456:789a:1::"));
        assert_eq!(fixed.state, AddrState::Valid);
        assert_eq!(fixed.lifetime, AddrLifetime::Static);
        assert!(fixed.is_static());
        assert!(infra.mld6_groups().contains(&MDNS_GROUP_V6));

        let ot = table.by_name("ot").unwrap();
        assert_eq!(ot.mtu(), 1280);
    }

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);

    let state = mesh.state();
    assert!(state.finalized);
    assert!(state.infra_platform.is_none());
}

#[test]
fn test_task_loop_syncs_addresses_and_delivers_packets() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();
    mesh.set_on_link_prefix("fd00:1::/64".parse().unwrap(), 0);

    let router = otbr_net::start(platform, ethernet_config()).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);
    let core = sim.core().unwrap();
    let inbound: Receiver<InboundPacket> = sim.take_inbound().unwrap();
    let ot = netif_id(&core, "ot");

    mesh.set_addresses(vec![
        MeshAddress::new(ip("fe80::1234"), 64, AddressOrigin::Thread),
        MeshAddress::new(ip("fd00:db8::1"), 64, AddressOrigin::Slaac),
    ]);
    mesh.signal_changes(ChangedFlags::IP6_ADDRESS_ADDED);
    router.notifier().notify();

    wait_until("address sync", || {
        core.lock()
            .get(ot)
            .is_some_and(|n| n.addr_match(&ip("fd00:db8::1")).is_some())
    });
    {
        let table = core.lock();
        let netif = table.get(ot).unwrap();
        assert!(netif.is_link_up());
        assert_eq!(netif.addr_slot(0).unwrap().addr, ip("fe80::1234"));
    }

    let pkt = icmpv6_packet(ip("fd00:db8::2"), ip("fd00:db8::1"), 128, &[9u8; 64]);
    mesh.deliver_ip6(&pkt);
    router.notifier().notify();
    let received = inbound.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received.netif, ot);
    assert_eq!(received.packet.to_vec(), pkt);

    // router advertisement seen on the physical link reaches the mesh
    let en0 = netif_id(&core, "en0");
    let ra = icmpv6_packet(ip("fe80::1"), ip("ff02::1"), 134, &[0u8; 12]);
    core.raw_input(en0, &PacketBuf::from_slice(&ra));
    wait_until("nd delivery", || !mesh.state().nd_received.is_empty());

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);
}

#[test]
fn test_local_stack_output_reaches_mesh() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();
    mesh.set_on_link_prefix("fd00:1::/64".parse().unwrap(), 0);

    let router = otbr_net::start(platform, ethernet_config()).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);
    let core = sim.core().unwrap();
    let ot = netif_id(&core, "ot");
    assert!(core.has_output(ot));

    let pkt = icmpv6_packet(ip("fd00:db8::1"), ip("fd00:db8::9"), 128, &[3u8; 200]);
    let chained = PacketBuf::from_segments([pkt[..64].to_vec(), pkt[64..].to_vec()]);
    core.output_ip6(ot, &chained, ip("fd00:db8::9")).unwrap();
    assert_eq!(mesh.sent(), vec![pkt.clone()]);

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);

    assert!(!core.has_output(ot));
    assert!(core.output_ip6(ot, &PacketBuf::from_slice(&pkt), ip("fd00:db8::9")).is_err());
    assert_eq!(mesh.sent().len(), 1);
}

#[test]
fn test_missing_infra_disables_border_routing() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();

    let router = otbr_net::start(platform, BorderRouterConfig::default()).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);

    {
        let state = mesh.state();
        assert!(state.border_routing.is_none());
        assert!(state.infra_platform.is_none());
        assert_eq!(state.prefix_polls, 0);
    }
    let core = sim.core().unwrap();
    assert!(core.lock().by_name("ot").is_some());
    assert!(core.lock().by_name("en0").is_none());

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);
}

#[test]
fn test_wifi_join_failure_runs_without_border_routing() {
    let (platform, mesh) = SimPlatform::new();
    platform.fail_wifi_join();
    let config = BorderRouterConfig {
        infra: InfraConfig::Wifi {
            ssid: "lab".into(),
            password: "secret".into(),
        },
        ..Default::default()
    };

    let router = otbr_net::start(platform, config).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);
    assert!(mesh.state().border_routing.is_none());

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);
}

#[test]
fn test_diagnostics_and_multi_instance_options() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();
    mesh.request_reset();
    let config = BorderRouterConfig {
        diagnostics: true,
        cli: false,
        instance_mode: InstanceMode::Multiple,
        ..Default::default()
    };

    let result = BorderRouter::new(platform, config).run();

    assert_eq!(result.unwrap(), Stage::Finalize);
    assert!(mesh.state().diag_initialized);
    assert!(!sim.cli_registered());
    assert_eq!(sim.instance_mode(), Some(InstanceMode::Multiple));
}

/// Platform whose physical interface never comes up
struct BrokenPhy(SimPlatform);

impl Platform for BrokenPhy {
    type Mesh = SimMesh;

    fn init_mesh(&mut self, mode: InstanceMode, notifier: TaskNotifier) -> Result<SimMesh, MeshError> {
        self.0.init_mesh(mode, notifier)
    }

    fn start_stack(&mut self, core: Arc<NetCore>, inbound: Receiver<InboundPacket>) {
        self.0.start_stack(core, inbound);
    }

    fn bring_up_infra(
        &mut self,
        _core: &NetCore,
        _infra: &InfraConfig,
        _address_slots: usize,
    ) -> Result<Option<NetifId>, BorderRouterError> {
        Err(BorderRouterError::Platform("PHY did not respond".into()))
    }
}

#[test]
fn test_bring_up_failure_reports_stage_and_finalizes() {
    let (platform, mesh) = SimPlatform::new();
    let router = BorderRouter::new(BrokenPhy(platform), ethernet_config())
        .spawn()
        .unwrap();

    wait_until("task exit", || router.is_finished());
    assert_eq!(router.stage(), Stage::InitPhysicalIf);
    assert!(matches!(router.join(), Err(BorderRouterError::Platform(_))));
    assert!(mesh.state().finalized);
}

#[test]
fn test_mesh_init_failure() {
    let (mut platform, _mesh) = SimPlatform::new();
    let (notifier, _waiter) = otbr_net::notify::task_notification();
    // the simulated instance can only be created once
    platform.init_mesh(InstanceMode::Single, notifier).unwrap();

    let result = BorderRouter::new(platform, BorderRouterConfig::default()).run();
    assert!(matches!(result, Err(BorderRouterError::Mesh(MeshError::Failed))));
}
