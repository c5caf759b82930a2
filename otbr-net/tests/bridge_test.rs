//! Packet bridging between the mesh, the local stack and the physical link
//!
//! Run with: cargo test -p otbr-net --features test-util --test bridge_test

use std::net::{Ipv6Addr, SocketAddrV6};
use std::time::{Duration, Instant};

use otbr_net::config::{BorderRouterConfig, InfraConfig};
use otbr_net::convert::{to_local_buffer, to_mesh_message};
use otbr_net::infra_if::InfraIf;
use otbr_net::mdns::{MDNS_GROUP_V6, MDNS_PORT, MdnsProxy};
use otbr_net::mesh::{AddressOrigin, ChangedFlags, MeshAddress, MeshStack, UdpForwardTarget};
use otbr_net::netif::AddrState;
use otbr_net::pbuf::{BufferLayer, BufferPool, PacketBuf};
use otbr_net::stack::RawVerdict;
use otbr_net::test_util::packets::icmpv6_packet;
use otbr_net::test_util::{BridgeFixture, SIM_ETH_MAC, SimMessage, SimPlatform};
use otbr_net::thread_if::ThreadNetif;
use otbr_net::Stage;

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

#[test]
fn test_large_packet_crosses_both_directions() {
    let fixture = BridgeFixture::new();
    let thread_if = ThreadNetif::attach(&fixture.ctx, 6);

    // larger than one pool segment, so the local buffer is a chain
    let payload: Vec<u8> = (0..1100u32).map(|i| (i % 251) as u8).collect();
    let pkt = icmpv6_packet(ip("fd00::2"), ip("fd00::1"), 128, &payload);
    fixture.handle.deliver_ip6(&pkt);
    fixture.ctx.with_mesh(|mesh| mesh.process_tasklets());

    let inbound = fixture.inbound.try_recv().unwrap();
    assert_eq!(inbound.netif, thread_if.id());
    assert!(inbound.packet.is_chained());
    assert_eq!(inbound.packet.to_vec(), pkt);

    thread_if.output_ip6(&inbound.packet, ip("fd00::2")).unwrap();
    assert_eq!(fixture.handle.sent(), vec![pkt]);
}

#[test]
fn test_converters_preserve_bytes() {
    let fixture = BridgeFixture::new();
    let pool = BufferPool::new(128, 8);
    let data: Vec<u8> = (0..300u16).map(|i| i as u8).collect();

    let local = to_local_buffer(&SimMessage::from_bytes(&data), &pool, BufferLayer::Link).unwrap();
    assert_eq!(local.segment_count(), 3);

    let message = fixture.ctx.with_mesh(|mesh| to_mesh_message(mesh, &local)).unwrap();
    assert_eq!(message.bytes(), &data[..]);
    assert!(!message.settings().link_security);

    drop(local);
    assert_eq!(pool.available(), 8);
}

#[test]
fn test_state_changes_drive_address_mirroring() {
    let fixture = BridgeFixture::new();
    let thread_if = ThreadNetif::attach(&fixture.ctx, 4);
    thread_if.install_state_listener(&fixture.ctx, 4);

    fixture.handle.set_addresses(vec![
        MeshAddress::new(ip("fe80::1"), 64, AddressOrigin::Thread),
        MeshAddress::new(ip("fd00::a"), 64, AddressOrigin::Slaac),
        MeshAddress::new(ip("fd00::b"), 64, AddressOrigin::Slaac),
        MeshAddress::new(ip("fd00::c"), 64, AddressOrigin::Slaac),
        MeshAddress::new(ip("fd00::d"), 64, AddressOrigin::Slaac),
    ]);
    fixture.handle.signal_changes(ChangedFlags::IP6_ADDRESS_ADDED);
    fixture.ctx.with_mesh(|mesh| mesh.process_tasklets());

    {
        let table = fixture.ctx.core.lock();
        let netif = table.get(thread_if.id()).unwrap();
        let addrs: Vec<_> = netif.addr_slots().iter().map(|s| s.addr).collect();
        assert_eq!(addrs, vec![ip("fe80::1"), ip("fd00::a"), ip("fd00::b"), ip("fd00::c")]);
        assert_eq!(netif.addr_slot(1).unwrap().state, AddrState::Preferred);
    }

    fixture.handle.set_addresses(vec![
        MeshAddress::new(ip("fe80::1"), 64, AddressOrigin::Thread),
        MeshAddress::new(ip("fd00::b"), 64, AddressOrigin::Slaac),
    ]);
    fixture.handle.signal_changes(ChangedFlags::IP6_ADDRESS_REMOVED);
    fixture.ctx.with_mesh(|mesh| mesh.process_tasklets());

    let table = fixture.ctx.core.lock();
    let netif = table.get(thread_if.id()).unwrap();
    assert!(netif.addr_match(&ip("fd00::a")).is_none());
    assert!(netif.addr_match(&ip("fd00::c")).is_none());
    assert_eq!(netif.addr_match(&ip("fd00::b")), Some(2));
}

#[test]
fn test_nd_bridge_forwards_router_traffic_only() {
    let fixture = BridgeFixture::with_infra();
    let infra = InfraIf::init(&fixture.ctx, &fixture.platform, fixture.infra).unwrap();
    assert!(infra.has_receive_hook());

    let rs = icmpv6_packet(ip("fe80::2"), ip("ff02::2"), 133, &[0u8; 4]);
    let echo = icmpv6_packet(ip("fe80::2"), ip("fe80::1"), 128, &[0u8; 4]);
    let na = icmpv6_packet(ip("fe80::2"), ip("ff02::1"), 136, &[0u8; 20]);

    for pkt in [&rs, &echo, &na] {
        let verdict = fixture.ctx.core.raw_input(infra.netif(), &PacketBuf::from_slice(pkt));
        assert_eq!(verdict, RawVerdict::NotConsumed);
    }

    let nd = fixture.handle.state().nd_received.clone();
    assert_eq!(nd.len(), 2);
    assert_eq!(nd[0].infra_if_index, infra.index());
    assert_eq!(nd[0].src, ip("fe80::2"));
    assert_eq!(nd[0].icmp6, rs[40..].to_vec());
    assert_eq!(nd[1].icmp6[0], 136);
}

#[test]
fn test_mesh_sends_nd_through_infra_platform() {
    let fixture = BridgeFixture::with_infra();
    let infra = InfraIf::init(&fixture.ctx, &fixture.platform, fixture.infra).unwrap();
    let platform = fixture.handle.infra_platform().unwrap();

    let ra = [134u8, 0, 0, 0, 64, 0, 0, 0];
    platform.send_icmp6_nd(infra.index(), ip("ff02::1"), &ra).unwrap();

    let sent = fixture.platform.icmp6_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, ra.to_vec());
    assert_eq!(*sent[0].1.ip(), ip("ff02::1"));
    assert_eq!(sent[0].1.scope_id(), infra.index());

    let link_local = fixture
        .ctx
        .core
        .lock()
        .get(infra.netif())
        .and_then(|n| n.addr_slot(0).map(|s| s.addr))
        .unwrap();
    assert!(platform.has_address(infra.index(), link_local));
    assert!(!platform.has_address(infra.index(), ip("fd00::99")));
}

#[test]
fn test_mdns_proxy_both_directions() {
    let fixture = BridgeFixture::with_infra();
    let infra = fixture.infra.unwrap();
    let proxy = MdnsProxy::start(&fixture.ctx, &fixture.platform, infra).unwrap();
    let socket = fixture.platform.mdns_socket();

    assert!(
        fixture
            .ctx
            .core
            .lock()
            .get(infra)
            .unwrap()
            .mld6_groups()
            .contains(&MDNS_GROUP_V6)
    );

    // mesh to infra
    fixture.handle.forward_udp(
        b"query",
        UdpForwardTarget {
            peer_addr: MDNS_GROUP_V6,
            peer_port: MDNS_PORT,
            sock_port: MDNS_PORT,
        },
    );
    fixture.ctx.with_mesh(|mesh| mesh.process_tasklets());
    let sent = socket.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, b"query".to_vec());
    assert_eq!(*sent[0].1.ip(), MDNS_GROUP_V6);
    assert_eq!(sent[0].1.port(), MDNS_PORT);
    assert_eq!(sent[0].1.scope_id(), proxy.if_index());

    // infra to mesh
    let src = SocketAddrV6::new(ip("fe80::77"), 5353, 0, infra.0);
    proxy.handle_infra_datagram(PacketBuf::from_slice(b"answer"), src);
    let received = fixture.handle.state().udp_received.clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, b"answer".to_vec());
    assert_eq!(received[0].peer_addr, ip("fe80::77"));
    assert_eq!(received[0].sock_port, MDNS_PORT);
    assert!(fixture.waiter.take_pending());
}

#[test]
fn test_running_router_relays_mdns() {
    let (platform, mesh) = SimPlatform::new();
    let sim = platform.clone();
    mesh.set_on_link_prefix("fd00:77::/64".parse().unwrap(), 0);
    let config = BorderRouterConfig {
        infra: InfraConfig::Ethernet { mac: SIM_ETH_MAC },
        ..Default::default()
    };

    let router = otbr_net::start(platform, config).unwrap();
    wait_until("run loop", || router.stage() == Stage::RunLoop);

    let socket = sim.mdns_socket();
    socket.push_incoming(b"announce", SocketAddrV6::new(ip("fe80::5"), 5353, 0, 1));
    wait_until("mdns ingress", || !mesh.state().udp_received.is_empty());
    assert_eq!(mesh.state().udp_received[0].payload, b"announce".to_vec());

    mesh.forward_udp(
        b"response",
        UdpForwardTarget {
            peer_addr: MDNS_GROUP_V6,
            peer_port: MDNS_PORT,
            sock_port: MDNS_PORT,
        },
    );
    router.notifier().notify();
    wait_until("mdns egress", || !socket.sent().is_empty());
    assert_eq!(socket.sent()[0].0, b"response".to_vec());

    mesh.request_reset();
    router.notifier().notify();
    assert_eq!(router.join().unwrap(), Stage::Finalize);
    assert!(!mesh.has_udp_forwarder());
}
