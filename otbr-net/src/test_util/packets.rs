//! IPv6 packet builders for tests

use std::net::Ipv6Addr;

use smoltcp::wire::{IpProtocol, Ipv6Packet, Ipv6Repr};

/// IPv6 header size
pub const IPV6_HDR_SIZE: usize = 40;

/// Build an IPv6 packet carrying an ICMPv6 message of `icmp_type`
///
/// The checksum is left zero; the bridge never validates it.
pub fn icmpv6_packet(src: Ipv6Addr, dst: Ipv6Addr, icmp_type: u8, body: &[u8]) -> Vec<u8> {
    let mut icmp = vec![icmp_type, 0, 0, 0];
    icmp.extend_from_slice(body);
    ipv6_packet(src, dst, IpProtocol::Icmpv6, &icmp)
}

/// Build an IPv6 packet with an arbitrary payload
pub fn ipv6_packet(src: Ipv6Addr, dst: Ipv6Addr, next_header: IpProtocol, payload: &[u8]) -> Vec<u8> {
    let repr = Ipv6Repr {
        src_addr: src,
        dst_addr: dst,
        next_header,
        payload_len: payload.len(),
        hop_limit: 255,
    };

    let mut buf = vec![0u8; IPV6_HDR_SIZE + payload.len()];
    let mut packet = Ipv6Packet::new_unchecked(&mut buf[..]);
    repr.emit(&mut packet);
    buf[IPV6_HDR_SIZE..].copy_from_slice(payload);
    buf
}
