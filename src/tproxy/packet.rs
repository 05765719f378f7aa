//! IPv4+UDP datagram construction for spoofed replies
//!
//! The raw reply socket runs in header-included mode, so the kernel fills
//! nothing in: version, lengths, TTL, both checksums, and the spoofed source
//! address are all built here. Byte order is handled exclusively through
//! `to_be_bytes`-style primitives; there is no runtime endianness state.

use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

/// IPv4 header length (no options)
pub const IPV4_HEADER_LEN: usize = 20;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// TTL stamped on every spoofed reply
const REPLY_TTL: u8 = 64;

/// IP protocol number for UDP
const IP_PROTO_UDP: u8 = 17;

/// Error from packet construction. Nothing has been written to the network
/// when this is returned.
#[derive(Debug, Error)]
pub enum PacketError {
    /// The payload does not fit a single IPv4 datagram
    #[error("payload of {len} bytes does not fit in one IPv4/UDP datagram")]
    PayloadTooLarge { len: usize },
}

/// Build a complete IPv4+UDP datagram with the given source and destination.
///
/// The source is caller-chosen and need not belong to this host; that is the
/// point. Layout: 20-byte IPv4 header (version 4, IHL 5, TTL 64, protocol
/// UDP), 8-byte UDP header, payload. The UDP checksum covers the IPv4
/// pseudo-header and is substituted with `0xFFFF` when it computes to zero
/// (RFC 768 reserves zero for "no checksum").
///
/// # Errors
///
/// Returns [`PacketError::PayloadTooLarge`] if the total length exceeds the
/// IPv4 length field.
pub fn build_udp_datagram(
    payload: &[u8],
    src: SocketAddrV4,
    dst: SocketAddrV4,
) -> Result<Vec<u8>, PacketError> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IPV4_HEADER_LEN + udp_len;
    if total_len > usize::from(u16::MAX) {
        return Err(PacketError::PayloadTooLarge { len: payload.len() });
    }

    let mut pkt = vec![0u8; total_len];

    // --- IPv4 header (bytes 0-19) ---
    pkt[0] = 0x45; // version 4, IHL 5 (20 bytes)
    pkt[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
    // bytes 4-7: identification and fragment fields stay zero
    pkt[8] = REPLY_TTL;
    pkt[9] = IP_PROTO_UDP;
    // bytes 10-11: header checksum, computed below
    pkt[12..16].copy_from_slice(&src.ip().octets());
    pkt[16..20].copy_from_slice(&dst.ip().octets());

    // --- UDP header (bytes 20-27) ---
    pkt[20..22].copy_from_slice(&src.port().to_be_bytes());
    pkt[22..24].copy_from_slice(&dst.port().to_be_bytes());
    pkt[24..26].copy_from_slice(&(udp_len as u16).to_be_bytes());
    // bytes 26-27: UDP checksum, computed below

    pkt[IPV4_HEADER_LEN + UDP_HEADER_LEN..].copy_from_slice(payload);

    let udp_sum = udp_checksum(src.ip(), dst.ip(), &pkt[IPV4_HEADER_LEN..]);
    pkt[26..28].copy_from_slice(&udp_sum.to_be_bytes());

    let ip_sum = ipv4_header_checksum(&pkt[..IPV4_HEADER_LEN]);
    pkt[10..12].copy_from_slice(&ip_sum.to_be_bytes());

    Ok(pkt)
}

/// Compute the IPv4 header checksum.
///
/// The checksum field (bytes 10-11) must contain zeros when this is called.
fn ipv4_header_checksum(header: &[u8]) -> u16 {
    finish(sum_be_words(0, header))
}

/// Compute the UDP checksum over the IPv4 pseudo-header and the UDP
/// segment (header + payload, with the checksum field zeroed).
///
/// A computed value of zero is transmitted as `0xFFFF`.
fn udp_checksum(src: &Ipv4Addr, dst: &Ipv4Addr, segment: &[u8]) -> u16 {
    // Pseudo-header: src(4) + dst(4) + zero(1) + proto(1) + udp_len(2)
    let mut pseudo = [0u8; 12];
    pseudo[0..4].copy_from_slice(&src.octets());
    pseudo[4..8].copy_from_slice(&dst.octets());
    pseudo[9] = IP_PROTO_UDP;
    pseudo[10..12].copy_from_slice(&(segment.len() as u16).to_be_bytes());

    let sum = sum_be_words(0, &pseudo);
    let sum = sum_be_words(sum, segment);
    match finish(sum) {
        0 => 0xFFFF,
        checksum => checksum,
    }
}

/// Accumulate big-endian 16-bit words into a one's-complement sum.
///
/// An odd trailing byte is padded with zero, so only the final chunk of a
/// multi-chunk sum may have odd length. The pseudo-header and UDP header are
/// both even, which keeps the segment chunk last.
fn sum_be_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u32::from(u16::from_be_bytes([data[i], data[i + 1]]));
        i += 2;
    }
    if i < data.len() {
        sum += u32::from(data[i]) << 8;
    }
    sum
}

/// Fold the 32-bit accumulator into 16 bits and complement.
fn finish(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
