//! Fuzz target for packet header boundary conditions
//!
//! # Strategy
//!
//! - Size field: zero, below the header size, exact, over-claiming
//! - Type byte: known values, unknown values
//! - Checksum: stored value intact, corrupted
//! - Sync: embedded mid-buffer, split across junk
//!
//! # Invariants
//!
//! - A size field claiming less than a header still makes scan progress
//! - Corrupt checksums decode as invalid packets, never as errors
//! - Unknown type bytes survive re-encoding byte-identically
//! - Decode never panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use portagent_proto::{Packet, PacketHeader, PacketType};

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryPacket {
    leading_junk: Vec<u8>,
    type_byte: u8,
    size_field: SizeField,
    payload: Vec<u8>,
    corrupt_checksum: Option<u8>,
}

#[derive(Debug, Clone, Arbitrary)]
enum SizeField {
    Zero,
    BelowHeader(u8),
    Exact,
    OverClaim(u16),
}

fuzz_target!(|boundary: BoundaryPacket| {
    let payload_len = boundary.payload.len().min(PacketHeader::MAX_PAYLOAD);
    let payload = &boundary.payload[..payload_len];

    let mut header =
        match PacketHeader::new(PacketType::FromInstrument, payload.len(), Some(1000.0), None) {
            Ok(header) => header,
            Err(_) => return,
        };
    header.set_checksum(payload);

    let mut wire = Vec::with_capacity(boundary.leading_junk.len() + header.packet_size());
    wire.extend_from_slice(&boundary.leading_junk);
    let framed_start = wire.len();
    wire.extend_from_slice(&header.to_bytes());
    wire.extend_from_slice(payload);

    // Overwrite the type byte and size field after framing.
    wire[framed_start + 3] = boundary.type_byte;
    let size = match boundary.size_field {
        SizeField::Zero => 0,
        SizeField::BelowHeader(n) => u16::from(n) % (PacketHeader::SIZE as u16),
        SizeField::Exact => header.packet_size() as u16,
        SizeField::OverClaim(extra) => (header.packet_size() as u16).saturating_add(extra),
    };
    wire[framed_start + 4..framed_start + 6].copy_from_slice(&size.to_be_bytes());

    if let Some(corruption) = boundary.corrupt_checksum {
        wire[framed_start + 7] ^= corruption;
    }

    let mut buffer: &[u8] = &wire;
    loop {
        let (packet, rest) = Packet::from_buffer(buffer);
        match packet {
            Some(packet) => {
                assert!(rest.len() < buffer.len());
                // Unknown type bytes must survive re-encoding.
                if PacketType::from_u8(packet.header.raw_packet_type()).is_none() {
                    assert_eq!(packet.header.packet_type(), PacketType::Unknown);
                    assert_eq!(packet.data()[3], packet.header.raw_packet_type());
                }
            }
            None => break,
        }
        buffer = rest;
    }
});
