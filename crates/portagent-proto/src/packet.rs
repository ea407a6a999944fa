//! Framed packets: creation, fragmentation and buffer decoding.

use std::fmt;

use bytes::Bytes;

use crate::{header::PacketHeader, lrc::lrc, time::ntp_now, types::PacketType};

/// A complete framed packet: header plus payload.
///
/// Packets are immutable once built. The checksum is stamped at creation;
/// decoded packets keep whatever checksum arrived on the wire and report it
/// through [`Packet::valid`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Packet {
    /// Frame `payload` as one or more packets of `packet_type`, timestamped
    /// now.
    ///
    /// See [`Packet::create_at`] for the fragmentation contract.
    pub fn create(payload: impl Into<Bytes>, packet_type: PacketType) -> Vec<Self> {
        Self::create_at(payload, packet_type, ntp_now())
    }

    /// Frame `payload` as one or more packets sharing the timestamp `now`.
    ///
    /// Payloads larger than [`PacketHeader::MAX_PAYLOAD`] split into
    /// consecutive full packets. When the payload length is an exact
    /// multiple of the maximum (including exactly one maximum-sized chunk),
    /// a final empty packet with the same timestamp marks the end of the
    /// fragment run; receivers depend on this.
    pub fn create_at(payload: impl Into<Bytes>, packet_type: PacketType, now: f64) -> Vec<Self> {
        let mut payload = payload.into();
        let mut packets = Vec::with_capacity(payload.len() / PacketHeader::MAX_PAYLOAD + 1);

        while payload.len() >= PacketHeader::MAX_PAYLOAD {
            let chunk = payload.split_to(PacketHeader::MAX_PAYLOAD);
            packets.push(Self::stamped(chunk, packet_type, now));
        }
        packets.push(Self::stamped(payload, packet_type, now));

        packets
    }

    /// Build one packet around a payload known to fit, stamping the
    /// checksum.
    fn stamped(payload: Bytes, packet_type: PacketType, now: f64) -> Self {
        let mut header = PacketHeader::with_time(packet_type, payload.len(), now);
        header.set_checksum(&payload);
        Self { header, payload }
    }

    /// Wrap an already-parsed header and payload, preserving wire bytes.
    pub fn from_parts(header: PacketHeader, payload: impl Into<Bytes>) -> Self {
        Self { header, payload: payload.into() }
    }

    /// Try to decode one packet from the front of `buffer`.
    ///
    /// Returns the packet (if a complete one is present) and the remaining
    /// bytes:
    ///
    /// - a packet was decoded: bytes before its sync pattern are discarded
    ///   and the remainder starts right after the packet;
    /// - a sync pattern was found but the packet is incomplete: no packet,
    ///   remainder retained from the sync onward;
    /// - no sync pattern: no packet, buffer returned unchanged (a sync may
    ///   still be arriving split across reads).
    pub fn from_buffer(buffer: &[u8]) -> (Option<Self>, &[u8]) {
        let Some(sync) = find_sync(buffer) else {
            return (None, buffer);
        };

        let header_stop = sync + PacketHeader::SIZE;
        if buffer.len() >= header_stop {
            let Ok(header) = PacketHeader::from_wire(&buffer[sync..header_stop]) else {
                // unreachable for a located sync pattern, but do not loop
                return (None, &buffer[sync..]);
            };

            // A size field claiming less than a header would re-scan its
            // own bytes forever; consume through the header instead.
            let payload_stop = header_stop + header.payload_size();
            if buffer.len() >= payload_stop {
                let payload = Bytes::copy_from_slice(&buffer[header_stop..payload_stop]);
                return (Some(Self { header, payload }), &buffer[payload_stop..]);
            }
        }

        (None, &buffer[sync..])
    }

    /// Whether the LRC over the framed bytes folds to zero.
    pub fn valid(&self) -> bool {
        lrc(&self.header.to_bytes(), lrc(&self.payload, 0)) == 0
    }

    /// The full framed wire bytes.
    pub fn data(&self) -> Bytes {
        let mut framed = Vec::with_capacity(self.header.packet_size());
        framed.extend_from_slice(&self.header.to_bytes());
        framed.extend_from_slice(&self.payload);
        Bytes::from(framed)
    }

    /// One human-readable log line, newline-terminated.
    pub fn log_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let crc = if self.valid() { "CRC OK" } else { "CRC BAD" };
        write!(
            f,
            "{:15.4} : {:>15} : {:>7} : {}",
            self.header.time(),
            self.header.packet_type().label(),
            crc,
            self.payload.escape_ascii(),
        )
    }
}

/// Position of the first sync pattern in `buffer`, if any.
fn find_sync(buffer: &[u8]) -> Option<usize> {
    buffer.windows(PacketHeader::SYNC.len()).position(|window| window == PacketHeader::SYNC)
}
