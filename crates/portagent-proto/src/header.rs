//! Fixed 16-byte packet header.

use crate::{
    errors::{PacketError, Result},
    lrc::lrc,
    types::PacketType,
};

/// Packet header: sync pattern, type, size, checksum and NTP timestamp.
///
/// All multi-byte fields are big-endian on the wire. The raw type byte is
/// preserved as received so that packets with unrecognized types re-encode
/// byte-identically; [`PacketHeader::packet_type`] maps it for routing and
/// logging, falling back to [`PacketType::Unknown`].
///
/// The timestamp is NTP: integer seconds since 1900-01-01 UTC in `ts_high`,
/// fractional seconds scaled by 2^32 in `ts_low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    packet_type: u8,
    packet_size: u16,
    checksum: u16,
    ts_high: u32,
    ts_low: u32,
}

impl PacketHeader {
    /// Serialized size of the header (16 bytes).
    pub const SIZE: usize = 16;

    /// Sync pattern opening every packet.
    pub const SYNC: [u8; 3] = [0xA3, 0x9D, 0x7A];

    /// Scale of the fractional-seconds word.
    pub const FRAC_SCALE: f64 = 4_294_967_296.0; // 2^32

    /// Largest payload a single packet can carry.
    pub const MAX_PAYLOAD: usize = 0xFFFF - Self::SIZE;

    /// Create a header for a payload of `payload_size` bytes.
    ///
    /// Exactly one of `packet_time` (NTP seconds as a non-negative real) or
    /// `ts_words` (raw integer/fraction words) must supply the timestamp.
    ///
    /// # Errors
    ///
    /// [`PacketError::InvalidHeader`] when both or neither timestamp input
    /// is given, or when the payload cannot fit the 16-bit size field.
    pub fn new(
        packet_type: PacketType,
        payload_size: usize,
        packet_time: Option<f64>,
        ts_words: Option<(u32, u32)>,
    ) -> Result<Self> {
        let (ts_high, ts_low) = match (packet_time, ts_words) {
            (Some(_), Some(_)) => {
                return Err(PacketError::InvalidHeader(
                    "cannot supply both ts words and a packet time",
                ));
            },
            (None, None) => {
                return Err(PacketError::InvalidHeader("must supply a packet time"));
            },
            (Some(time), None) => split_time(time),
            (None, Some(words)) => words,
        };

        if payload_size > Self::MAX_PAYLOAD {
            return Err(PacketError::InvalidHeader("payload exceeds the 16-bit size field"));
        }

        Ok(Self {
            packet_type: packet_type.to_u8(),
            packet_size: (Self::SIZE + payload_size) as u16,
            checksum: 0,
            ts_high,
            ts_low,
        })
    }

    /// Infallible constructor for payloads already sliced to fit.
    pub(crate) fn with_time(packet_type: PacketType, payload_size: usize, time: f64) -> Self {
        debug_assert!(payload_size <= Self::MAX_PAYLOAD);
        let (ts_high, ts_low) = split_time(time);
        Self {
            packet_type: packet_type.to_u8(),
            packet_size: (Self::SIZE + payload_size) as u16,
            checksum: 0,
            ts_high,
            ts_low,
        }
    }

    /// Parse a header from exactly [`Self::SIZE`] wire bytes.
    ///
    /// The caller locates the sync pattern; this only unpacks fields. No
    /// checksum verification happens here — validity is a property of the
    /// whole framed packet.
    ///
    /// # Errors
    ///
    /// [`PacketError::InvalidHeader`] if `bytes` is not exactly 16 bytes or
    /// does not open with the sync pattern.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; Self::SIZE] = bytes
            .try_into()
            .map_err(|_| PacketError::InvalidHeader("expected exactly 16 header bytes"))?;

        if bytes[..3] != Self::SYNC {
            return Err(PacketError::InvalidHeader("missing sync pattern"));
        }

        Ok(Self {
            packet_type: bytes[3],
            packet_size: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
            ts_high: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            ts_low: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }

    /// Serialize the header to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..3].copy_from_slice(&Self::SYNC);
        bytes[3] = self.packet_type;
        bytes[4..6].copy_from_slice(&self.packet_size.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.ts_high.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.ts_low.to_be_bytes());
        bytes
    }

    /// Stamp the checksum for `payload`.
    ///
    /// The LRC covers the header bytes (checksum field zeroed) and the
    /// payload; storing that value makes the complete frame fold to zero.
    pub fn set_checksum(&mut self, payload: &[u8]) {
        self.checksum = 0;
        self.checksum = u16::from(lrc(&self.to_bytes(), lrc(payload, 0)));
    }

    /// Packet type mapped from the wire byte, [`PacketType::Unknown`] for
    /// unrecognized values.
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_u8(self.packet_type).unwrap_or(PacketType::Unknown)
    }

    /// The type byte exactly as received.
    pub fn raw_packet_type(&self) -> u8 {
        self.packet_type
    }

    /// Total framed size, header included.
    pub fn packet_size(&self) -> usize {
        usize::from(self.packet_size)
    }

    /// Payload size implied by the size field.
    ///
    /// Zero when the size field claims less than a full header; the buffer
    /// decoder relies on this never going negative.
    pub fn payload_size(&self) -> usize {
        self.packet_size().saturating_sub(Self::SIZE)
    }

    /// Stored checksum field.
    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    /// Integer NTP seconds.
    pub fn ts_high(&self) -> u32 {
        self.ts_high
    }

    /// Fractional NTP seconds scaled by 2^32.
    pub fn ts_low(&self) -> u32 {
        self.ts_low
    }

    /// Timestamp as NTP seconds.
    pub fn time(&self) -> f64 {
        f64::from(self.ts_high) + f64::from(self.ts_low) / Self::FRAC_SCALE
    }
}

/// Split a real NTP timestamp into integer and scaled-fraction words.
fn split_time(time: f64) -> (u32, u32) {
    let clamped = time.max(0.0);
    let high = clamped.trunc();
    let low = (clamped - high) * PacketHeader::FRAC_SCALE;
    (high as u32, low as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_time_inputs() {
        let result = PacketHeader::new(PacketType::FromInstrument, 10, Some(5.0), Some((4, 0)));
        assert!(matches!(result, Err(PacketError::InvalidHeader(_))));
    }

    #[test]
    fn rejects_missing_time() {
        let result = PacketHeader::new(PacketType::FromInstrument, 10, None, None);
        assert!(matches!(result, Err(PacketError::InvalidHeader(_))));
    }

    #[test]
    fn rejects_oversized_payload() {
        let result =
            PacketHeader::new(PacketType::FromInstrument, 0x10000, Some(1.0), None);
        assert!(matches!(result, Err(PacketError::InvalidHeader(_))));
    }

    #[test]
    fn time_splits_and_recombines() {
        let header =
            PacketHeader::new(PacketType::FromInstrument, 0, Some(3_600_000_000.25), None)
                .expect("valid header");
        assert_eq!(header.ts_high(), 3_600_000_000);
        assert_eq!(header.ts_low(), 1 << 30);
        assert!((header.time() - 3_600_000_000.25).abs() < 1e-6);
    }

    #[test]
    fn wire_round_trip() {
        let mut header = PacketHeader::new(PacketType::PaStatus, 9, Some(1234.5), None)
            .expect("valid header");
        header.set_checksum(b"CONNECTED");

        let parsed = PacketHeader::from_wire(&header.to_bytes()).expect("parses");
        assert_eq!(parsed, header);
        assert_eq!(parsed.payload_size(), 9);
        assert_eq!(parsed.packet_type(), PacketType::PaStatus);
    }

    #[test]
    fn golden_wire_layout() {
        let mut header = PacketHeader::new(PacketType::FromInstrument, 6, Some(3.5), None)
            .expect("valid header");
        header.set_checksum(b"abc123");

        let mut framed = header.to_bytes().to_vec();
        framed.extend_from_slice(b"abc123");

        // Layout pinned by recorded datalogs: sync, type, size, LRC,
        // integer seconds, scaled fraction, payload.
        let expected =
            hex::decode("a39d7a01001600800000000380000000616263313233").expect("valid hex");
        assert_eq!(framed, expected);
    }

    #[test]
    fn from_wire_rejects_bad_sync() {
        let mut bytes = [0u8; PacketHeader::SIZE];
        bytes[0] = 0xA3;
        assert!(PacketHeader::from_wire(&bytes).is_err());
        assert!(PacketHeader::from_wire(&bytes[..4]).is_err());
    }
}
