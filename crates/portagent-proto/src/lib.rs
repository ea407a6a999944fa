//! Wire packet format for the port agent.
//!
//! Every byte that passes through a port agent is framed into a
//! self-describing packet: a fixed 16-byte big-endian header (sync pattern,
//! packet type, size, LRC checksum, NTP timestamp) followed by an opaque
//! payload. This crate implements the framing, the checksum, the buffer and
//! stream decoders, and the timestamp conversions. It performs no I/O beyond
//! [`PacketStream`] pulling from a caller-supplied reader.
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//! 0       3     SYNC = A3 9D 7A
//! 3       1     packet type
//! 4       2     packet size (header + payload)
//! 6       2     checksum (cumulative XOR, zeroed during computation)
//! 8       4     NTP integer seconds since 1900-01-01 UTC
//! 12      4     NTP fractional seconds x 2^32
//! ```

mod errors;
mod header;
mod lrc;
mod packet;
mod stream;
mod time;
mod types;

pub use errors::{PacketError, Result};
pub use header::PacketHeader;
pub use lrc::lrc;
pub use packet::Packet;
pub use stream::PacketStream;
pub use time::{NTP_UNIX_DELTA, ntp_from_iso8601, ntp_now};
pub use types::{EndpointType, Format, PacketType};
