//! Pull decoder over a file-like source.

use std::io::{self, ErrorKind, Read};

use crate::packet::Packet;

const READ_CHUNK: usize = 4096;

/// Decodes framed packets from any [`Read`] source.
///
/// Applies the same scan rules as [`Packet::from_buffer`]: bytes before a
/// sync pattern are skipped, partial packets are retained across reads.
/// Recorded datalog files are decoded with this.
pub struct PacketStream<R> {
    inner: R,
    buffer: Vec<u8>,
    eof: bool,
}

impl<R: Read> PacketStream<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner, buffer: Vec::new(), eof: false }
    }

    /// Decode the next packet, reading more input as needed.
    ///
    /// Returns `Ok(None)` once the source is exhausted and no complete
    /// packet remains buffered. Trailing garbage after the last packet is
    /// discarded.
    pub fn next_packet(&mut self) -> io::Result<Option<Packet>> {
        loop {
            let (packet, rest) = Packet::from_buffer(&self.buffer);
            let rest = rest.to_vec();
            let found = packet.is_some();
            self.buffer = rest;
            if found {
                return Ok(packet);
            }

            if self.eof {
                return Ok(None);
            }

            let mut chunk = [0u8; READ_CHUNK];
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Iterator for PacketStream<R> {
    type Item = io::Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::types::PacketType;

    #[test]
    fn reads_one_packet() {
        let packet = Packet::create(&b"abc123"[..], PacketType::FromInstrument).remove(0);
        let mut stream = PacketStream::new(Cursor::new(packet.data().to_vec()));

        let decoded = stream.next_packet().expect("io ok").expect("one packet");
        assert_eq!(decoded.payload.as_ref(), b"abc123");
        assert!(decoded.valid());
        assert!(stream.next_packet().expect("io ok").is_none());
    }

    #[test]
    fn skips_junk_between_packets() {
        let mut data = Vec::new();
        for _ in 0..3 {
            data.extend_from_slice(
                &Packet::create(&b"abc123"[..], PacketType::FromInstrument).remove(0).data(),
            );
            data.extend_from_slice(b"kj34jk3h45");
        }

        let stream = PacketStream::new(Cursor::new(data));
        let decoded: Vec<_> = stream.collect::<io::Result<_>>().expect("io ok");

        assert_eq!(decoded.len(), 3);
        assert!(decoded.iter().all(Packet::valid));
    }

    #[test]
    fn truncated_tail_yields_none() {
        let framed = Packet::create(&b"abc123"[..], PacketType::FromInstrument).remove(0).data();
        let mut stream = PacketStream::new(Cursor::new(framed[..framed.len() - 1].to_vec()));
        assert!(stream.next_packet().expect("io ok").is_none());
    }
}
