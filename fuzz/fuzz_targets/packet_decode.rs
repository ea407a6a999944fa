//! Fuzz target for Packet::from_buffer
//!
//! This fuzzer scans arbitrary byte sequences for framed packets to find:
//! - Parser crashes or panics
//! - Integer overflows in size calculations
//! - Buffer over-reads
//! - Scan loops that fail to make progress
//!
//! The fuzzer should NEVER panic, and repeated decoding must terminate.

#![no_main]

use libfuzzer_sys::fuzz_target;
use portagent_proto::Packet;

fuzz_target!(|data: &[u8]| {
    let mut buffer = data;
    loop {
        let (packet, rest) = Packet::from_buffer(buffer);
        match packet {
            Some(packet) => {
                // Validity is a property, never a panic.
                let _ = packet.valid();
                // A decoded packet must consume at least its header.
                assert!(rest.len() < buffer.len());
            }
            None => break,
        }
        buffer = rest;
    }
});
