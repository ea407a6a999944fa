//! Reconnecting instrument-side TCP client.
//!
//! One dialer per instrument socket. Dials, tunes the socket, registers
//! with the router, then pumps received bytes upward until the connection
//! drops; connect failures and disconnects retry with exponential backoff
//! capped at [`MAX_RECONNECT_DELAY`]. The dialer is the only component that
//! speaks outward TCP.

use std::{sync::Arc, time::Duration};

use portagent_core::EndpointHandle;
use portagent_proto::{EndpointType, Packet, PacketType};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::watch,
    time::sleep,
};

use crate::{agent::AgentCore, transport};

/// Delay before the first reconnect attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the exponential reconnect backoff.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(240);

/// Command putting a Digi terminal server into binary-timestamp mode, sent
/// automatically on every Digi command connection.
const BINARY_TIMESTAMP: &[u8] = b"time 2\n";

/// Rolling decode buffer bound for Digi-framed connections.
const DIGI_BUFFER_MAX: usize = 65535;

/// How bytes received from the instrument become packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InstrumentFraming {
    /// Wrap each read as one packet of the dialer's packet type.
    Raw,
    /// Upstream already sends framed packets; decode and forward them.
    DigiPackets,
}

/// A reconnecting client for one instrument socket.
pub(crate) struct InstrumentDialer {
    pub(crate) addr: String,
    pub(crate) port: u16,
    pub(crate) packet_type: PacketType,
    pub(crate) endpoint_type: EndpointType,
    pub(crate) framing: InstrumentFraming,
    pub(crate) binary_timestamp: bool,
}

impl InstrumentDialer {
    /// Run the dial/serve/backoff loop until agent shutdown.
    pub(crate) fn spawn(self, core: Arc<AgentCore>) {
        tokio::spawn(self.run(core));
    }

    async fn run(self, core: Arc<AgentCore>) {
        let mut delay = INITIAL_RECONNECT_DELAY;
        let mut shutdown = core.subscribe_shutdown();

        loop {
            let attempt = tokio::select! {
                attempt = TcpStream::connect((self.addr.as_str(), self.port)) => attempt,
                _ = shutdown.changed() => return,
            };

            match attempt {
                Ok(stream) => {
                    delay = INITIAL_RECONNECT_DELAY;
                    tracing::info!(
                        addr = %self.addr,
                        port = self.port,
                        endpoint = self.endpoint_type.label(),
                        "connected to instrument"
                    );
                    if let Err(e) = transport::tune_instrument_socket(&stream) {
                        tracing::debug!("keep-alive tuning failed: {e}");
                    }
                    self.serve(&core, stream, &mut shutdown).await;
                    tracing::warn!(
                        addr = %self.addr,
                        port = self.port,
                        "instrument connection lost"
                    );
                },
                Err(e) => {
                    tracing::warn!(
                        addr = %self.addr,
                        port = self.port,
                        "instrument connect failed: {e}"
                    );
                },
            }

            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                () = sleep(delay) => {},
                _ = shutdown.changed() => return,
            }
            delay = delay.saturating_mul(2).min(MAX_RECONNECT_DELAY);
        }
    }

    /// Serve one established connection until it drops.
    async fn serve(
        &self,
        core: &Arc<AgentCore>,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        let (mut reader, mut writer) = stream.into_split();

        if self.binary_timestamp && writer.write_all(BINARY_TIMESTAMP).await.is_err() {
            return;
        }

        let (handle, queue) = EndpointHandle::pair(core.drained());
        let id = handle.id();
        core.router().lock().await.register(self.endpoint_type, handle);
        core.instrument_connected(id).await;
        tokio::spawn(transport::drain_queue(queue, writer));

        let mut ring: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; 65536];
        loop {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => self.ingest(core, &mut ring, &buf[..n]).await,
                    Err(e) => {
                        tracing::debug!("instrument read error: {e}");
                        break;
                    },
                },
                _ = shutdown.changed() => break,
            }
        }

        core.router().lock().await.deregister(self.endpoint_type, id);
        core.instrument_disconnected(id).await;
    }

    async fn ingest(&self, core: &Arc<AgentCore>, ring: &mut Vec<u8>, data: &[u8]) {
        match self.framing {
            InstrumentFraming::Raw => {
                core.got_data(Packet::create(data.to_vec(), self.packet_type)).await;
            },
            InstrumentFraming::DigiPackets => {
                ring.extend_from_slice(data);
                loop {
                    let (packet, rest) = Packet::from_buffer(ring);
                    let rest = rest.to_vec();
                    *ring = rest;
                    match packet {
                        Some(packet) => core.got_data(vec![packet]).await,
                        None => break,
                    }
                }
                if ring.len() > DIGI_BUFFER_MAX {
                    let excess = ring.len() - DIGI_BUFFER_MAX;
                    ring.drain(..excess);
                }
            },
        }
    }
}
