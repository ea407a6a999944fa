//! Datalog replayers: inject recorded data as if read live.
//!
//! All three variants share a skeleton: wait until a driver client is
//! connected, then process one unit of work per loop iteration with a
//! cooperative yield in between so packets actually flow instead of
//! buffering until end of file. Each replayer registers a flow gate with
//! the router, so an overloaded driver socket pauses replay.

use std::{sync::Arc, time::Duration};

use portagent_core::{FlowGate, FlowSignal, Producer};
use portagent_proto::{EndpointType, Packet, PacketHeader, PacketType};
use regex::bytes::Regex;
use tokio::{io::AsyncReadExt, time::sleep};

use crate::{agent::AgentCore, error::AgentError};

/// Pause between units of work, yielding the loop to deliveries.
const REPLAY_YIELD: Duration = Duration::from_millis(10);

/// Poll interval while waiting for the first driver client.
const CLIENT_POLL: Duration = Duration::from_secs(1);

/// Chunk size for the text replayers.
const CHUNK_SIZE: usize = 1024;

/// Rolling record buffer bound for digi ASCII replay.
const MAX_BUFFER: usize = 65535;

/// Record framing in digi ASCII datalogs. Dot matches newline; the record
/// body sits between the timestamp marker and the closing tag.
const OOI_TS_PATTERN: &str = r"(?s)<OOI-TS (.+?) [TX][NS]>\r\n(.*?)<\\OOI-TS>";

/// Timestamp token in RSN archive file names; when every file carries one,
/// the files are ordered by it.
const UTC_NAME_PATTERN: &str = r"(\d+T\d+_UTC)";

/// Which datalog format to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplayKind {
    /// Concatenated framed packets.
    Datalog,
    /// Digi ASCII records with in-band timestamp markers.
    DigiAscii,
    /// Fixed-size chunks with no framing.
    Chunky,
}

/// Spawn a replayer task over `files`.
pub(crate) fn spawn(core: Arc<AgentCore>, kind: ReplayKind, files: Vec<String>) {
    tokio::spawn(async move {
        if let Err(e) = run(&core, kind, files).await {
            tracing::error!("replay failed: {e}");
            core.request_shutdown();
        }
    });
}

async fn run(core: &Arc<AgentCore>, kind: ReplayKind, files: Vec<String>) -> Result<(), AgentError> {
    let gate = Arc::new(FlowGate::new());
    let mut signal = gate.subscribe();
    core.router().lock().await.register_producer(Arc::clone(&gate) as Arc<dyn Producer>);

    if !wait_for_client(core).await {
        return Ok(());
    }

    let files = order_files(kind, files)?;
    for file in &files {
        tracing::info!(%file, "begin reading");
        let done = match kind {
            ReplayKind::Datalog => replay_datalog(core, &mut signal, file).await?,
            ReplayKind::DigiAscii => replay_digi_ascii(core, &mut signal, file).await?,
            ReplayKind::Chunky => replay_chunks(core, &mut signal, file).await?,
        };
        if !done {
            // Paused producers were stopped; the agent is shutting down.
            return Ok(());
        }
    }

    match kind {
        ReplayKind::DigiAscii => {
            tracing::info!("completed reading digi datalogs");
        },
        ReplayKind::Datalog | ReplayKind::Chunky => {
            tracing::info!("completed reading datalogs, exiting");
            core.request_shutdown();
        },
    }
    Ok(())
}

/// Wait until at least one driver client is connected.
///
/// Returns `false` if the agent shuts down first.
async fn wait_for_client(core: &Arc<AgentCore>) -> bool {
    let mut shutdown = core.subscribe_shutdown();
    loop {
        if core.router().lock().await.client_count(EndpointType::Client) > 0 {
            return true;
        }
        tracing::info!("waiting for a driver connection before replaying");
        tokio::select! {
            () = sleep(CLIENT_POLL) => {},
            _ = shutdown.changed() => return false,
        }
    }
}

/// Order the replay file list.
///
/// Lexicographic by default. For digi ASCII archives whose names all carry
/// a `<digits>T<digits>_UTC` token, order by that token instead.
fn order_files(kind: ReplayKind, mut files: Vec<String>) -> Result<Vec<String>, AgentError> {
    files.sort();

    if kind == ReplayKind::DigiAscii {
        let utc = regex::Regex::new(UTC_NAME_PATTERN)
            .map_err(|e| AgentError::Config(format!("bad file-name pattern: {e}")))?;
        let tokens: Option<Vec<String>> = files
            .iter()
            .map(|file| utc.find(file).map(|m| m.as_str().to_string()))
            .collect();
        if let Some(mut keyed) = tokens.map(|tokens| {
            files.iter().cloned().zip(tokens).collect::<Vec<_>>()
        }) {
            keyed.sort_by(|a, b| a.1.cmp(&b.1));
            files = keyed.into_iter().map(|(file, _)| file).collect();
        }
    }

    Ok(files)
}

/// Replay one binary packet log; unit of work is one packet.
///
/// Only instrument data and configuration packets are injected; everything
/// else in the log is skipped.
async fn replay_datalog(
    core: &Arc<AgentCore>,
    signal: &mut FlowSignal,
    file: &str,
) -> Result<bool, AgentError> {
    let mut file = tokio::fs::File::open(file).await?;
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; 4096];

    loop {
        if !signal.ready().await {
            return Ok(false);
        }

        let (packet, rest) = Packet::from_buffer(&buffer);
        let rest = rest.to_vec();
        buffer = rest;

        if let Some(packet) = packet {
            let ty = packet.header.packet_type();
            if matches!(ty, PacketType::FromInstrument | PacketType::PaConfig) {
                core.got_data(vec![packet]).await;
            }
            sleep(REPLAY_YIELD).await;
            continue;
        }

        // No sync in sight; cap scan-buffer growth on garbage input.
        if buffer.len() > MAX_BUFFER {
            let excess = buffer.len() - MAX_BUFFER;
            buffer.drain(..excess);
        }

        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(true);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Replay one digi ASCII log; unit of work is one chunk of input.
async fn replay_digi_ascii(
    core: &Arc<AgentCore>,
    signal: &mut FlowSignal,
    file: &str,
) -> Result<bool, AgentError> {
    let marker = Regex::new(OOI_TS_PATTERN)
        .map_err(|e| AgentError::Config(format!("bad record pattern: {e}")))?;

    let mut file = tokio::fs::File::open(file).await?;
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        if !signal.ready().await {
            return Ok(false);
        }

        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(true);
        }
        buffer.extend_from_slice(&chunk[..n]);

        let mut packets = Vec::new();
        let mut consumed = 0;
        for captures in marker.captures_iter(&buffer) {
            let (Some(whole), Some(stamp), Some(body)) =
                (captures.get(0), captures.get(1), captures.get(2))
            else {
                continue;
            };
            consumed = whole.end();
            match record_packet(stamp.as_bytes(), body.as_bytes()) {
                Ok(packet) => packets.push(packet),
                Err(e) => {
                    tracing::error!(
                        record = %String::from_utf8_lossy(whole.as_bytes()),
                        "unable to extract timestamp from record: {e}"
                    );
                },
            }
        }

        if consumed > 0 {
            buffer.drain(..consumed);
        }
        if buffer.len() > MAX_BUFFER {
            let excess = buffer.len() - MAX_BUFFER;
            buffer.drain(..excess);
        }

        core.got_data(packets).await;
        sleep(REPLAY_YIELD).await;
    }
}

/// Build an instrument packet from one timestamped record.
fn record_packet(stamp: &[u8], body: &[u8]) -> Result<Packet, AgentError> {
    let stamp = std::str::from_utf8(stamp)
        .map_err(|e| AgentError::Config(format!("non-text timestamp: {e}")))?;
    let time = portagent_proto::ntp_from_iso8601(stamp)
        .map_err(|e| AgentError::Config(e.to_string()))?;

    let mut header = PacketHeader::new(PacketType::FromInstrument, body.len(), Some(time), None)
        .map_err(|e| AgentError::Config(e.to_string()))?;
    header.set_checksum(body);
    Ok(Packet::from_parts(header, body.to_vec()))
}

/// Replay one unframed file in fixed chunks; unit of work is one chunk.
///
/// Chunks carry a zero timestamp; drivers take the definitive time from
/// the record contents.
async fn replay_chunks(
    core: &Arc<AgentCore>,
    signal: &mut FlowSignal,
    file: &str,
) -> Result<bool, AgentError> {
    let mut file = tokio::fs::File::open(file).await?;
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        if !signal.ready().await {
            return Ok(false);
        }

        let n = file.read(&mut chunk).await?;
        if n == 0 {
            return Ok(true);
        }

        match PacketHeader::new(PacketType::FromInstrument, n, Some(0.0), None) {
            Ok(mut header) => {
                header.set_checksum(&chunk[..n]);
                let packet = Packet::from_parts(header, chunk[..n].to_vec());
                core.got_data(vec![packet]).await;
            },
            Err(e) => tracing::error!("cannot frame chunk: {e}"),
        }

        sleep(REPLAY_YIELD).await;
    }
}
