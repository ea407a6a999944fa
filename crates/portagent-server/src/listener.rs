//! Inbound listeners: data port, command port, optional sniffer.

use std::sync::Arc;

use bytes::BytesMut;
use portagent_core::{CommandHandler, EndpointHandle};
use portagent_proto::{EndpointType, Packet, PacketType};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
};

use crate::{agent::AgentCore, error::AgentError, transport};

/// Bind a listening socket on all interfaces.
///
/// Port 0 binds an ephemeral port; the caller reads the bound address back
/// and reports it to the service registry.
pub(crate) async fn bind(role: &'static str, port: u16) -> Result<TcpListener, AgentError> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| AgentError::Listen { role, port, source })
}

/// Accept driver connections on the data port.
pub(crate) fn spawn_data_listener(core: Arc<AgentCore>, listener: TcpListener) {
    spawn_accept_loop(core, listener, "driver", |core, stream| {
        tokio::spawn(serve_driver(core, stream));
    });
}

/// Accept operator connections on the command port.
pub(crate) fn spawn_command_listener(
    core: Arc<AgentCore>,
    listener: TcpListener,
    handler: Arc<CommandHandler>,
) {
    spawn_accept_loop(core, listener, "command", move |core, stream| {
        tokio::spawn(serve_command(core, stream, Arc::clone(&handler)));
    });
}

/// Accept read-only observers on the sniffer port.
pub(crate) fn spawn_sniffer_listener(core: Arc<AgentCore>, listener: TcpListener) {
    spawn_accept_loop(core, listener, "sniffer", |core, stream| {
        tokio::spawn(serve_sniffer(core, stream));
    });
}

fn spawn_accept_loop(
    core: Arc<AgentCore>,
    listener: TcpListener,
    role: &'static str,
    serve: impl Fn(Arc<AgentCore>, TcpStream) + Send + 'static,
) {
    tokio::spawn(async move {
        let mut shutdown = core.subscribe_shutdown();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, role, "incoming connection");
                        serve(Arc::clone(&core), stream);
                    },
                    Err(e) => tracing::error!(role, "accept error: {e}"),
                },
                _ = shutdown.changed() => return,
            }
        }
    });
}

/// One driver connection: bytes in become `FROM_DRIVER` packets, routed
/// packets stream back out.
async fn serve_driver(core: Arc<AgentCore>, stream: TcpStream) {
    if let Err(e) = transport::enlarge_recv_buffer(&stream) {
        tracing::debug!("receive buffer tuning failed: {e}");
    }

    let (mut reader, writer) = stream.into_split();
    let (handle, queue) = EndpointHandle::pair(core.drained());
    let id = handle.id();
    core.router().lock().await.register(EndpointType::Client, handle);
    tokio::spawn(transport::drain_queue(queue, writer));

    let mut shutdown = core.subscribe_shutdown();
    let mut buf = vec![0u8; 65536];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    core.got_data(Packet::create(buf[..n].to_vec(), PacketType::FromDriver)).await;
                },
                Err(e) => {
                    tracing::debug!("driver read error: {e}");
                    break;
                },
            },
            _ = shutdown.changed() => break,
        }
    }

    core.router().lock().await.deregister(EndpointType::Client, id);
    tracing::info!(id, "driver disconnected");
}

/// One operator connection: newline-delimited command lines, audited and
/// dispatched; replies routed back as raw text.
async fn serve_command(core: Arc<AgentCore>, stream: TcpStream, handler: Arc<CommandHandler>) {
    let (mut reader, writer) = stream.into_split();
    let (handle, queue) = EndpointHandle::pair(core.drained());
    let id = handle.id();
    core.router().lock().await.register(EndpointType::Command, handle);
    tokio::spawn(transport::drain_queue(queue, writer));

    let mut shutdown = core.subscribe_shutdown();
    let mut pending = BytesMut::with_capacity(4096);
    let mut buf = vec![0u8; 4096];
    'conn: loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break 'conn,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                        let line = pending.split_to(pos + 1);
                        let line = &line[..line.len() - 1];
                        // Audit the raw line before acting on it.
                        core.got_data(Packet::create(line.to_vec(), PacketType::PaCommand)).await;
                        core.got_data(handler.dispatch(line)).await;
                    }
                },
                Err(e) => {
                    tracing::debug!("command read error: {e}");
                    break 'conn;
                },
            },
            _ = shutdown.changed() => break 'conn,
        }
    }

    core.router().lock().await.deregister(EndpointType::Command, id);
    tracing::info!(id, "command connection closed");
}

/// One sniffer connection: receives every packet as ASCII, sends nothing
/// meaningful (input is framed as `UNKNOWN` and reaches only the log
/// sinks).
async fn serve_sniffer(core: Arc<AgentCore>, stream: TcpStream) {
    let (mut reader, writer) = stream.into_split();
    let (handle, queue) = EndpointHandle::pair(core.drained());
    let id = handle.id();
    core.router().lock().await.register(EndpointType::Logger, handle);
    tokio::spawn(transport::drain_queue(queue, writer));

    let mut shutdown = core.subscribe_shutdown();
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    core.got_data(Packet::create(buf[..n].to_vec(), PacketType::Unknown)).await;
                },
                Err(_) => break,
            },
            _ = shutdown.changed() => break,
        }
    }

    core.router().lock().await.deregister(EndpointType::Logger, id);
}
