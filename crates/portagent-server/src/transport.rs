//! Socket tuning and writer-task plumbing shared by listeners and dialers.

use std::{io, time::Duration};

use portagent_core::EndpointQueue;
use socket2::{SockRef, TcpKeepalive};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpStream, tcp::OwnedWriteHalf},
};

/// Keep-alive idle time on instrument sockets.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(100);

/// Keep-alive probe interval on instrument sockets.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

/// Factor applied to the OS-default receive buffer on the data port.
///
/// A bursty high-rate instrument (hydrophones especially) can otherwise
/// overrun a freshly accepted driver socket.
const RECV_BUFFER_FACTOR: usize = 10;

/// Disable Nagle and arm TCP keep-alive on an instrument socket.
pub(crate) fn tune_instrument_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    let keepalive =
        TcpKeepalive::new().with_time(KEEPALIVE_IDLE).with_interval(KEEPALIVE_INTERVAL);
    sock.set_tcp_keepalive(&keepalive)
}

/// Grow the receive buffer on an accepted driver socket.
pub(crate) fn enlarge_recv_buffer(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    let current = sock.recv_buffer_size()?;
    sock.set_recv_buffer_size(current.saturating_mul(RECV_BUFFER_FACTOR))
}

/// Drain an endpoint queue into a socket write half.
///
/// Runs until the router deregisters the handle (closing the queue) or the
/// peer stops accepting writes. Marking bytes written is what lets the
/// router resume paused producers.
pub(crate) async fn drain_queue(mut queue: EndpointQueue, mut writer: OwnedWriteHalf) {
    while let Some(data) = queue.next().await {
        let len = data.len();
        if let Err(e) = writer.write_all(&data).await {
            tracing::debug!("outbound write failed: {e}");
            return;
        }
        queue.mark_written(len);
    }
    let _ = writer.shutdown().await;
}
