//! Typed packet router.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use portagent_proto::{EndpointType, Format, Packet, PacketType};
use tokio::sync::{Notify, mpsc};

use crate::flow::Producer;

/// Interval at which router statistics are logged and reset.
pub const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Queued bytes on a driver connection above which producers pause.
const HIGH_WATERMARK: usize = 512 * 1024;

/// Queued bytes below which paused producers resume.
const LOW_WATERMARK: usize = 64 * 1024;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Which packet types a routing rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSelector {
    /// Every concrete packet type; expanded at insertion time.
    All,
    /// A single packet type.
    Only(PacketType),
}

impl From<PacketType> for PacketSelector {
    fn from(packet_type: PacketType) -> Self {
        Self::Only(packet_type)
    }
}

/// Write half of an endpoint connection, as stored in the router.
///
/// Accepts one pre-formatted byte string per write and enqueues it for the
/// connection's writer task. Writes after the peer side is gone are
/// silently discarded.
#[derive(Debug, Clone)]
pub struct EndpointHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    queued: Arc<AtomicUsize>,
}

impl EndpointHandle {
    /// Create a connected handle/queue pair.
    ///
    /// `drained` is signalled whenever the queue empties below the low
    /// watermark; the agent listens on it to resume paused producers.
    pub fn pair(drained: Arc<Notify>) -> (Self, EndpointQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let handle = Self { id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed), tx, queued };
        let queue = EndpointQueue { rx, queued: Arc::clone(&handle.queued), drained };
        (handle, queue)
    }

    /// Stable identity used for deregistration.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue one pre-formatted write.
    pub fn write(&self, data: Bytes) {
        self.queued.fetch_add(data.len(), Ordering::Relaxed);
        // A closed receiver means the connection is tearing down; the
        // write is discarded.
        let _ = self.tx.send(data);
    }

    fn queued_bytes(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

/// Read half drained by a connection's writer task.
#[derive(Debug)]
pub struct EndpointQueue {
    rx: mpsc::UnboundedReceiver<Bytes>,
    queued: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl EndpointQueue {
    /// Next byte string to write, or `None` when the handle side is gone.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Record that `n` bytes reached the socket.
    ///
    /// Dropping below the low watermark wakes the drain listener so paused
    /// producers can resume.
    pub fn mark_written(&self, n: usize) {
        let before = self.queued.fetch_sub(n, Ordering::Relaxed);
        if before >= LOW_WATERMARK && before.saturating_sub(n) < LOW_WATERMARK {
            self.drained.notify_one();
        }
    }
}

/// Counters kept by the router, reset on every statistics report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Routing rules added.
    pub add_route: u64,
    /// Client handles registered.
    pub add_client: u64,
    /// Client handles deregistered.
    pub del_client: u64,
    /// Packets accepted by `got_data`.
    pub packets_in: u64,
    /// Packet writes fanned out.
    pub packets_out: u64,
    /// Framed bytes accepted.
    pub bytes_in: u64,
    /// Framed bytes fanned out.
    pub bytes_out: u64,
}

/// Routes packets to groups of endpoints based on endpoint type.
///
/// Packets are routed by packet type: each rule maps a type to an endpoint
/// type and an output format, and every handle registered under that
/// endpoint type receives the packet materialised in that format. The
/// materialisations are computed at most once per packet, the ASCII line
/// only when a subscribed rule actually asks for it.
pub struct Router {
    routes: HashMap<PacketType, HashSet<(EndpointType, Format)>>,
    clients: HashMap<EndpointType, Vec<EndpointHandle>>,
    producers: Vec<Arc<dyn Producer>>,
    stats: RouterStats,
    paused: bool,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a router with no routes, clients or producers.
    pub fn new() -> Self {
        let routes = PacketType::ALL.into_iter().map(|ty| (ty, HashSet::new())).collect();
        Self {
            routes,
            clients: HashMap::new(),
            producers: Vec::new(),
            stats: RouterStats::default(),
            paused: false,
        }
    }

    /// Route packets matching `selector` to endpoints of `endpoint_type`,
    /// materialised as `format`.
    ///
    /// `PacketSelector::All` expands into one rule per concrete packet
    /// type. Duplicate rules are idempotent.
    pub fn add_route(
        &mut self,
        selector: impl Into<PacketSelector>,
        endpoint_type: EndpointType,
        format: Format,
    ) {
        self.stats.add_route += 1;
        match selector.into() {
            PacketSelector::All => {
                for packet_type in PacketType::ALL {
                    self.insert_route(packet_type, endpoint_type, format);
                }
            },
            PacketSelector::Only(packet_type) => {
                self.insert_route(packet_type, endpoint_type, format);
            },
        }
    }

    fn insert_route(&mut self, packet_type: PacketType, endpoint_type: EndpointType, format: Format) {
        tracing::debug!(
            packet_type = packet_type.label(),
            endpoint_type = endpoint_type.label(),
            ?format,
            "add route"
        );
        self.routes.entry(packet_type).or_default().insert((endpoint_type, format));
    }

    /// Register a connection handle under `endpoint_type`.
    pub fn register(&mut self, endpoint_type: EndpointType, handle: EndpointHandle) {
        self.stats.add_client += 1;
        tracing::info!(endpoint_type = endpoint_type.label(), id = handle.id(), "register");
        self.clients.entry(endpoint_type).or_default().push(handle);
    }

    /// Remove the handle with `id` from `endpoint_type`.
    ///
    /// Unknown ids are ignored; disconnection races are benign.
    pub fn deregister(&mut self, endpoint_type: EndpointType, id: u64) {
        self.stats.del_client += 1;
        tracing::info!(endpoint_type = endpoint_type.label(), id, "deregister");
        if let Some(handles) = self.clients.get_mut(&endpoint_type) {
            handles.retain(|handle| handle.id() != id);
        }
    }

    /// Number of handles registered under `endpoint_type`.
    pub fn client_count(&self, endpoint_type: EndpointType) -> usize {
        self.clients.get(&endpoint_type).map_or(0, Vec::len)
    }

    /// Route a batch of packets.
    ///
    /// This is the single serialisation point for fan-out; hold the router
    /// lock across the whole batch. Writes enqueue into each connection's
    /// channel and return immediately.
    pub fn got_data(&mut self, packets: &[Packet]) {
        for packet in packets {
            self.stats.packets_in += 1;
            self.stats.bytes_in += packet.header.packet_size() as u64;
            self.dispatch(packet);
        }

        if !self.paused && self.driver_backlog() > HIGH_WATERMARK {
            tracing::warn!("driver backlog over high watermark; pausing producers");
            self.pause_producers();
        }
    }

    fn dispatch(&mut self, packet: &Packet) {
        let Some(rules) = self.routes.get(&packet.header.packet_type()) else {
            return;
        };

        // Materialise each format at most once; ASCII only on demand.
        let raw = packet.payload.clone();
        let mut framed: Option<Bytes> = None;
        let mut ascii: Option<Bytes> = None;

        let mut out_packets = 0u64;
        let mut out_bytes = 0u64;
        for (endpoint_type, format) in rules {
            let Some(handles) = self.clients.get(endpoint_type) else {
                continue;
            };
            for handle in handles {
                let data = match format {
                    Format::Raw => raw.clone(),
                    Format::Packet => framed.get_or_insert_with(|| packet.data()).clone(),
                    Format::Ascii => {
                        ascii.get_or_insert_with(|| Bytes::from(packet.log_line())).clone()
                    },
                };
                out_packets += 1;
                out_bytes += packet.header.packet_size() as u64;
                handle.write(data);
            }
        }
        self.stats.packets_out += out_packets;
        self.stats.bytes_out += out_bytes;
    }

    fn driver_backlog(&self) -> usize {
        self.clients
            .get(&EndpointType::Client)
            .map_or(0, |handles| {
                handles.iter().map(EndpointHandle::queued_bytes).max().unwrap_or(0)
            })
    }

    /// Register an upstream source for pause/resume/stop fan-out.
    pub fn register_producer(&mut self, producer: Arc<dyn Producer>) {
        self.producers.push(producer);
    }

    /// Remove a previously registered upstream source.
    pub fn deregister_producer(&mut self, producer: &Arc<dyn Producer>) {
        self.producers.retain(|candidate| !Arc::ptr_eq(candidate, producer));
    }

    /// Pause every registered producer.
    pub fn pause_producers(&mut self) {
        self.paused = true;
        for producer in &self.producers {
            producer.pause();
        }
    }

    /// Resume paused producers once every driver queue has drained.
    pub fn maybe_resume_producers(&mut self) {
        if self.paused && self.driver_backlog() < LOW_WATERMARK {
            tracing::info!("driver backlog drained; resuming producers");
            self.paused = false;
            for producer in &self.producers {
                producer.resume();
            }
        }
    }

    /// Stop every registered producer; used at shutdown.
    pub fn stop_producers(&mut self) {
        for producer in &self.producers {
            producer.stop();
        }
    }

    /// Counters accumulated since the last reset.
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Log the counters accumulated over `STATS_INTERVAL` and reset them.
    pub fn log_stats(&mut self) {
        let interval = STATS_INTERVAL.as_secs_f64();
        let stats = self.stats;
        tracing::info!(
            registered = stats.add_client,
            deregistered = stats.del_client,
            "router stats (clients)"
        );
        tracing::info!(
            packets_in = stats.packets_in,
            in_rate = stats.packets_in as f64 / interval,
            packets_out = stats.packets_out,
            out_rate = stats.packets_out as f64 / interval,
            "router stats (packets)"
        );
        tracing::info!(
            kb_in = stats.bytes_in / 1000,
            in_kb_rate = stats.bytes_in as f64 / 1000.0 / interval,
            kb_out = stats.bytes_out / 1000,
            out_kb_rate = stats.bytes_out as f64 / 1000.0 / interval,
            "router stats (bytes)"
        );
        self.stats = RouterStats::default();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;

    fn test_pair() -> (EndpointHandle, EndpointQueue) {
        EndpointHandle::pair(Arc::new(Notify::new()))
    }

    fn drain_now(queue: &mut EndpointQueue) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(data) = queue.rx.try_recv() {
            out.push(data);
        }
        out
    }

    fn packet(payload: &[u8], ty: PacketType) -> Packet {
        Packet::create_at(payload.to_vec(), ty, 1000.0).remove(0)
    }

    #[test]
    fn routes_by_packet_type_and_format() {
        let mut router = Router::new();
        router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Packet);
        router.add_route(PacketType::FromDriver, EndpointType::Instrument, Format::Raw);

        let (client, mut client_q) = test_pair();
        let (instrument, mut instrument_q) = test_pair();
        router.register(EndpointType::Client, client);
        router.register(EndpointType::Instrument, instrument);

        let inst_packet = packet(b"data", PacketType::FromInstrument);
        let drv_packet = packet(b"cmd", PacketType::FromDriver);
        router.got_data(&[inst_packet.clone(), drv_packet.clone()]);

        assert_eq!(drain_now(&mut client_q), vec![inst_packet.data()]);
        assert_eq!(drain_now(&mut instrument_q), vec![Bytes::from_static(b"cmd")]);
    }

    #[test]
    fn all_selector_expands_per_type() {
        let mut router = Router::new();
        router.add_route(PacketSelector::All, EndpointType::Logger, Format::Ascii);

        let (logger, mut logger_q) = test_pair();
        router.register(EndpointType::Logger, logger);

        for ty in PacketType::ALL {
            router.got_data(&[packet(b"x", ty)]);
        }

        let lines = drain_now(&mut logger_q);
        assert_eq!(lines.len(), PacketType::ALL.len());
        assert!(lines.iter().all(|line| line.ends_with(b"\n")));
    }

    #[test]
    fn every_matching_client_receives_exactly_one_write() {
        let mut router = Router::new();
        router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Packet);

        let (first, mut first_q) = test_pair();
        let (second, mut second_q) = test_pair();
        router.register(EndpointType::Client, first);
        router.register(EndpointType::Client, second);

        router.got_data(&[packet(b"data", PacketType::FromInstrument)]);

        assert_eq!(drain_now(&mut first_q).len(), 1);
        assert_eq!(drain_now(&mut second_q).len(), 1);
        assert_eq!(router.stats().packets_out, 2);
    }

    #[test]
    fn deregistered_clients_stop_receiving() {
        let mut router = Router::new();
        router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Raw);

        let (client, mut client_q) = test_pair();
        let id = client.id();
        router.register(EndpointType::Client, client);
        router.got_data(&[packet(b"one", PacketType::FromInstrument)]);

        router.deregister(EndpointType::Client, id);
        router.got_data(&[packet(b"two", PacketType::FromInstrument)]);

        assert_eq!(drain_now(&mut client_q), vec![Bytes::from_static(b"one")]);
        assert_eq!(router.client_count(EndpointType::Client), 0);
    }

    #[test]
    fn unrouted_types_are_dropped() {
        let mut router = Router::new();
        let (client, mut client_q) = test_pair();
        router.register(EndpointType::Client, client);

        router.got_data(&[packet(b"data", PacketType::FromInstrument)]);

        assert!(drain_now(&mut client_q).is_empty());
        assert_eq!(router.stats().packets_in, 1);
        assert_eq!(router.stats().packets_out, 0);
    }

    #[test]
    fn stats_reset_after_logging() {
        let mut router = Router::new();
        router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Raw);
        let (client, _client_q) = test_pair();
        router.register(EndpointType::Client, client);
        router.got_data(&[packet(b"data", PacketType::FromInstrument)]);

        assert_ne!(router.stats(), RouterStats::default());
        router.log_stats();
        assert_eq!(router.stats(), RouterStats::default());
    }

    struct CountingProducer {
        paused: AtomicU32,
        resumed: AtomicU32,
        stopped: AtomicU32,
    }

    impl CountingProducer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                paused: AtomicU32::new(0),
                resumed: AtomicU32::new(0),
                stopped: AtomicU32::new(0),
            })
        }
    }

    impl Producer for CountingProducer {
        fn pause(&self) {
            self.paused.fetch_add(1, Ordering::Relaxed);
        }
        fn resume(&self) {
            self.resumed.fetch_add(1, Ordering::Relaxed);
        }
        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn backlog_pauses_and_drain_resumes_producers() {
        let mut router = Router::new();
        router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Raw);

        let producer = CountingProducer::new();
        router.register_producer(Arc::clone(&producer) as Arc<dyn Producer>);

        let (client, mut client_q) = test_pair();
        router.register(EndpointType::Client, client);

        // Enough multi-kilobyte packets to cross the high watermark.
        let payload = vec![b'x'; 32 * 1024];
        for _ in 0..17 {
            router.got_data(&[packet(&payload, PacketType::FromInstrument)]);
        }
        assert_eq!(producer.paused.load(Ordering::Relaxed), 1);

        // Premature resume attempts are ignored until the queue drains.
        router.maybe_resume_producers();
        assert_eq!(producer.resumed.load(Ordering::Relaxed), 0);

        for data in drain_now(&mut client_q) {
            client_q.mark_written(data.len());
        }
        router.maybe_resume_producers();
        assert_eq!(producer.resumed.load(Ordering::Relaxed), 1);

        router.stop_producers();
        assert_eq!(producer.stopped.load(Ordering::Relaxed), 1);
    }
}
