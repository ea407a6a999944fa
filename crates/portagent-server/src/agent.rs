//! Agent orchestrator.
//!
//! A [`PortAgent`] wires the connection plane together for one deployment:
//! routing table, log sinks, the three listeners, periodic tasks
//! (heartbeat, statistics, producer resume) and the variant-specific
//! instrument dialers or datalog replayer. Variants are configurations of
//! this one orchestrator, not subtypes.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use portagent_core::{CommandHandler, PacketSelector, Router, STATS_INTERVAL};
use portagent_proto::{EndpointType, Format, Packet, PacketType};
use tokio::sync::{Mutex, Notify, watch};

use crate::{
    config::{AgentConfig, AgentType},
    discovery::{NoopRegistry, ServiceRegistry},
    error::AgentError,
    instrument::{InstrumentDialer, InstrumentFraming},
    listener, logger,
    replay::{self, ReplayKind},
};

/// Interval between heartbeat packets and liveness refreshes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Commands the RSN variant forwards to the Digi side-band port.
const DIGI_COMMANDS: [&str; 9] =
    ["help", "tinfo", "cinfo", "time", "timestamp", "power", "break", "gettime", "getver"];

/// Live instrument connections versus the variant's expected count.
struct ConnectionState {
    live: HashSet<u64>,
    expected: usize,
    connected: bool,
}

impl ConnectionState {
    fn new(expected: usize) -> Self {
        // A replay agent expects no sockets and counts as connected.
        Self { live: HashSet::new(), expected, connected: expected == 0 }
    }

    /// Recompute the aggregate state; `Some` on a transition.
    fn update(&mut self) -> Option<bool> {
        let now = self.live.len() == self.expected;
        if now == self.connected {
            return None;
        }
        self.connected = now;
        Some(now)
    }
}

/// Shared agent state referenced by every connection and timer task.
pub(crate) struct AgentCore {
    config: AgentConfig,
    router: Mutex<Router>,
    drained: Arc<Notify>,
    state: StdMutex<ConnectionState>,
    shutdown: watch::Sender<bool>,
    registry: Box<dyn ServiceRegistry>,
}

impl AgentCore {
    /// The router, behind the single serialisation lock.
    pub(crate) fn router(&self) -> &Mutex<Router> {
        &self.router
    }

    /// Notifier signalled when a driver queue drains.
    pub(crate) fn drained(&self) -> Arc<Notify> {
        Arc::clone(&self.drained)
    }

    /// Receiver flipping to `true` on agent shutdown.
    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every task to wind down.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Route a batch of packets.
    pub(crate) async fn got_data(&self, packets: Vec<Packet>) {
        if packets.is_empty() {
            return;
        }
        self.router.lock().await.got_data(&packets);
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a live instrument connection; emits `PA_STATUS` on aggregate
    /// transitions.
    pub(crate) async fn instrument_connected(&self, id: u64) {
        let transition = {
            let mut state = self.lock_state();
            state.live.insert(id);
            state.update()
        };
        self.report_transition(transition).await;
    }

    /// Record a lost instrument connection; emits `PA_STATUS` on aggregate
    /// transitions.
    pub(crate) async fn instrument_disconnected(&self, id: u64) {
        let transition = {
            let mut state = self.lock_state();
            state.live.remove(&id);
            state.update()
        };
        self.report_transition(transition).await;
    }

    async fn report_transition(&self, transition: Option<bool>) {
        if let Some(connected) = transition {
            tracing::info!(connected, "instrument connection state changed");
            self.got_data(Packet::create(status_label(connected), PacketType::PaStatus)).await;
        }
    }

    /// Current aggregate state as a `PA_STATUS` packet.
    fn state_packet(&self) -> Vec<Packet> {
        let connected = {
            let state = self.lock_state();
            state.live.len() == state.expected
        };
        Packet::create(status_label(connected), PacketType::PaStatus)
    }
}

fn status_label(connected: bool) -> &'static str {
    if connected { "CONNECTED" } else { "DISCONNECTED" }
}

/// A running port agent.
pub struct PortAgent {
    core: Arc<AgentCore>,
    data_addr: SocketAddr,
    command_addr: SocketAddr,
    sniff_addr: Option<SocketAddr>,
}

impl PortAgent {
    /// Start an agent with no external service registry.
    pub async fn start(config: AgentConfig) -> Result<Self, AgentError> {
        Self::start_with_registry(config, Box::new(NoopRegistry)).await
    }

    /// Start an agent, reporting listener ports to `registry`.
    ///
    /// Binds the listeners, attaches log sinks and routes, spawns the
    /// periodic tasks and the variant-specific instrument dialers or
    /// replayer. Returns once all listeners are bound.
    pub async fn start_with_registry(
        config: AgentConfig,
        registry: Box<dyn ServiceRegistry>,
    ) -> Result<Self, AgentError> {
        config.validate()?;

        let expected = match config.agent_type {
            AgentType::Tcp => 1,
            AgentType::Rsn | AgentType::Botpt => 2,
            AgentType::Datalog | AgentType::DigilogAscii | AgentType::Chunky => 0,
        };

        let core = Arc::new(AgentCore {
            config: config.clone(),
            router: Mutex::new(Router::new()),
            drained: Arc::new(Notify::new()),
            state: StdMutex::new(ConnectionState::new(expected)),
            shutdown: watch::Sender::new(false),
            registry,
        });

        {
            let mut router = core.router.lock().await;
            create_routes(&mut router);
            if !config.agent_type.is_replay() {
                let name = config.name();
                let datalog = logger::spawn_daily_sink(format!("{name}.datalog"), core.drained())?;
                let ascii = logger::spawn_daily_sink(format!("{name}.log"), core.drained())?;
                router.register(EndpointType::DataLogger, datalog);
                router.register(EndpointType::Logger, ascii);
            }
        }

        let handler = Arc::new(build_commands(&core));

        let data_listener = listener::bind("data", config.port).await?;
        let data_addr = data_listener.local_addr()?;
        let command_listener = listener::bind("command", config.command_port).await?;
        let command_addr = command_listener.local_addr()?;
        let sniff_listener = match config.sniff_port {
            Some(port) => Some(listener::bind("sniffer", port).await?),
            None => None,
        };
        let sniff_addr = match &sniff_listener {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };

        let refdes = config.refdes();
        let mut service_ids = vec![
            register_port(&core, &format!("{refdes}-port-agent"), data_addr.port()),
            register_port(&core, &format!("{refdes}-command-port-agent"), command_addr.port()),
        ];
        if let Some(addr) = sniff_addr {
            service_ids.push(register_port(&core, &format!("{refdes}-sniff-port-agent"), addr.port()));
        }

        listener::spawn_data_listener(Arc::clone(&core), data_listener);
        listener::spawn_command_listener(Arc::clone(&core), command_listener, handler);
        if let Some(listener) = sniff_listener {
            listener::spawn_sniffer_listener(Arc::clone(&core), listener);
        }

        spawn_heartbeat(Arc::clone(&core), service_ids);
        spawn_stats(Arc::clone(&core));
        spawn_resume(Arc::clone(&core));

        start_variant(&core, &config)?;

        tracing::info!(
            agent_type = config.agent_type.label(),
            %data_addr,
            %command_addr,
            "port agent started"
        );

        Ok(Self { core, data_addr, command_addr, sniff_addr })
    }

    /// Address of the data port.
    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Address of the command port.
    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }

    /// Address of the sniffer port, when configured.
    pub fn sniff_addr(&self) -> Option<SocketAddr> {
        self.sniff_addr
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.core.request_shutdown();
    }

    /// Run until interrupted or a replayer finishes its files.
    ///
    /// Stops producers, tears down listeners and closes sockets before
    /// returning.
    pub async fn run(&self) {
        let mut shutdown = self.core.subscribe_shutdown();
        if !*shutdown.borrow_and_update() {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                },
                _ = shutdown.changed() => {},
            }
        }
        self.core.request_shutdown();
        self.core.router.lock().await.stop_producers();
    }
}

/// The full routing table every variant installs.
fn create_routes(router: &mut Router) {
    // Log sinks observe everything.
    router.add_route(PacketSelector::All, EndpointType::Logger, Format::Ascii);
    router.add_route(PacketSelector::All, EndpointType::DataLogger, Format::Packet);

    // from driver
    router.add_route(PacketType::FromDriver, EndpointType::Instrument, Format::Raw);

    // from instrument
    router.add_route(PacketType::FromInstrument, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::PickledFromInstrument, EndpointType::Client, Format::Packet);

    // from command server
    router.add_route(PacketType::PaCommand, EndpointType::CommandHandler, Format::Packet);

    // from the agent itself
    router.add_route(PacketType::PaConfig, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::PaConfig, EndpointType::Command, Format::Raw);
    router.add_route(PacketType::PaFault, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::PaHeartbeat, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::PaStatus, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::PaStatus, EndpointType::Command, Format::Raw);

    // from the command handler
    router.add_route(PacketType::DigiCmd, EndpointType::Digi, Format::Raw);

    // from the digi side-band port
    router.add_route(PacketType::DigiRsp, EndpointType::Client, Format::Packet);
    router.add_route(PacketType::DigiRsp, EndpointType::Command, Format::Raw);
}

/// Build the command surface for this agent.
fn build_commands(core: &Arc<AgentCore>) -> CommandHandler {
    let mut handler = CommandHandler::new();

    let state_core = Arc::clone(core);
    handler.register("get_state", Box::new(move |_, _| state_core.state_packet()));

    let config_core = Arc::clone(core);
    handler.register(
        "get_config",
        Box::new(move |_, _| {
            let rendered = serde_yaml::to_string(&config_core.config)
                .unwrap_or_else(|e| format!("config serialization failed: {e}"));
            Packet::create(rendered, PacketType::PaConfig)
        }),
    );

    handler.register(
        "get_version",
        Box::new(|_, _| Packet::create(env!("CARGO_PKG_VERSION"), PacketType::PaConfig)),
    );

    if core.config.agent_type == AgentType::Rsn {
        for command in DIGI_COMMANDS {
            handler.register(
                command,
                Box::new(|command, args| {
                    let mut line = command.to_string();
                    for arg in args {
                        line.push(' ');
                        line.push_str(arg);
                    }
                    line.push('\n');
                    Packet::create(line, PacketType::DigiCmd)
                }),
            );
        }
    }

    handler
}

fn register_port(core: &Arc<AgentCore>, service_id: &str, port: u16) -> String {
    tracing::info!(service_id, port, "listening");
    core.registry.register(service_id, port, core.config.ttl);
    service_id.to_string()
}

/// Spawn the variant-specific instrument dialers or replayer.
fn start_variant(core: &Arc<AgentCore>, config: &AgentConfig) -> Result<(), AgentError> {
    let missing = |field: &str| AgentError::Config(format!("missing '{field}'"));
    let addr = || {
        config.instrument_addr.clone().ok_or_else(|| missing("instaddr"))
    };

    match config.agent_type {
        AgentType::Tcp => {
            InstrumentDialer {
                addr: addr()?,
                port: config.instrument_port.ok_or_else(|| missing("instport"))?,
                packet_type: PacketType::FromInstrument,
                endpoint_type: EndpointType::Instrument,
                framing: InstrumentFraming::Raw,
                binary_timestamp: false,
            }
            .spawn(Arc::clone(core));
        },
        AgentType::Rsn => {
            // Data flows as pre-framed packets; the side-band port answers
            // digi commands.
            InstrumentDialer {
                addr: addr()?,
                port: config.instrument_port.ok_or_else(|| missing("instport"))?,
                packet_type: PacketType::FromInstrument,
                endpoint_type: EndpointType::Instrument,
                framing: InstrumentFraming::DigiPackets,
                binary_timestamp: false,
            }
            .spawn(Arc::clone(core));
            InstrumentDialer {
                addr: addr()?,
                port: config.digi_port.ok_or_else(|| missing("digiport"))?,
                packet_type: PacketType::DigiRsp,
                endpoint_type: EndpointType::Digi,
                framing: InstrumentFraming::Raw,
                binary_timestamp: true,
            }
            .spawn(Arc::clone(core));
        },
        AgentType::Botpt => {
            // Drivers write to TX only; RX is read-only data.
            InstrumentDialer {
                addr: addr()?,
                port: config.rx_port.ok_or_else(|| missing("rxport"))?,
                packet_type: PacketType::FromInstrument,
                endpoint_type: EndpointType::InstrumentData,
                framing: InstrumentFraming::Raw,
                binary_timestamp: false,
            }
            .spawn(Arc::clone(core));
            InstrumentDialer {
                addr: addr()?,
                port: config.tx_port.ok_or_else(|| missing("txport"))?,
                packet_type: PacketType::Unknown,
                endpoint_type: EndpointType::Instrument,
                framing: InstrumentFraming::Raw,
                binary_timestamp: false,
            }
            .spawn(Arc::clone(core));
        },
        AgentType::Datalog => {
            replay::spawn(Arc::clone(core), ReplayKind::Datalog, config.files.clone());
        },
        AgentType::DigilogAscii => {
            replay::spawn(Arc::clone(core), ReplayKind::DigiAscii, config.files.clone());
        },
        AgentType::Chunky => {
            replay::spawn(Arc::clone(core), ReplayKind::Chunky, config.files.clone());
        },
    }
    Ok(())
}

fn spawn_heartbeat(core: Arc<AgentCore>, service_ids: Vec<String>) {
    tokio::spawn(async move {
        let mut shutdown = core.subscribe_shutdown();
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    core.got_data(Packet::create("HB", PacketType::PaHeartbeat)).await;
                    for service_id in &service_ids {
                        core.registry.pass(service_id);
                    }
                },
                _ = shutdown.changed() => return,
            }
        }
    });
}

fn spawn_stats(core: Arc<AgentCore>) {
    tokio::spawn(async move {
        let mut shutdown = core.subscribe_shutdown();
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        // Skip the immediate first tick; stats cover a full interval.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => core.router.lock().await.log_stats(),
                _ = shutdown.changed() => return,
            }
        }
    });
}

fn spawn_resume(core: Arc<AgentCore>) {
    tokio::spawn(async move {
        let mut shutdown = core.subscribe_shutdown();
        loop {
            tokio::select! {
                () = core.drained.notified() => {
                    core.router.lock().await.maybe_resume_producers();
                },
                _ = shutdown.changed() => return,
            }
        }
    });
}
