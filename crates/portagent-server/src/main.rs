//! Port agent binary.
//!
//! # Usage
//!
//! ```bash
//! # From a YAML configuration file
//! portagent --config agent.yml
//!
//! # One TCP instrument
//! portagent tcp 4000 4001 10.0.0.5 2101 --sniff 4002 --name hydrophone
//!
//! # Replay recorded packet logs to drivers
//! portagent datalog 4000 4001 hydrophone.datalog.2014_04_01
//! ```

use std::{path::PathBuf, process::ExitCode};

use clap::{Args as ClapArgs, Parser, Subcommand, error::ErrorKind};
use portagent_server::{AgentConfig, AgentType, DEFAULT_TTL, PortAgent};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Port agent daemon
#[derive(Parser, Debug)]
#[command(name = "portagent")]
#[command(about = "Instrument fan-out daemon for drivers and datalog replay")]
#[command(version)]
struct Cli {
    /// Load the agent configuration from a YAML file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    agent: Option<Agent>,
}

/// Options shared by every agent variant.
#[derive(ClapArgs, Debug)]
struct CommonOpts {
    /// Start a sniffer on this port
    #[arg(long, value_name = "PORT")]
    sniff: Option<u16>,

    /// Name this agent (used for log files; the command port otherwise)
    #[arg(long)]
    name: Option<String>,

    /// Reference designator for service registration
    #[arg(long)]
    refdes: Option<String>,

    /// TTL in seconds for service liveness checks
    #[arg(long, default_value_t = DEFAULT_TTL)]
    ttl: u32,
}

#[derive(Subcommand, Debug)]
enum Agent {
    /// Single TCP connection to an instrument
    Tcp {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Instrument address
        instaddr: String,
        /// Instrument port
        instport: u16,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Digi-framed data plus side-band command connection
    Rsn {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Instrument address
        instaddr: String,
        /// Instrument data port
        instport: u16,
        /// Digi side-band command port
        digiport: u16,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Separate RX and TX instrument connections
    Botpt {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Instrument address
        instaddr: String,
        /// Instrument RX port
        rxport: u16,
        /// Instrument TX port
        txport: u16,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Replay recorded binary packet logs
    Datalog {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Files to replay, in order
        #[arg(required = true)]
        files: Vec<String>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Replay digi ASCII logs with in-band timestamps
    #[command(name = "digilog_ascii")]
    DigilogAscii {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Files to replay, in order
        #[arg(required = true)]
        files: Vec<String>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Replay files in fixed chunks
    Chunky {
        /// Data port for drivers
        port: u16,
        /// Command port for operators
        commandport: u16,
        /// Files to replay, in order
        #[arg(required = true)]
        files: Vec<String>,
        #[command(flatten)]
        common: CommonOpts,
    },
}

impl Agent {
    fn into_config(self) -> AgentConfig {
        let (agent_type, port, commandport, common) = match &self {
            Agent::Tcp { port, commandport, common, .. } => {
                (AgentType::Tcp, *port, *commandport, common)
            },
            Agent::Rsn { port, commandport, common, .. } => {
                (AgentType::Rsn, *port, *commandport, common)
            },
            Agent::Botpt { port, commandport, common, .. } => {
                (AgentType::Botpt, *port, *commandport, common)
            },
            Agent::Datalog { port, commandport, common, .. } => {
                (AgentType::Datalog, *port, *commandport, common)
            },
            Agent::DigilogAscii { port, commandport, common, .. } => {
                (AgentType::DigilogAscii, *port, *commandport, common)
            },
            Agent::Chunky { port, commandport, common, .. } => {
                (AgentType::Chunky, *port, *commandport, common)
            },
        };

        let mut config = AgentConfig {
            agent_type,
            port,
            command_port: commandport,
            sniff_port: common.sniff,
            instrument_addr: None,
            instrument_port: None,
            digi_port: None,
            rx_port: None,
            tx_port: None,
            files: Vec::new(),
            name: common.name.clone(),
            refdes: common.refdes.clone(),
            ttl: common.ttl,
        };

        match self {
            Agent::Tcp { instaddr, instport, .. } => {
                config.instrument_addr = Some(instaddr);
                config.instrument_port = Some(instport);
            },
            Agent::Rsn { instaddr, instport, digiport, .. } => {
                config.instrument_addr = Some(instaddr);
                config.instrument_port = Some(instport);
                config.digi_port = Some(digiport);
            },
            Agent::Botpt { instaddr, rxport, txport, .. } => {
                config.instrument_addr = Some(instaddr);
                config.rx_port = Some(rxport);
                config.tx_port = Some(txport);
            },
            Agent::Datalog { files, .. }
            | Agent::DigilogAscii { files, .. }
            | Agent::Chunky { files, .. } => {
                config.files = files;
            },
        }

        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = e.print();
            return code;
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match (cli.config, cli.agent) {
        (Some(path), _) => match AgentConfig::from_yaml_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("{e}");
                return ExitCode::FAILURE;
            },
        },
        (None, Some(agent)) => agent.into_config(),
        (None, None) => {
            tracing::error!("expected an agent subcommand or --config");
            return ExitCode::FAILURE;
        },
    };

    tracing::info!(agent_type = config.agent_type.label(), "port agent starting");

    match PortAgent::start(config).await {
        Ok(agent) => {
            agent.run().await;
            ExitCode::SUCCESS
        },
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        },
    }
}
