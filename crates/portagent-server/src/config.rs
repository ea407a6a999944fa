//! Agent configuration, from CLI arguments or a YAML file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Default TTL (seconds) for service-registry liveness checks.
pub const DEFAULT_TTL: u32 = 60;

/// Which agent variant to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Single outbound TCP connection to the instrument.
    Tcp,
    /// Digi-framed data connection plus side-band command connection.
    Rsn,
    /// Separate RX and TX instrument connections.
    Botpt,
    /// Replay recorded binary packet logs.
    Datalog,
    /// Replay Digi ASCII logs with in-band timestamp markers.
    DigilogAscii,
    /// Replay arbitrary files in fixed chunks.
    Chunky,
}

impl AgentType {
    /// Lower-case name, used as the default reference designator.
    pub fn label(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Rsn => "rsn",
            Self::Botpt => "botpt",
            Self::Datalog => "datalog",
            Self::DigilogAscii => "digilog_ascii",
            Self::Chunky => "chunky",
        }
    }

    /// Whether this variant replays files instead of dialing sockets.
    pub fn is_replay(self) -> bool {
        matches!(self, Self::Datalog | Self::DigilogAscii | Self::Chunky)
    }
}

/// Complete configuration for one agent.
///
/// Field names follow the YAML config file schema; the CLI subcommands
/// produce the same structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent variant.
    #[serde(rename = "type")]
    pub agent_type: AgentType,

    /// Data port drivers connect to (0 binds an ephemeral port).
    #[serde(default)]
    pub port: u16,

    /// Command port operators connect to (0 binds an ephemeral port).
    #[serde(rename = "commandport", default)]
    pub command_port: u16,

    /// Optional sniffer port.
    #[serde(rename = "sniffport", default)]
    pub sniff_port: Option<u16>,

    /// Instrument host name or address.
    #[serde(rename = "instaddr", default)]
    pub instrument_addr: Option<String>,

    /// Instrument data port (tcp, rsn).
    #[serde(rename = "instport", default)]
    pub instrument_port: Option<u16>,

    /// Digi side-band command port (rsn).
    #[serde(rename = "digiport", default)]
    pub digi_port: Option<u16>,

    /// Instrument RX port (botpt).
    #[serde(rename = "rxport", default)]
    pub rx_port: Option<u16>,

    /// Instrument TX port (botpt).
    #[serde(rename = "txport", default)]
    pub tx_port: Option<u16>,

    /// Files to replay (datalog variants).
    #[serde(default)]
    pub files: Vec<String>,

    /// Agent name used for log files; the command port when unset.
    #[serde(default)]
    pub name: Option<String>,

    /// Reference designator for service registration; the agent type when
    /// unset.
    #[serde(default)]
    pub refdes: Option<String>,

    /// Liveness-check TTL in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_ttl() -> u32 {
    DEFAULT_TTL
}

impl AgentConfig {
    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, AgentError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_yaml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the fields the variant needs are present.
    pub fn validate(&self) -> Result<(), AgentError> {
        let require = |field: Option<()>, name: &str| {
            field.ok_or_else(|| {
                AgentError::Config(format!(
                    "{} agent requires '{name}'",
                    self.agent_type.label()
                ))
            })
        };

        let addr = self.instrument_addr.as_ref().map(|_| ());
        match self.agent_type {
            AgentType::Tcp => {
                require(addr, "instaddr")?;
                require(self.instrument_port.map(|_| ()), "instport")?;
            },
            AgentType::Rsn => {
                require(addr, "instaddr")?;
                require(self.instrument_port.map(|_| ()), "instport")?;
                require(self.digi_port.map(|_| ()), "digiport")?;
            },
            AgentType::Botpt => {
                require(addr, "instaddr")?;
                require(self.rx_port.map(|_| ()), "rxport")?;
                require(self.tx_port.map(|_| ()), "txport")?;
            },
            AgentType::Datalog | AgentType::DigilogAscii | AgentType::Chunky => {
                if self.files.is_empty() {
                    return Err(AgentError::Config(format!(
                        "{} agent requires at least one file",
                        self.agent_type.label()
                    )));
                }
            },
        }
        Ok(())
    }

    /// Name used for the log files.
    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.command_port.to_string())
    }

    /// Reference designator used for service registration ids.
    pub fn refdes(&self) -> String {
        self.refdes.clone().unwrap_or_else(|| self.agent_type.label().to_string())
    }
}
