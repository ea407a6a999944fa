//! Port agent daemon.
//!
//! A port agent mediates between a scientific instrument and its driver
//! clients: bytes read from the instrument are framed into timestamped
//! packets and fanned out to every connected driver, driver bytes are
//! funneled down to the instrument, and everything is persisted to daily
//! binary and ASCII logs. An out-of-band command port answers state,
//! configuration and device-specific commands, and an optional sniffer
//! port mirrors all traffic as text.
//!
//! # Components
//!
//! - [`PortAgent`]: per-variant orchestrator over the shared connection
//!   plane (routing in [`portagent_core`], framing in [`portagent_proto`])
//! - [`AgentConfig`] / [`AgentType`]: CLI- or YAML-sourced configuration
//! - [`ServiceRegistry`]: out-of-process discovery collaborator interface
//!
//! Deployment variants (TCP, RSN, BOTPT, datalog replay) are orchestrator
//! configurations sharing one composition path, not subtypes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod config;
mod discovery;
mod error;
mod instrument;
mod listener;
mod logger;
mod replay;
mod transport;

pub use agent::{HEARTBEAT_INTERVAL, PortAgent};
pub use config::{AgentConfig, AgentType, DEFAULT_TTL};
pub use discovery::{NoopRegistry, ServiceRegistry};
pub use error::AgentError;
pub use instrument::MAX_RECONNECT_DELAY;
pub use logger::DailyFile;
