//! Packet routing and connection plane for the port agent.
//!
//! The router is the hub every byte passes through: endpoint connections
//! hand it framed packets, and it fans each packet out to every registered
//! client whose endpoint type matches a routing rule, materialised in the
//! rule's format (raw payload, full frame, or ASCII log line).
//!
//! # Architecture
//!
//! ```text
//! Router
//!   ├─ routes:    packet type -> {(endpoint type, format)}
//!   ├─ clients:   endpoint type -> [EndpointHandle]
//!   ├─ producers: upstream sources honoring pause/resume/stop
//!   └─ stats:     counters, logged and reset periodically
//! ```
//!
//! The router performs no I/O. An [`EndpointHandle`] is one half of an
//! unbounded byte channel; the owning connection drains the other half
//! ([`EndpointQueue`]) into its socket or file. All router methods take
//! `&mut self` — callers serialise through a single async mutex, which is
//! what preserves per-source delivery order.

mod command;
mod flow;
mod router;

pub use command::{CommandCallback, CommandHandler};
pub use flow::{FlowGate, FlowSignal, Producer};
pub use router::{
    EndpointHandle, EndpointQueue, PacketSelector, Router, RouterStats, STATS_INTERVAL,
};
