//! Agent error types.

use std::io;

/// Errors that can occur while starting or running an agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Invalid or incomplete configuration.
    ///
    /// Fatal before startup; fix the invocation or config file.
    #[error("configuration error: {0}")]
    Config(String),

    /// A listening socket could not be bound.
    ///
    /// Fatal to this agent; the port is likely in use.
    #[error("cannot listen on {role} port {port}: {source}")]
    Listen {
        /// Which listener failed (data, command, sniffer).
        role: &'static str,
        /// Requested port (0 for ephemeral).
        port: u16,
        /// Underlying bind error.
        source: io::Error,
    },

    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
