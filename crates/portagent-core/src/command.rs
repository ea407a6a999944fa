//! Command dispatch for the operator port.

use std::collections::HashMap;

use portagent_proto::{Packet, PacketType};

/// Callback invoked for a registered command.
///
/// Receives the command name and its whitespace-split arguments, and
/// returns the reply packets to route.
pub type CommandCallback = Box<dyn Fn(&str, &[&str]) -> Vec<Packet> + Send + Sync>;

/// Maps command names to callbacks, populated at agent start.
///
/// Lines arriving on the command port are split on whitespace: the head is
/// the command, the tail the arguments. Unknown and empty commands yield
/// `PA_FAULT` packets instead of replies.
#[derive(Default)]
pub struct CommandHandler {
    callbacks: HashMap<String, CommandCallback>,
}

impl CommandHandler {
    /// Create a handler with no registered commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `command`, replacing any previous one.
    pub fn register(&mut self, command: impl Into<String>, callback: CommandCallback) {
        let command = command.into();
        tracing::debug!(%command, "registering command callback");
        self.callbacks.insert(command, callback);
    }

    /// Names of all registered commands.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    /// Dispatch one command line.
    ///
    /// The line is treated as opaque 8-bit bytes; lookup happens on its
    /// lossy UTF-8 rendering.
    pub fn dispatch(&self, line: &[u8]) -> Vec<Packet> {
        let text = String::from_utf8_lossy(line);
        tracing::debug!(line = %text, "handling command");

        let mut parts = text.split_whitespace();
        let Some(command) = parts.next() else {
            return Packet::create(
                &b"Received empty command on command port"[..],
                PacketType::PaFault,
            );
        };
        let args: Vec<&str> = parts.collect();

        match self.callbacks.get(command) {
            Some(callback) => callback(command, &args),
            None => Packet::create(
                format!("Received bad command on command port: {command:?}"),
                PacketType::PaFault,
            ),
        }
    }
}
