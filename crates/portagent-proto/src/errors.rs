//! Packet error types.

/// Convenience alias for codec results.
pub type Result<T> = std::result::Result<T, PacketError>;

/// Errors raised by the packet codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// A header was constructed with inconsistent inputs. Programmer error.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// A timestamp string could not be parsed as ISO-8601 UTC.
    #[error("timestamp not in ISO-8601 format YYYY-MM-DDTHH:MM:SS[.ffffff]Z: {input:?}")]
    BadTimestamp {
        /// The offending input.
        input: String,
    },
}
