//! Packet, endpoint and output-format enumerations.

/// Packet type carried in the header's type byte.
///
/// Wire values are stable; recorded datalogs depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    /// Unclassified data (sniffer input, BOTPT TX echo).
    Unknown = 0,
    /// Data read from an instrument socket.
    FromInstrument = 1,
    /// Data written by a driver client.
    FromDriver = 2,
    /// A raw command line received on the command port.
    PaCommand = 3,
    /// Aggregate connection state report.
    PaStatus = 4,
    /// Command-port fault (unknown or empty command).
    PaFault = 5,
    /// Configuration or version report.
    PaConfig = 6,
    /// Command forwarded to the Digi side-band port.
    DigiCmd = 7,
    /// Response read from the Digi side-band port.
    DigiRsp = 8,
    /// Periodic liveness packet.
    PaHeartbeat = 9,
    /// Pre-serialized instrument data from an external reader.
    PickledFromInstrument = 10,
}

impl PacketType {
    /// Every concrete packet type, in wire-value order.
    ///
    /// Routing rules added for "all types" expand over this list.
    pub const ALL: [Self; 11] = [
        Self::Unknown,
        Self::FromInstrument,
        Self::FromDriver,
        Self::PaCommand,
        Self::PaStatus,
        Self::PaFault,
        Self::PaConfig,
        Self::DigiCmd,
        Self::DigiRsp,
        Self::PaHeartbeat,
        Self::PickledFromInstrument,
    ];

    /// Map a wire byte to a packet type. `None` if unrecognized.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.to_u8() == value)
    }

    /// Wire value of this packet type.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Upper-case name used in ASCII log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::FromInstrument => "FROM_INSTRUMENT",
            Self::FromDriver => "FROM_DRIVER",
            Self::PaCommand => "PA_COMMAND",
            Self::PaStatus => "PA_STATUS",
            Self::PaFault => "PA_FAULT",
            Self::PaConfig => "PA_CONFIG",
            Self::DigiCmd => "DIGI_CMD",
            Self::DigiRsp => "DIGI_RSP",
            Self::PaHeartbeat => "PA_HEARTBEAT",
            Self::PickledFromInstrument => "PICKLED_FROM_INSTRUMENT",
        }
    }
}

/// Kind of endpoint a connection registers under at the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointType {
    /// Outbound instrument socket (TCP/RSN data, BOTPT TX).
    Instrument,
    /// Second instrument socket of dual-socket deployments (BOTPT RX).
    InstrumentData,
    /// Digi terminal-server side-band command socket.
    Digi,
    /// Driver client on the data port.
    Client,
    /// Operator connection on the command port.
    Command,
    /// ASCII log sink or sniffer observer.
    Logger,
    /// Binary datalog sink.
    DataLogger,
    /// Command dispatch endpoint.
    CommandHandler,
    /// The agent itself.
    PortAgent,
}

impl EndpointType {
    /// Lower-case name used in log messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Instrument => "instrument",
            Self::InstrumentData => "instrument_data",
            Self::Digi => "digi_cmd",
            Self::Client => "client",
            Self::Command => "command",
            Self::Logger => "logger",
            Self::DataLogger => "data_logger",
            Self::CommandHandler => "command_handler",
            Self::PortAgent => "port_agent",
        }
    }
}

/// Materialisation handed to an endpoint by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Payload bytes only.
    Raw,
    /// The full framed packet.
    Packet,
    /// One human-readable log line, newline-terminated.
    Ascii,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_wire_values_are_stable() {
        assert_eq!(PacketType::Unknown.to_u8(), 0);
        assert_eq!(PacketType::FromInstrument.to_u8(), 1);
        assert_eq!(PacketType::FromDriver.to_u8(), 2);
        assert_eq!(PacketType::PaCommand.to_u8(), 3);
        assert_eq!(PacketType::PaStatus.to_u8(), 4);
        assert_eq!(PacketType::PaFault.to_u8(), 5);
        assert_eq!(PacketType::PaConfig.to_u8(), 6);
        assert_eq!(PacketType::DigiCmd.to_u8(), 7);
        assert_eq!(PacketType::DigiRsp.to_u8(), 8);
        assert_eq!(PacketType::PaHeartbeat.to_u8(), 9);
        assert_eq!(PacketType::PickledFromInstrument.to_u8(), 10);
    }

    #[test]
    fn round_trip_through_wire_byte() {
        for ty in PacketType::ALL {
            assert_eq!(PacketType::from_u8(ty.to_u8()), Some(ty));
        }
        assert_eq!(PacketType::from_u8(11), None);
        assert_eq!(PacketType::from_u8(0xff), None);
    }
}
