//! Error types
use crate::scanner::TerminalCode;

/// Failure of a single AT command
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Module responded with a terminal code other than OK
    Terminal(TerminalCode),

    /// No terminal code was received in time. The module may still respond later.
    Timeout,

    /// Response exceeded the response buffer
    BufferOverflow,

    /// Serial port rejected the transmission or did not complete it in time
    WriteFailed,

    /// Response was terminated by OK, but did not contain the expected content
    UnexpectedResponse,
}

/// Errors returned by the [TransportManager](crate::TransportManager)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Module has not been opened
    NotOpen,

    /// Module is already open
    AlreadyOpen,

    /// Invalid argument, e.g. slot index out of range or string too long
    BadParameter,

    /// Configuration of a serial port failed
    SerialOpenFailed,

    /// A command failed or the module responded unexpectedly
    ModuleCommError(CommandError),

    /// Operation requires an access point connection
    NotJoined,

    /// All socket slots are in use
    NoFreeSocketSlot,

    /// Module rejected the socket creation
    SocketCreateFailed,

    /// Data channel could not be switched to the requested socket
    ChangeSocketFailed,

    /// TX or RX path could not be acquired in time
    MutexTimeout,

    /// No data could be transferred before the timeout expired
    SocketTimeout,

    /// Socket is not in the state required by the operation
    BadSocketState,

    /// No certificate profile matches the TLS peer
    CertificateNotFound,
}

impl From<CommandError> for Error {
    fn from(error: CommandError) -> Self {
        Error::ModuleCommError(error)
    }
}

impl embedded_io::Error for Error {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Error::BadParameter => embedded_io::ErrorKind::InvalidInput,
            Error::SocketTimeout | Error::MutexTimeout => embedded_io::ErrorKind::TimedOut,
            Error::NotJoined | Error::BadSocketState => embedded_io::ErrorKind::NotConnected,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_nal::TcpError for Error {
    fn kind(&self) -> embedded_nal::TcpErrorKind {
        match self {
            Error::BadSocketState => embedded_nal::TcpErrorKind::PipeClosed,
            _ => embedded_nal::TcpErrorKind::Other,
        }
    }
}

/// Non-fatal errors reported asynchronously by the receive path
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorEvent {
    /// Received byte was dropped, as the socket queue is full
    SocketQueueOverflow { slot: usize },

    /// Module response exceeded the response buffer
    ResponseBufferOverflow,
}
