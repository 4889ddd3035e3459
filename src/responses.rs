//! Parsed module responses
use crate::error::CommandError;
use crate::scanner::ResponseScanner;
use atat::atat_derive::AtatResp;

/// Commands which gets just responded by OK
#[derive(Clone, AtatResp)]
pub struct NoResponse;

/// Field pattern of the UART statistics response
pub(crate) const STATISTICS_PATTERN: &str = "recv={} sent={}";

/// Field pattern of the socket status response
pub(crate) const SOCKET_STATUS_PATTERN: &str = "+NSTAT:{},{},{}";

/// Byte counters of the module's data channel
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartStatistics {
    /// Bytes the module received from the host
    pub received: u32,

    /// Bytes the module sent to the host
    pub sent: u32,
}

impl UartStatistics {
    pub(crate) fn from_scanner<const LEN: usize>(scanner: &ResponseScanner<LEN>) -> Result<Self, CommandError> {
        Ok(Self {
            received: scanner.field(0).ok_or(CommandError::UnexpectedResponse)?,
            sent: scanner.field(1).ok_or(CommandError::UnexpectedResponse)?,
        })
    }
}

/// Socket state as reported by the module
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleSocketStatus {
    Closed,
    Socket,
    Bound,
    Listen,
    Connected,
    Broken,
}

impl ModuleSocketStatus {
    pub(crate) fn from_scanner<const LEN: usize>(scanner: &ResponseScanner<LEN>) -> Result<Self, CommandError> {
        match scanner.field_str(0) {
            Some("CLOSED") => Ok(Self::Closed),
            Some("SOCKET") => Ok(Self::Socket),
            Some("BOUND") => Ok(Self::Bound),
            Some("LISTEN") => Ok(Self::Listen),
            Some("CONNECTED") => Ok(Self::Connected),
            Some("BROKEN") => Ok(Self::Broken),
            _ => Err(CommandError::UnexpectedResponse),
        }
    }
}
