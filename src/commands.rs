use crate::error::{CommandError, Error};
use crate::responses::NoResponse;
use atat::atat_derive::AtatCmd;
use atat::heapless::String;
use core::fmt::Write;
use core::net::Ipv4Addr;
use core::str::FromStr;

/// Max. length of a formatted command line
pub const COMMAND_BUFFER_SIZE: usize = 512;

/// Role of the module inside the TLS context (client)
const TLS_CLIENT_ROLE: u8 = 2;

/// Trait for mapping command errors
pub trait CommandErrorHandler {
    /// Maps a failed command to the error returned to the caller
    fn command_error(&self, error: CommandError) -> Error {
        Error::ModuleCommError(error)
    }
}

/// Converts a string argument, failing if it exceeds the argument capacity
pub(crate) fn string_arg<const N: usize>(value: &str) -> Result<String<N>, Error> {
    String::from_str(value).map_err(|_| Error::BadParameter)
}

/// Formats an IPv4 address in dotted notation
pub(crate) fn ip_arg(ip: Ipv4Addr) -> String<15> {
    let mut string = String::new();
    // Max. 15 chars, always fits
    let _ = write!(string, "{}", ip);
    string
}

/// Restores factory defaults
#[derive(Clone, AtatCmd)]
#[at_cmd("&F", NoResponse, timeout_ms = 15_000)]
pub struct FactoryResetCommand;

impl CommandErrorHandler for FactoryResetCommand {}

/// Reboots the module
#[derive(Clone, AtatCmd)]
#[at_cmd("Z", NoResponse, timeout_ms = 15_000)]
pub struct RebootCommand;

impl CommandErrorHandler for RebootCommand {}

/// Disables the command echo
#[derive(Clone, AtatCmd)]
#[at_cmd("E0", NoResponse, timeout_ms = 1_000)]
pub struct EchoOffCommand;

impl CommandErrorHandler for EchoOffCommand {}

/// Writes a module configuration register
#[derive(Clone, AtatCmd)]
#[at_cmd("+SREG", NoResponse, timeout_ms = 1_000)]
pub struct SetRegisterCommand {
    /// Register number:
    ///     108: Retry on BUSY responses
    ///     12: Escape guard time in 10 ms units
    ///     110: Transparent mode echo
    ///     105: Flow control on the data channel
    #[at_arg(position = 0)]
    register: u16,

    #[at_arg(position = 1)]
    value: u16,
}

impl SetRegisterCommand {
    pub fn busy_retry(enabled: bool) -> Self {
        Self {
            register: 108,
            value: enabled as u16,
        }
    }

    pub fn escape_guard_time(time_10ms: u16) -> Self {
        Self {
            register: 12,
            value: time_10ms,
        }
    }

    pub fn transparent_echo(enabled: bool) -> Self {
        Self {
            register: 110,
            value: enabled as u16,
        }
    }

    pub fn data_flow_control(enabled: bool) -> Self {
        Self {
            register: 105,
            value: enabled as u16,
        }
    }
}

impl CommandErrorHandler for SetRegisterCommand {}

/// Sets the size of the module's socket buffer
#[derive(Clone, AtatCmd)]
#[at_cmd("+BSIZE", NoResponse, timeout_ms = 1_000)]
pub struct SetBufferSizeCommand {
    size: u16,
}

impl SetBufferSizeCommand {
    pub fn new(size: u16) -> Self {
        Self { size }
    }
}

impl CommandErrorHandler for SetBufferSizeCommand {}

/// Sets the receive timeout of the module's socket buffer
#[derive(Clone, AtatCmd)]
#[at_cmd("+TO", NoResponse, timeout_ms = 1_000)]
pub struct SetReceiveTimeoutCommand {
    timeout: u16,
}

impl SetReceiveTimeoutCommand {
    pub fn new(timeout: u16) -> Self {
        Self { timeout }
    }
}

impl CommandErrorHandler for SetReceiveTimeoutCommand {}

/// Configures baud rate and flow control of the module UART
#[derive(Clone, AtatCmd)]
#[at_cmd("+BX1", NoResponse, timeout_ms = 3_000)]
pub struct ConfigureUartCommand {
    #[at_arg(position = 0)]
    baud_rate: u32,

    /// 0: no flow control, 1: hardware flow control
    #[at_arg(position = 1)]
    flow_control: u8,
}

impl ConfigureUartCommand {
    pub fn new(baud_rate: u32, flow_control: bool) -> Self {
        Self {
            baud_rate,
            flow_control: flow_control as u8,
        }
    }
}

impl CommandErrorHandler for ConfigureUartCommand {}

/// Assigns the command channel and the data channel to the module UARTs
#[derive(Clone, AtatCmd)]
#[at_cmd("+UART", NoResponse, timeout_ms = 3_000)]
pub struct AssignPortsCommand {
    #[at_arg(position = 0)]
    command_port: u8,

    #[at_arg(position = 1)]
    data_port: u8,
}

impl AssignPortsCommand {
    /// Commands on the second UART, data on the first one
    pub fn dual() -> Self {
        Self {
            command_port: 2,
            data_port: 1,
        }
    }
}

impl CommandErrorHandler for AssignPortsCommand {}

/// Disconnects from the access point
#[derive(Clone, AtatCmd)]
#[at_cmd("+WD", NoResponse, timeout_ms = 15_000)]
pub struct DisconnectCommand;

impl CommandErrorHandler for DisconnectCommand {}

/// Enables or disables DHCP
#[derive(Clone, AtatCmd)]
#[at_cmd("+NDHCP", NoResponse, timeout_ms = 3_000)]
pub struct SetDhcpCommand {
    enabled: u8,
}

impl SetDhcpCommand {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: enabled as u8,
        }
    }
}

impl CommandErrorHandler for SetDhcpCommand {}

/// Sets a static IP configuration
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSET", NoResponse, timeout_ms = 3_000)]
pub struct SetStaticIpCommand {
    #[at_arg(position = 0)]
    address: String<15>,

    #[at_arg(position = 1)]
    mask: String<15>,

    #[at_arg(position = 2)]
    gateway: String<15>,
}

impl SetStaticIpCommand {
    pub fn new(address: Ipv4Addr, mask: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self {
            address: ip_arg(address),
            mask: ip_arg(mask),
            gateway: ip_arg(gateway),
        }
    }
}

impl CommandErrorHandler for SetStaticIpCommand {}

/// Queries the current IP configuration
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSET?", NoResponse, timeout_ms = 3_000)]
pub struct QueryIpCommand;

impl CommandErrorHandler for QueryIpCommand {}

/// Joins a WPA/WPA2 access point
#[derive(Clone, AtatCmd)]
#[at_cmd("+WAWPA", NoResponse, timeout_ms = 15_000)]
pub struct JoinCommand {
    /// The SSID of the target access point
    #[at_arg(position = 0)]
    ssid: String<32>,

    /// 1: WPA, 2: WPA2
    #[at_arg(position = 1)]
    wpa_version: u8,

    /// The passphrase of the target access point
    #[at_arg(position = 2)]
    passphrase: String<64>,
}

impl JoinCommand {
    pub fn new(ssid: String<32>, wpa_version: u8, passphrase: String<64>) -> Self {
        Self {
            ssid,
            wpa_version,
            passphrase,
        }
    }
}

impl CommandErrorHandler for JoinCommand {}

/// Scans for access points
#[derive(Clone, AtatCmd)]
#[at_cmd("+WS", NoResponse, timeout_ms = 15_000)]
pub struct ScanCommand;

impl CommandErrorHandler for ScanCommand {}

/// Queries the module's network status, including the MAC address
#[derive(Clone, AtatCmd)]
#[at_cmd("+W", NoResponse, timeout_ms = 3_000)]
pub struct StatusCommand;

impl CommandErrorHandler for StatusCommand {}

/// Sets a DNS server address
#[derive(Clone, AtatCmd)]
#[at_cmd("+NDNSSVR", NoResponse, timeout_ms = 3_000)]
pub struct SetDnsServerCommand {
    /// 1: primary, 2: secondary
    #[at_arg(position = 0)]
    index: u8,

    #[at_arg(position = 1)]
    address: String<15>,
}

impl SetDnsServerCommand {
    pub fn primary(address: Ipv4Addr) -> Self {
        Self {
            index: 1,
            address: ip_arg(address),
        }
    }

    pub fn secondary(address: Ipv4Addr) -> Self {
        Self {
            index: 2,
            address: ip_arg(address),
        }
    }
}

impl CommandErrorHandler for SetDnsServerCommand {}

/// Queries the configured DNS servers
#[derive(Clone, AtatCmd)]
#[at_cmd("+NDNSSVR?", NoResponse, timeout_ms = 3_000)]
pub struct QueryDnsServersCommand;

impl CommandErrorHandler for QueryDnsServersCommand {}

/// Resolves a host name
#[derive(Clone, AtatCmd)]
#[at_cmd("+NDNSQUERY", NoResponse, timeout_ms = 15_000)]
pub struct DnsQueryCommand {
    name: String<253>,
}

impl DnsQueryCommand {
    pub fn new(name: String<253>) -> Self {
        Self { name }
    }
}

impl CommandErrorHandler for DnsQueryCommand {}

/// Sends a single ICMP echo request
#[derive(Clone, AtatCmd)]
#[at_cmd("+NPING", NoResponse, timeout_ms = 15_000)]
pub struct PingCommand {
    address: String<15>,
}

impl PingCommand {
    pub fn new(address: Ipv4Addr) -> Self {
        Self {
            address: ip_arg(address),
        }
    }
}

impl CommandErrorHandler for PingCommand {}

/// Binds the module's data channel to the given socket index
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSOCKINDEX", NoResponse, timeout_ms = 15_000)]
pub struct SelectSocketCommand {
    index: usize,
}

impl SelectSocketCommand {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl CommandErrorHandler for SelectSocketCommand {
    fn command_error(&self, _error: CommandError) -> Error {
        Error::ChangeSocketFailed
    }
}

/// Queries the byte counters of the data channel
#[derive(Clone, AtatCmd)]
#[at_cmd("+USTAT", NoResponse, timeout_ms = 3_000)]
pub struct UartStatisticsCommand;

impl CommandErrorHandler for UartStatisticsCommand {}

/// Resets the byte counters of the data channel
#[derive(Clone, AtatCmd)]
#[at_cmd("+USTATRST", NoResponse, timeout_ms = 3_000)]
pub struct ResetStatisticsCommand;

impl CommandErrorHandler for ResetStatisticsCommand {}

/// Creates a module socket for the currently selected index
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSOCK", NoResponse, timeout_ms = 15_000)]
pub struct NetworkSocketCommand {
    /// 0: TCP, 1: UDP, 2: TLS
    #[at_arg(position = 0)]
    kind: u8,

    /// Address family, always 4
    #[at_arg(position = 1)]
    family: u8,
}

impl NetworkSocketCommand {
    pub fn ipv4(kind: u8) -> Self {
        Self { kind, family: 4 }
    }
}

impl CommandErrorHandler for NetworkSocketCommand {
    fn command_error(&self, _error: CommandError) -> Error {
        Error::SocketCreateFailed
    }
}

/// Establishes a TCP connection on the selected socket
#[derive(Clone, AtatCmd)]
#[at_cmd("+NCTCP", NoResponse, timeout_ms = 15_000)]
pub struct ConnectTcpCommand {
    #[at_arg(position = 0)]
    address: String<15>,

    #[at_arg(position = 1)]
    port: u16,
}

impl ConnectTcpCommand {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address: ip_arg(address),
            port,
        }
    }
}

impl CommandErrorHandler for ConnectTcpCommand {}

/// Binds the selected socket to a UDP peer
#[derive(Clone, AtatCmd)]
#[at_cmd("+NCUDP", NoResponse, timeout_ms = 15_000)]
pub struct ConnectUdpCommand {
    #[at_arg(position = 0)]
    address: String<15>,

    #[at_arg(position = 1)]
    port: u16,
}

impl ConnectUdpCommand {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address: ip_arg(address),
            port,
        }
    }
}

impl CommandErrorHandler for ConnectUdpCommand {}

/// Sets the destination of outgoing UDP datagrams
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSENDTO", NoResponse, timeout_ms = 3_000)]
pub struct SendToCommand {
    #[at_arg(position = 0)]
    address: String<15>,

    #[at_arg(position = 1)]
    port: u16,
}

impl SendToCommand {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self {
            address: ip_arg(address),
            port,
        }
    }
}

impl CommandErrorHandler for SendToCommand {}

/// Closes the selected module socket
#[derive(Clone, AtatCmd)]
#[at_cmd("+NCLOSE", NoResponse, timeout_ms = 15_000)]
pub struct CloseNetworkSocketCommand;

impl CommandErrorHandler for CloseNetworkSocketCommand {}

/// Queries the state of the selected module socket
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSTAT", NoResponse, timeout_ms = 3_000)]
pub struct SocketStatusCommand;

impl CommandErrorHandler for SocketStatusCommand {}

/// Enables or disables the TLS context
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSL", NoResponse, timeout_ms = 3_000)]
pub struct TlsContextCommand {
    #[at_arg(position = 0)]
    role: u8,

    #[at_arg(position = 1)]
    enabled: u8,
}

impl TlsContextCommand {
    pub fn client() -> Self {
        Self {
            role: TLS_CLIENT_ROLE,
            enabled: 1,
        }
    }
}

impl CommandErrorHandler for TlsContextCommand {}

/// Loads a stored certificate into the TLS context
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSLLD", NoResponse, timeout_ms = 3_000)]
pub struct TlsLoadCommand {
    #[at_arg(position = 0)]
    role: u8,

    #[at_arg(position = 1)]
    name: String<16>,

    /// 1: client certificate, 2: CA list
    #[at_arg(position = 2)]
    kind: u8,
}

impl TlsLoadCommand {
    pub fn new(name: String<16>, kind: u8) -> Self {
        Self {
            role: TLS_CLIENT_ROLE,
            name,
            kind,
        }
    }
}

impl CommandErrorHandler for TlsLoadCommand {}

/// Enables TLS alert reporting
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSLALERT", NoResponse, timeout_ms = 3_000)]
pub struct TlsAlertCommand {
    #[at_arg(position = 0)]
    role: u8,

    #[at_arg(position = 1)]
    enabled: u8,
}

impl TlsAlertCommand {
    pub fn enabled() -> Self {
        Self {
            role: TLS_CLIENT_ROLE,
            enabled: 1,
        }
    }
}

impl CommandErrorHandler for TlsAlertCommand {}

/// Sets the peer name used for SNI and certificate verification
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSLPEER", NoResponse, timeout_ms = 3_000)]
pub struct TlsPeerNameCommand {
    #[at_arg(position = 0)]
    role: u8,

    #[at_arg(position = 1)]
    host: String<253>,
}

impl TlsPeerNameCommand {
    pub fn new(host: String<253>) -> Self {
        Self {
            role: TLS_CLIENT_ROLE,
            host,
        }
    }
}

impl CommandErrorHandler for TlsPeerNameCommand {}

/// Announces a certificate upload of the given length, or erases the certificate if the length is zero
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSLCERT", NoResponse, timeout_ms = 15_000)]
pub struct CertificateWriteCommand {
    #[at_arg(position = 0)]
    name: String<16>,

    #[at_arg(position = 1)]
    length: u32,
}

impl CertificateWriteCommand {
    pub fn upload(name: String<16>, length: u32) -> Self {
        Self { name, length }
    }

    pub fn erase(name: String<16>) -> Self {
        Self { name, length: 0 }
    }
}

impl CommandErrorHandler for CertificateWriteCommand {}

/// Lists the stored certificates
#[derive(Clone, AtatCmd)]
#[at_cmd("+NSSLCERT?", NoResponse, timeout_ms = 3_000)]
pub struct CertificateListCommand;

impl CommandErrorHandler for CertificateListCommand {}

/// Leaves the command mode and returns to the transparent data mode
#[derive(Clone, AtatCmd)]
#[at_cmd("O", NoResponse, timeout_ms = 3_000)]
pub struct ReturnToDataModeCommand;

impl CommandErrorHandler for ReturnToDataModeCommand {}
