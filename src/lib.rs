//! # ULPGN AT socket multiplexer
//!
//! Operates a companion Wi-Fi module as multiple concurrent TCP/UDP/TLS sockets over one or two
//! UARTs. The module only exposes a single data channel at a time, so the [TransportManager] moves
//! this channel between logical sockets and attributes bytes in flight across a switch to the
//! correct socket.
//!
//! ## Example
//!
//! ````ignore
//! use ulpgn_at_mux::{Config, IpMode, IpVersion, Protocol, Security, TransportManager};
//!
//! let manager: TransportManager<_, _, _, 4, 4096> =
//!     TransportManager::new_dual(command_uart, data_uart, clock, Config::default());
//!
//! manager.open()?;
//! manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)?;
//!
//! let slot = manager.create_socket(Protocol::Tcp, IpVersion::V4)?;
//! manager.connect_socket(slot, Ipv4Addr::new(10, 0, 0, 1), 5000, None)?;
//! manager.send(slot, b"hello", 1_000)?;
//! ````
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]

// Must stay first, the macros are used by all following modules
#[macro_use]
mod fmt;

pub mod clock;
pub(crate) mod commands;
pub mod config;
pub mod connection;
pub mod cursor;
pub(crate) mod engine;
pub mod error;
pub mod manager;
pub mod port;
pub mod responses;
pub mod scanner;
pub mod socket;
pub mod stack;
pub(crate) mod switch;
pub mod tls;
pub mod wifi;

pub use clock::{Clock, Deadline, Duration, Instant};
pub use config::Config;
pub use connection::Connection;
pub use error::{CommandError, Error, ErrorEvent};
pub use manager::{ChannelMode, ModuleState, Topology, TransportManager};
pub use port::{Parity, PortConfig, SerialPort, StopBits};
pub use responses::{ModuleSocketStatus, UartStatistics};
pub use socket::{IpVersion, Protocol, SocketStatus};
pub use stack::Socket;
pub use tls::{CertificateKind, CertificateName};
pub use wifi::{IpConfiguration, IpMode, MacAddress, ScanResult, Security};

#[cfg(test)]
mod tests;
