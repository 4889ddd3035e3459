//! Timing and link configuration
use crate::clock::Duration;
use fugit::ExtU32;

/// Configuration of the [TransportManager](crate::TransportManager)
///
/// Defaults match the timing requirements of the ULPGN firmware.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Baud rate of the module after reset
    pub default_baud_rate: u32,

    /// Baud rate of the data channel after opening
    pub baud_rate: u32,

    /// Hardware flow control on the data channel
    pub flow_control: bool,

    /// Max. time to wait for the TX or RX path
    pub mutex_timeout: Duration,

    /// Delay before a socket switch, required by the module between socket commands
    pub switch_delay: Duration,

    /// Max. duration of a socket switch including BUSY retries
    pub switch_timeout: Duration,

    /// Number of consecutive identical statistics readings considered settled
    pub statistics_attempts: u8,

    /// Delay after selecting a socket before connecting it
    pub connect_delay: Duration,

    /// Delay after closing a module socket
    pub close_delay: Duration,

    /// Settle time after reconfiguring the module UART
    pub settle_time: Duration,

    /// Number of attempts for joining an access point
    pub join_attempts: u8,

    /// Number of polls for a DHCP assigned address
    pub ip_poll_attempts: u8,

    /// Interval between polls for a DHCP assigned address
    pub ip_poll_interval: Duration,

    /// Silence required before and after the escape sequence
    pub escape_guard_time: Duration,

    /// Delay between the escape sequence and reading its response
    pub escape_response_delay: Duration,

    /// Max. time to wait for a single transmission to complete
    pub transmit_timeout: Duration,

    /// Socket buffer size of the module
    pub module_buffer_size: u16,

    /// Send timeout of the [TcpClientStack](embedded_nal::TcpClientStack) implementation
    pub send_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_baud_rate: 115_200,
            baud_rate: 460_800,
            flow_control: true,
            mutex_timeout: 10_000.millis(),
            switch_delay: 30.millis(),
            switch_timeout: 15_000.millis(),
            statistics_attempts: 2,
            connect_delay: 200.millis(),
            close_delay: 500.millis(),
            settle_time: 2_000.millis(),
            join_attempts: 5,
            ip_poll_attempts: 5,
            ip_poll_interval: 2_500.millis(),
            escape_guard_time: 210.millis(),
            escape_response_delay: 185.millis(),
            transmit_timeout: 1_000.millis(),
            module_buffer_size: 1420,
            send_timeout: 5_000.millis(),
        }
    }
}
