//! Abstraction of a physical UART connected to the module
use core::fmt::Debug;

/// Parity setting of a serial port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Number of stop bits of a serial port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    One,
    Two,
}

/// Line configuration applied to a serial port
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,

    /// Hardware flow control (RTS/CTS)
    pub flow_control: bool,
}

impl PortConfig {
    /// 8N1 configuration with the given baud rate
    pub fn new(baud_rate: u32, flow_control: bool) -> Self {
        Self {
            baud_rate,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control,
        }
    }
}

/// Byte transport over one physical UART
///
/// Methods take `&self`, as a port is shared between the sending and the receiving path. A
/// single-UART setup passes the same port twice, which is supported by the implementation for `&T`.
pub trait SerialPort {
    type Error: Debug;

    /// Starts the transmission of the given bytes. Completion is signaled by [SerialPort::is_transmit_complete]
    fn write(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// True if the last transmission has been completed
    fn is_transmit_complete(&self) -> bool;

    /// Returns the next received byte or [nb::Error::WouldBlock] if nothing is pending
    fn read(&self) -> nb::Result<u8, Self::Error>;

    /// Asserts (true) or deasserts (false) the hardware flow control line, pausing the module's transmission
    fn set_flow_pause(&self, paused: bool);

    /// Applies the given line configuration
    fn configure(&self, config: &PortConfig) -> Result<(), Self::Error>;

    /// Max. number of bytes accepted by a single [SerialPort::write] call
    fn transmit_buffer_size(&self) -> usize;

    /// Drops all pending received bytes and returns the count
    fn discard_input(&self) -> usize {
        let mut count = 0;
        while self.read().is_ok() {
            count += 1;
        }
        count
    }
}

impl<T: SerialPort + ?Sized> SerialPort for &T {
    type Error = T::Error;

    fn write(&self, data: &[u8]) -> Result<(), Self::Error> {
        T::write(self, data)
    }

    fn is_transmit_complete(&self) -> bool {
        T::is_transmit_complete(self)
    }

    fn read(&self) -> nb::Result<u8, Self::Error> {
        T::read(self)
    }

    fn set_flow_pause(&self, paused: bool) {
        T::set_flow_pause(self, paused)
    }

    fn configure(&self, config: &PortConfig) -> Result<(), Self::Error> {
        T::configure(self, config)
    }

    fn transmit_buffer_size(&self) -> usize {
        T::transmit_buffer_size(self)
    }

    fn discard_input(&self) -> usize {
        T::discard_input(self)
    }
}
