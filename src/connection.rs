//! # Blocking I/O handle
//!
//! [Connection] binds a connected socket to [embedded_io::Read] and [embedded_io::Write].
//!
//! Reads and writes not completing within the connection's timeout fail with
//! [Error::SocketTimeout]. A timeout of 0 lets reads wait for data as long as the socket is
//! connected.
use crate::clock::{Clock, Deadline, POLL_INTERVAL};
use crate::error::Error;
use crate::manager::TransportManager;
use crate::port::SerialPort;
use crate::socket::SocketStatus;

/// Connected socket usable as [embedded_io] reader and writer
pub struct Connection<'a, CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    manager: &'a TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>,
    slot: usize,

    /// Send and receive timeout, 0 for none
    timeout_ms: u32,
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Returns an I/O handle of the connected socket
    pub fn connection(
        &self,
        slot: usize,
        timeout_ms: u32,
    ) -> Result<Connection<'_, CP, DP, C, SOCKETS, QUEUE_SIZE>, Error> {
        if self.socket_status(slot)? != SocketStatus::Connected {
            return Err(Error::BadSocketState);
        }

        Ok(Connection {
            manager: self,
            slot,
            timeout_ms,
        })
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> Connection<'_, CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> embedded_io::ErrorType
    for Connection<'_, CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    type Error = Error;
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> embedded_io::Read
    for Connection<'_, CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Blocks until at least one byte was received. Returns 0 once the socket is no longer connected.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }

        let clock = &self.manager.clock;
        let deadline = (self.timeout_ms > 0).then(|| Deadline::start_ms(clock, self.timeout_ms));

        loop {
            if self.manager.socket_status(self.slot)? != SocketStatus::Connected {
                return Ok(0);
            }

            let received = self.manager.receive(self.slot, buf, 0)?;
            if received > 0 {
                return Ok(received);
            }

            if deadline.is_some_and(|deadline| deadline.is_expired(clock)) {
                return Err(Error::SocketTimeout);
            }
            clock.sleep(POLL_INTERVAL);
        }
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> embedded_io::Write
    for Connection<'_, CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match self.manager.send(self.slot, buf, self.timeout_ms)? {
            0 if !buf.is_empty() => Err(Error::SocketTimeout),
            sent => Ok(sent),
        }
    }

    /// Data is handed to the data port synchronously
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
