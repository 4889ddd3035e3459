//! # Socket operations
//!
//! Logical sockets multiplexed over the module's data channel. Sending or receiving on a socket
//! not bound to the data channel switches the channel first.
//!
//! In addition, [TcpClientStack] of [embedded_nal] is implemented for the [TransportManager].
//!
//! ## Example
//!
//! ````ignore
//! let slot = manager.create_socket(Protocol::Tcp, IpVersion::V4)?;
//! manager.connect_socket(slot, Ipv4Addr::new(10, 0, 0, 1), 21, None)?;
//!
//! // Sending some data
//! let sent = manager.send(slot, b"hallo!", 1_000)?;
//!
//! // Receiving some data
//! let mut buffer = [0x0; 64];
//! let length = manager.receive(slot, &mut buffer, 1_000)?;
//!
//! // Closing socket
//! manager.close_socket(slot)?;
//! ````
use crate::clock::{Clock, Deadline, POLL_INTERVAL};
use crate::commands::{
    string_arg, CloseNetworkSocketCommand, ConnectTcpCommand, ConnectUdpCommand, NetworkSocketCommand, SendToCommand,
    SocketStatusCommand,
};
use crate::error::{CommandError, Error};
use crate::manager::{ChannelMode, Paths, RxPath, Topology, TransportManager};
use crate::port::SerialPort;
use crate::responses::{ModuleSocketStatus, SOCKET_STATUS_PATTERN};
use crate::socket::{Buffer, IpVersion, Protocol, SocketStatus};
use core::net::{IpAddr, Ipv4Addr};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::MutexGuard;
use embedded_nal::{SocketAddr, TcpClientStack};

/// Handle of a logical socket used by the [TcpClientStack] implementation
#[derive(Debug)]
pub struct Socket {
    pub(crate) slot: usize,
}

impl Socket {
    pub(crate) fn new(slot: usize) -> Self {
        Self { slot }
    }

    /// Slot index of the socket
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Allocates a free socket slot. The module socket is created when connecting.
    pub fn create_socket(&self, protocol: Protocol, ip_version: IpVersion) -> Result<usize, Error> {
        self.require_joined()?;
        if ip_version == IpVersion::V6 {
            return Err(Error::BadParameter);
        }

        let _paths = self.lock_both()?;
        let slot = self.sockets.allocate(protocol, ip_version)?;
        debug!("Socket {} created", slot);
        Ok(slot)
    }

    /// Connects a created socket to the remote. `server_name` is used for TLS peer verification.
    pub fn connect_socket(
        &self,
        slot: usize,
        address: Ipv4Addr,
        port: u16,
        server_name: Option<&str>,
    ) -> Result<(), Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;
        if address.is_unspecified() || port == 0 {
            return Err(Error::BadParameter);
        }

        let server_name = match server_name {
            Some(name) => Some(string_arg(name)?),
            None => None,
        };

        let mut paths = self.lock_both()?;
        if self.sockets.status(slot) != SocketStatus::Created {
            return Err(Error::BadSocketState);
        }

        self.change_socket(&mut paths, slot)?;
        self.clock.sleep(self.config.connect_delay);

        let protocol = self.sockets.protocol(slot);
        let certificate_id = match protocol {
            Protocol::Tls => Some(self.prepare_tls(&mut paths, address, server_name)?),
            Protocol::Tcp | Protocol::Udp => None,
        };

        self.command(&mut paths, &NetworkSocketCommand::ipv4(protocol.code()))?;

        if let Err(error) = self.connect_module_socket(&mut paths, protocol, address, port) {
            warn!("Connecting socket {} failed: {:?}", slot, error);
            if let Err(error) = self.command(&mut paths, &CloseNetworkSocketCommand) {
                debug!("Closing module socket after failed connect failed: {:?}", error);
            }
            return Err(error);
        }

        self.sockets.set_certificate_id(slot, certificate_id);
        self.sockets.set_status(slot, SocketStatus::Connected);
        info!("Socket {} connected", slot);
        Ok(())
    }

    /// Sends the data and returns the number of bytes written
    ///
    /// Data is written in chunks of the data port's transmit buffer size. If the timeout elapses,
    /// the number of bytes written so far is returned. A timeout of 0 disables the socket deadline.
    ///
    /// Waiting for the paths and switching the data channel count against the timeout. A switch
    /// not completed in time fails with [Error::ChangeSocketFailed].
    pub fn send(&self, slot: usize, data: &[u8], timeout_ms: u32) -> Result<usize, Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;
        self.require_connected(slot)?;

        if data.is_empty() {
            return Ok(0);
        }

        let deadline = (timeout_ms > 0).then(|| Deadline::start_ms(&self.clock, timeout_ms));

        let tx = self.lock_tx_within(deadline.as_ref())?;
        let _tx = if self.requires_switch(slot) || self.requires_transparent_mode() {
            // RX is just needed for switching and released afterwards
            let rx = self.lock_rx_within(deadline.as_ref())?;
            let mut paths = Paths { tx, rx };
            self.require_connected(slot)?;
            self.change_socket_within(&mut paths, slot, deadline.as_ref())?;
            self.ensure_transparent_mode(&mut paths)?;

            let Paths { tx, rx } = paths;
            drop(rx);
            tx
        } else {
            tx
        };

        self.require_connected(slot)?;
        self.transmit_data(slot, data, deadline.as_ref())
    }

    /// Receives queued data of the socket
    ///
    /// Returns once the buffer is full or the timeout elapsed. A timeout of 0 returns the data
    /// queued at the moment of calling.
    ///
    /// Waiting for the paths and switching the data channel count against the timeout.
    pub fn receive(&self, slot: usize, buffer: &mut [u8], timeout_ms: u32) -> Result<usize, Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;
        if buffer.is_empty() {
            return Err(Error::BadParameter);
        }
        self.require_connected(slot)?;

        let deadline = Deadline::start_ms(&self.clock, timeout_ms);
        let limit = (timeout_ms > 0).then_some(&deadline);
        let mut rx = self.acquire_receive_path(slot, limit)?;
        self.require_connected(slot)?;

        let mut buffer = Buffer::new(buffer);
        loop {
            self.route_pending(&mut rx);
            self.sockets.pop(slot, &mut buffer);

            if buffer.is_full() || deadline.is_expired(&self.clock) {
                break;
            }
            self.clock.sleep(POLL_INTERVAL);
        }

        trace!("Received {} bytes on socket {}", buffer.len(), slot);
        Ok(buffer.len())
    }

    /// Closes the module socket. The slot remains allocated and may be connected again.
    pub fn shutdown(&self, slot: usize) -> Result<(), Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;

        let mut paths = self.lock_both()?;
        match self.sockets.status(slot) {
            SocketStatus::Connected | SocketStatus::Broken => self.close_module_socket(&mut paths, slot),
            SocketStatus::Closed | SocketStatus::Created => Err(Error::BadSocketState),
        }
    }

    /// Closes the socket and frees the slot. Closing a closed socket succeeds.
    pub fn close_socket(&self, slot: usize) -> Result<(), Error> {
        self.sockets.check(slot)?;
        if self.sockets.status(slot) == SocketStatus::Closed {
            return Ok(());
        }

        let mut paths = self.lock_both()?;
        let result = match self.sockets.status(slot) {
            SocketStatus::Closed => return Ok(()),
            SocketStatus::Created => Ok(()),
            SocketStatus::Connected | SocketStatus::Broken if self.is_joined() => {
                self.close_module_socket(&mut paths, slot)
            }
            SocketStatus::Connected | SocketStatus::Broken => {
                debug!("Not joined, skipping module close of socket {}", slot);
                Ok(())
            }
        };

        // Slot is freed even on error, as the module drops the socket anyway when leaving the network
        self.sockets.close(slot);
        debug!("Socket {} closed", slot);
        result
    }

    /// Queries the socket state from the module. A lost connection marks the socket as broken.
    pub fn get_socket_status(&self, slot: usize) -> Result<ModuleSocketStatus, Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;

        let mut paths = self.lock_both()?;
        self.change_socket(&mut paths, slot)?;
        self.query(&mut paths, &SocketStatusCommand, SOCKET_STATUS_PATTERN)?;
        let status = ModuleSocketStatus::from_scanner(&paths.rx.scanner)?;

        if self.sockets.status(slot) == SocketStatus::Connected
            && matches!(status, ModuleSocketStatus::Closed | ModuleSocketStatus::Broken)
        {
            warn!("Connection of socket {} lost", slot);
            self.sockets.set_status(slot, SocketStatus::Broken);
        }

        Ok(status)
    }

    /// True if the data channel is bound to another socket
    pub(crate) fn requires_switch(&self, slot: usize) -> bool {
        self.cursor.current() != slot
    }

    /// True if a single UART setup is still in command mode
    fn requires_transparent_mode(&self) -> bool {
        self.topology() == Topology::Single && self.mode() == ChannelMode::Command
    }

    fn require_connected(&self, slot: usize) -> Result<(), Error> {
        if self.sockets.status(slot) != SocketStatus::Connected {
            return Err(Error::BadSocketState);
        }

        Ok(())
    }

    /// Acquires the RX path with the data channel bound to the slot
    ///
    /// If a switch is required, RX gets released and both paths are acquired in TX -> RX order.
    /// TX is released again after switching.
    fn acquire_receive_path(
        &self,
        slot: usize,
        limit: Option<&Deadline>,
    ) -> Result<MutexGuard<'_, CriticalSectionRawMutex, RxPath>, Error> {
        if !self.requires_switch(slot) && !self.requires_transparent_mode() {
            let rx = self.lock_rx_within(limit)?;

            // Cursor may have moved while waiting
            if !self.requires_switch(slot) && !self.requires_transparent_mode() {
                return Ok(rx);
            }
        }

        let mut paths = self.lock_both_within(limit)?;
        self.change_socket_within(&mut paths, slot, limit)?;
        self.ensure_transparent_mode(&mut paths)?;

        let Paths { tx, rx } = paths;
        drop(tx);
        Ok(rx)
    }

    /// Issues the connect command for the already created module socket
    fn connect_module_socket(
        &self,
        paths: &mut Paths<'_>,
        protocol: Protocol,
        address: Ipv4Addr,
        port: u16,
    ) -> Result<(), Error> {
        match protocol {
            Protocol::Udp => {
                self.command(paths, &ConnectUdpCommand::new(address, port))?;
                self.command(paths, &SendToCommand::new(address, port))
            }
            Protocol::Tcp | Protocol::Tls => self.command(paths, &ConnectTcpCommand::new(address, port)),
        }
    }

    /// Closes the module socket and moves the slot back to created
    fn close_module_socket(&self, paths: &mut Paths<'_>, slot: usize) -> Result<(), Error> {
        self.change_socket(paths, slot)?;
        self.command(paths, &CloseNetworkSocketCommand)?;

        self.sockets.set_status(slot, SocketStatus::Created);
        self.sockets.set_certificate_id(slot, None);
        self.clock.sleep(self.config.close_delay);
        debug!("Module socket {} closed", slot);
        Ok(())
    }

    /// Writes the data to the data port chunk by chunk. Returns the number of confirmed bytes.
    fn transmit_data(&self, slot: usize, data: &[u8], deadline: Option<&Deadline>) -> Result<usize, Error> {
        let chunk_size = self.data_port.transmit_buffer_size().max(1);
        let mut written = 0;

        for chunk in data.chunks(chunk_size) {
            if deadline.is_some_and(|deadline| deadline.is_expired(&self.clock)) {
                break;
            }

            if self.data_port.write(chunk).is_err() {
                warn!("Writing to data port failed after {} bytes", written);
                if written == 0 {
                    return Err(Error::ModuleCommError(CommandError::WriteFailed));
                }
                break;
            }

            if !self.wait_transmit_complete(deadline) {
                warn!("Transmission on socket {} timed out after {} bytes", slot, written);
                break;
            }

            written += chunk.len();
        }

        trace!("Sent {} bytes on socket {}", written, slot);
        Ok(written)
    }

    /// Waits until the data port finished the transmission. Returns false on timeout.
    fn wait_transmit_complete(&self, deadline: Option<&Deadline>) -> bool {
        let transmit_deadline = Deadline::start(&self.clock, self.config.transmit_timeout);

        loop {
            if self.data_port.is_transmit_complete() {
                return true;
            }

            if transmit_deadline.is_expired(&self.clock)
                || deadline.is_some_and(|deadline| deadline.is_expired(&self.clock))
            {
                return false;
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TcpClientStack
    for TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    type TcpSocket = Socket;
    type Error = Error;

    /// Allocates a TCP socket
    fn socket(&mut self) -> Result<Self::TcpSocket, Self::Error> {
        let slot = self.create_socket(Protocol::Tcp, IpVersion::V4)?;
        Ok(Socket::new(slot))
    }

    /// Connects the socket. Just IPv4 is supported.
    fn connect(&mut self, socket: &mut Socket, remote: SocketAddr) -> nb::Result<(), Self::Error> {
        let address = match remote.ip() {
            IpAddr::V4(address) => address,
            IpAddr::V6(_) => return Err(nb::Error::Other(Error::BadParameter)),
        };

        self.connect_socket(socket.slot, address, remote.port(), None)?;
        Ok(())
    }

    /// True if the socket is connected. Connection losses are detected by [TransportManager::get_socket_status].
    fn is_connected(&mut self, socket: &Self::TcpSocket) -> Result<bool, Self::Error> {
        Ok(self.socket_status(socket.slot)? == SocketStatus::Connected)
    }

    /// Sends the buffer within the configured send timeout
    fn send(&mut self, socket: &mut Socket, buffer: &[u8]) -> nb::Result<usize, Self::Error> {
        let timeout = self.config.send_timeout.to_millis();
        match TransportManager::send(self, socket.slot, buffer, timeout)? {
            0 if !buffer.is_empty() => Err(nb::Error::WouldBlock),
            sent => Ok(sent),
        }
    }

    /// Returns the queued data without waiting
    fn receive(&mut self, socket: &mut Self::TcpSocket, buffer: &mut [u8]) -> nb::Result<usize, Self::Error> {
        match TransportManager::receive(self, socket.slot, buffer, 0)? {
            0 => Err(nb::Error::WouldBlock),
            received => Ok(received),
        }
    }

    fn close(&mut self, socket: Self::TcpSocket) -> Result<(), Self::Error> {
        self.close_socket(socket.slot)
    }
}
