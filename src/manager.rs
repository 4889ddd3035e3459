//! # Transport manager
//!
//! Owns the serial ports, the socket table, the active channel cursor and the TX/RX path pair.
//!
//! Every operation needing both paths acquires TX before RX. The only way of holding both is
//! [Paths], which is created by [TransportManager::lock_both]. Operations holding just one path
//! release it before acquiring both.
use crate::clock::{Clock, Deadline, Duration, POLL_INTERVAL};
use crate::commands::{
    AssignPortsCommand, CommandErrorHandler, ConfigureUartCommand, DisconnectCommand, EchoOffCommand, FactoryResetCommand,
    RebootCommand, ResetStatisticsCommand, ReturnToDataModeCommand, SetBufferSizeCommand, SetReceiveTimeoutCommand,
    SetRegisterCommand,
};
use crate::config::Config;
use crate::cursor::ActiveChannelCursor;
use crate::engine::CommandEngine;
use crate::error::{CommandError, Error, ErrorEvent};
use crate::port::{PortConfig, SerialPort};
use crate::scanner::{ResponseScanner, TerminalCode};
use crate::socket::{SocketStatus, SocketTable};
use crate::tls::CertificateProfile;
use atat::AtatCmd;
use core::cell::Cell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::{Mutex, MutexGuard};
use fugit::ExtU32;

/// Size of the response buffer
pub const RESPONSE_BUFFER_SIZE: usize = 2048;

/// Number of buffered error events
const EVENT_CAPACITY: usize = 8;

/// Escape sequence switching from transparent to command mode
const ESCAPE_SEQUENCE: &[u8] = b"+++";

/// Max. number of certificate profiles
pub const CERTIFICATE_PROFILES: usize = 5;

/// Module lifecycle state
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleState {
    /// Module has not been opened
    Disconnected,
    /// Module is open, but not associated with an access point
    Connected,
    /// Associated with an access point and IP address assigned
    Joined,
}

/// Sub-mode of single UART setups
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelMode {
    /// AT commands are exchanged
    Command,
    /// Raw application data is exchanged
    Transparent,
}

/// Number of physical UARTs connected to the module
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Topology {
    /// Separate command and data UART, multiple sockets
    Dual,
    /// Commands and data share one UART, one socket
    Single,
}

/// State guarded by the TX path
pub(crate) struct TxPath {
    /// Host side certificate bindings used for TLS connections
    pub(crate) certificate_profiles: [CertificateProfile; CERTIFICATE_PROFILES],
}

/// State guarded by the RX path
pub(crate) struct RxPath {
    pub(crate) scanner: ResponseScanner<RESPONSE_BUFFER_SIZE>,

    /// Number of data channel bytes received since the last statistics reset
    pub(crate) received: u32,
}

/// Both paths, acquired in TX -> RX order
pub(crate) struct Paths<'a> {
    pub(crate) tx: MutexGuard<'a, CriticalSectionRawMutex, TxPath>,
    pub(crate) rx: MutexGuard<'a, CriticalSectionRawMutex, RxPath>,
}

/// Central client multiplexing logical sockets over the module's single data channel
///
/// SOCKETS: Number of socket slots. The ULPGN firmware supports 4.
///
/// QUEUE_SIZE: Receive queue size per socket in bytes.
pub struct TransportManager<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Port for AT commands
    pub(crate) command_port: CP,

    /// Port for application data. Same physical port as the command port in single UART setups.
    pub(crate) data_port: DP,

    pub(crate) clock: C,

    pub(crate) config: Config,

    topology: Topology,

    tx: Mutex<CriticalSectionRawMutex, TxPath>,

    rx: Mutex<CriticalSectionRawMutex, RxPath>,

    pub(crate) sockets: SocketTable<SOCKETS, QUEUE_SIZE>,

    pub(crate) cursor: ActiveChannelCursor,

    state: BlockingMutex<CriticalSectionRawMutex, Cell<ModuleState>>,

    mode: BlockingMutex<CriticalSectionRawMutex, Cell<ChannelMode>>,

    events: Channel<CriticalSectionRawMutex, ErrorEvent, EVENT_CAPACITY>,
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Creates a manager using separate UARTs for commands and data
    pub fn new_dual(command_port: CP, data_port: DP, clock: C, config: Config) -> Self {
        Self::new(command_port, data_port, clock, config, Topology::Dual)
    }

    fn new(command_port: CP, data_port: DP, clock: C, config: Config, topology: Topology) -> Self {
        let limit = match topology {
            Topology::Dual => SOCKETS,
            Topology::Single => 1,
        };

        Self {
            command_port,
            data_port,
            clock,
            config,
            topology,
            tx: Mutex::new(TxPath {
                certificate_profiles: Default::default(),
            }),
            rx: Mutex::new(RxPath {
                scanner: ResponseScanner::new(),
                received: 0,
            }),
            sockets: SocketTable::new(limit),
            cursor: ActiveChannelCursor::new(),
            state: BlockingMutex::new(Cell::new(ModuleState::Disconnected)),
            mode: BlockingMutex::new(Cell::new(ChannelMode::Command)),
            events: Channel::new(),
        }
    }

    /// Opens the module: resets it, configures the UARTs and prepares the data channel
    pub fn open(&self) -> Result<(), Error> {
        if self.state() != ModuleState::Disconnected {
            return Err(Error::AlreadyOpen);
        }

        let mut paths = self.lock_both()?;
        if self.state() != ModuleState::Disconnected {
            return Err(Error::AlreadyOpen);
        }

        info!("Opening module");
        self.command_port
            .configure(&PortConfig::new(self.config.default_baud_rate, false))
            .map_err(|_| Error::SerialOpenFailed)?;
        self.set_mode(ChannelMode::Command);

        self.reset_module(&mut paths);
        self.configure_data_channel(&mut paths)?;

        self.sockets.reset_all();
        self.cursor.reset();
        self.set_state(ModuleState::Connected);
        info!("Module open");
        Ok(())
    }

    /// Closes the module. Disconnects from the access point and resets all sockets.
    pub fn close(&self) -> Result<(), Error> {
        if self.state() == ModuleState::Disconnected {
            return Ok(());
        }

        let mut paths = self.lock_both()?;
        if self.state() == ModuleState::Joined {
            if let Err(error) = self.disconnect_access_point(&mut paths) {
                warn!("Disconnecting access point failed while closing: {:?}", error);
            }
        }

        self.sockets.reset_all();
        self.cursor.reset();
        paths.rx.received = 0;
        self.set_mode(ChannelMode::Command);
        self.set_state(ModuleState::Disconnected);
        info!("Module closed");
        Ok(())
    }

    /// Moves received data channel bytes into the socket queues
    ///
    /// Entry point for the thread servicing the UART receive interrupt. Returns immediately if
    /// another operation currently holds the RX path.
    ///
    /// The holder routes data while receiving, switching sockets or waiting for the escape
    /// sequence. While a command waits for its response, data channel bytes remain in the data
    /// port's receive buffer, which needs to hold the data of the longest command timeout at the
    /// configured baud rate unless flow control is enabled.
    pub fn poll(&self) -> usize {
        match self.rx.try_lock() {
            Ok(mut rx) => self.route_pending(&mut rx),
            Err(_) => 0,
        }
    }

    /// Returns the next asynchronously reported error, e.g. a socket queue overflow
    pub fn next_event(&self) -> Option<ErrorEvent> {
        self.events.try_receive().ok()
    }

    pub fn state(&self) -> ModuleState {
        self.state.lock(|state| state.get())
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Current sub-mode. Always [ChannelMode::Command] in dual UART setups.
    pub fn mode(&self) -> ChannelMode {
        self.mode.lock(|mode| mode.get())
    }

    /// Socket currently bound to the module's data channel
    pub fn active_socket(&self) -> usize {
        self.cursor.current()
    }

    /// Host side state of the socket
    pub fn socket_status(&self, slot: usize) -> Result<SocketStatus, Error> {
        self.sockets.check(slot)?;
        Ok(self.sockets.status(slot))
    }

    /// Number of received bytes dropped due to a full socket queue
    pub fn overflow_count(&self, slot: usize) -> Result<u32, Error> {
        self.sockets.check(slot)?;
        Ok(self.sockets.overflow_count(slot))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn set_state(&self, state: ModuleState) {
        self.state.lock(|cell| cell.set(state));
    }

    fn set_mode(&self, mode: ChannelMode) {
        self.mode.lock(|cell| cell.set(mode));
    }

    /// Returns an error if the module has not been opened
    pub(crate) fn require_open(&self) -> Result<(), Error> {
        if self.state() == ModuleState::Disconnected {
            return Err(Error::NotOpen);
        }

        Ok(())
    }

    /// Returns an error if the module is not joined to an access point
    pub(crate) fn require_joined(&self) -> Result<(), Error> {
        match self.state() {
            ModuleState::Disconnected => Err(Error::NotOpen),
            ModuleState::Connected => Err(Error::NotJoined),
            ModuleState::Joined => Ok(()),
        }
    }

    /// Acquires the TX path
    pub(crate) fn lock_tx(&self) -> Result<MutexGuard<'_, CriticalSectionRawMutex, TxPath>, Error> {
        self.lock_tx_within(None)
    }

    /// Acquires the TX path, waiting not longer than the caller's deadline
    pub(crate) fn lock_tx_within(
        &self,
        limit: Option<&Deadline>,
    ) -> Result<MutexGuard<'_, CriticalSectionRawMutex, TxPath>, Error> {
        self.acquire(&self.tx, limit)
    }

    /// Acquires the RX path
    pub(crate) fn lock_rx(&self) -> Result<MutexGuard<'_, CriticalSectionRawMutex, RxPath>, Error> {
        self.lock_rx_within(None)
    }

    /// Acquires the RX path, waiting not longer than the caller's deadline
    pub(crate) fn lock_rx_within(
        &self,
        limit: Option<&Deadline>,
    ) -> Result<MutexGuard<'_, CriticalSectionRawMutex, RxPath>, Error> {
        self.acquire(&self.rx, limit)
    }

    /// Acquires both paths in TX -> RX order. TX is released again if RX is not available in time.
    pub(crate) fn lock_both(&self) -> Result<Paths<'_>, Error> {
        self.lock_both_within(None)
    }

    pub(crate) fn lock_both_within(&self, limit: Option<&Deadline>) -> Result<Paths<'_>, Error> {
        let tx = self.lock_tx_within(limit)?;
        let rx = self.lock_rx_within(limit)?;
        Ok(Paths { tx, rx })
    }

    /// Waits for the mutex until the mutex timeout or the caller's deadline expires
    fn acquire<'a, T>(
        &self,
        mutex: &'a Mutex<CriticalSectionRawMutex, T>,
        limit: Option<&Deadline>,
    ) -> Result<MutexGuard<'a, CriticalSectionRawMutex, T>, Error> {
        let deadline = Deadline::start_within(&self.clock, self.config.mutex_timeout, limit);

        loop {
            if let Ok(guard) = mutex.try_lock() {
                return Ok(guard);
            }

            if deadline.is_expired(&self.clock) {
                warn!("Timeout while waiting for TX/RX path");
                return Err(Error::MutexTimeout);
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Command engine on the command port
    pub(crate) fn engine<'a>(&'a self, rx: &'a mut RxPath) -> CommandEngine<'a, CP, C, RESPONSE_BUFFER_SIZE> {
        CommandEngine::new(&self.command_port, &self.clock, &mut rx.scanner)
    }

    /// Sends a command, expecting OK
    pub(crate) fn command<Cmd: AtatCmd + CommandErrorHandler>(
        &self,
        paths: &mut Paths<'_>,
        command: &Cmd,
    ) -> Result<(), Error> {
        self.ensure_command_mode(paths)?;
        let result = self.engine(&mut paths.rx).execute(command);
        self.check_result(command, result)
    }

    /// Sends a command, expecting OK and capturing the fields of the first line matching the pattern
    pub(crate) fn query<Cmd: AtatCmd + CommandErrorHandler>(
        &self,
        paths: &mut Paths<'_>,
        command: &Cmd,
        pattern: &'static str,
    ) -> Result<(), Error> {
        self.ensure_command_mode(paths)?;
        let result = self.engine(&mut paths.rx).query(command, pattern);
        self.check_result(command, result)?;

        if !paths.rx.scanner.is_matched() {
            return Err(command.command_error(CommandError::UnexpectedResponse));
        }

        Ok(())
    }

    /// Maps the terminal code of a command to the command's error
    pub(crate) fn check_result<Cmd: CommandErrorHandler>(
        &self,
        command: &Cmd,
        result: Result<TerminalCode, CommandError>,
    ) -> Result<(), Error> {
        match result {
            Ok(TerminalCode::Ok) => Ok(()),
            Ok(code) => Err(command.command_error(CommandError::Terminal(code))),
            Err(error) => {
                if error == CommandError::BufferOverflow {
                    self.post_event(ErrorEvent::ResponseBufferOverflow);
                }
                Err(command.command_error(error))
            }
        }
    }

    /// Switches a single UART setup to command mode. No-op in dual UART setups.
    pub(crate) fn ensure_command_mode(&self, paths: &mut Paths<'_>) -> Result<(), Error> {
        if self.topology == Topology::Dual || self.mode() == ChannelMode::Command {
            return Ok(());
        }

        debug!("Entering command mode");
        self.sleep_routing(&mut paths.rx, self.config.escape_guard_time);
        self.engine(&mut paths.rx)
            .send_raw(ESCAPE_SEQUENCE, self.config.transmit_timeout)?;

        // Data sent by the module before noticing the escape sequence
        self.sleep_routing(&mut paths.rx, self.config.escape_response_delay);
        self.set_mode(ChannelMode::Command);

        match self.engine(&mut paths.rx).recv_terminal(3_000.millis()) {
            Ok(TerminalCode::Ok) => Ok(()),
            Ok(code) => {
                self.set_mode(ChannelMode::Transparent);
                Err(Error::ModuleCommError(CommandError::Terminal(code)))
            }
            Err(error) => {
                self.set_mode(ChannelMode::Transparent);
                Err(Error::ModuleCommError(error))
            }
        }
    }

    /// Switches a single UART setup to transparent mode. No-op in dual UART setups.
    pub(crate) fn ensure_transparent_mode(&self, paths: &mut Paths<'_>) -> Result<(), Error> {
        if self.topology == Topology::Dual || self.mode() == ChannelMode::Transparent {
            return Ok(());
        }

        debug!("Entering transparent mode");
        let command = ReturnToDataModeCommand;
        let result = self.engine(&mut paths.rx).execute(&command);
        self.check_result(&command, result)?;

        self.set_mode(ChannelMode::Transparent);
        self.data_port.set_flow_pause(false);
        Ok(())
    }

    /// Moves all pending data channel bytes into the socket queues
    ///
    /// Each byte is attributed by the cursor, so late bytes of the previously active socket end
    /// up in the previous socket's queue.
    pub(crate) fn route_pending(&self, rx: &mut RxPath) -> usize {
        if self.topology == Topology::Single && self.mode() == ChannelMode::Command {
            return 0;
        }

        let mut count = 0;
        while let Ok(byte) = self.data_port.read() {
            let slot = self.cursor.attribute(rx.received);
            rx.received = rx.received.wrapping_add(1);
            count += 1;

            if self.sockets.route_byte(slot, byte).is_err() {
                self.post_event(ErrorEvent::SocketQueueOverflow { slot });
            }
        }

        count
    }

    /// Sleeps the given duration while routing received data
    fn sleep_routing(&self, rx: &mut RxPath, duration: Duration) {
        let deadline = Deadline::start(&self.clock, duration);
        while !deadline.is_expired(&self.clock) {
            self.route_pending(rx);
            self.clock.sleep(POLL_INTERVAL);
        }
        self.route_pending(rx);
    }

    /// Reports an error without blocking. Events get dropped if nobody consumes them.
    pub(crate) fn post_event(&self, event: ErrorEvent) {
        if self.events.try_send(event).is_err() {
            trace!("Event queue full, dropping event");
        }
    }

    /// Factory reset and general tuning. Failures are tolerated, the module reports its real
    /// state with the following configuration commands.
    fn reset_module(&self, paths: &mut Paths<'_>) {
        let results = [
            self.command(paths, &FactoryResetCommand),
            self.command(paths, &RebootCommand),
            self.command(paths, &EchoOffCommand),
            self.command(paths, &DisconnectCommand),
            self.command(paths, &SetRegisterCommand::busy_retry(true)),
            self.command(paths, &SetRegisterCommand::escape_guard_time(10)),
            self.command(paths, &SetBufferSizeCommand::new(self.config.module_buffer_size)),
            self.command(paths, &SetReceiveTimeoutCommand::new(1)),
            self.command(paths, &SetRegisterCommand::transparent_echo(false)),
            self.command(paths, &SetRegisterCommand::data_flow_control(false)),
        ];

        for result in results {
            if let Err(error) = result {
                warn!("Module reset command failed: {:?}", error);
            }
        }
    }

    /// Configures the module UART and the host ports of the data channel
    fn configure_data_channel(&self, paths: &mut Paths<'_>) -> Result<(), Error> {
        let baud_rate = self.config.baud_rate;
        let flow_control = self.config.flow_control;
        let port_config = PortConfig::new(baud_rate, flow_control);

        self.command(paths, &ConfigureUartCommand::new(baud_rate, flow_control))?;

        match self.topology {
            Topology::Dual => {
                self.data_port
                    .configure(&port_config)
                    .map_err(|_| Error::SerialOpenFailed)?;
                self.command(paths, &AssignPortsCommand::dual())?;
            }
            Topology::Single => {
                self.command_port
                    .configure(&port_config)
                    .map_err(|_| Error::SerialOpenFailed)?;
            }
        }

        self.clock.sleep(self.config.settle_time);
        self.data_port.discard_input();
        self.data_port.set_flow_pause(false);

        self.reset_statistics(paths)
    }

    /// Resets the module's and the host's data channel byte counters
    pub(crate) fn reset_statistics(&self, paths: &mut Paths<'_>) -> Result<(), Error> {
        self.command(paths, &ResetStatisticsCommand)?;
        paths.rx.received = 0;
        Ok(())
    }
}

impl<P, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<P, P, C, SOCKETS, QUEUE_SIZE>
where
    P: SerialPort + Clone,
    C: Clock,
{
    /// Creates a manager sharing one UART for commands and data, e.g. by passing a reference.
    /// Just a single socket is supported.
    pub fn new_single(port: P, clock: C, config: Config) -> Self {
        Self::new(port.clone(), port, clock, config, Topology::Single)
    }
}
