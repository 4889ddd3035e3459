//! # Data channel switching
//!
//! The module's acknowledgment of a socket switch is not atomic with the last byte of the old
//! socket's stream. Bytes still in flight when the module switched belong to the old socket.
//!
//! The module's "bytes sent" counter serves as fence: once the switch is acknowledged, the
//! counter value marks the last byte emitted for the old socket. All bytes received by the host
//! in front of this fence get routed to the previous socket, all following bytes to the new one.
use crate::clock::{Clock, Deadline, POLL_INTERVAL};
use crate::commands::{SelectSocketCommand, UartStatisticsCommand};
use crate::error::Error;
use crate::manager::{Paths, RxPath, TransportManager};
use crate::port::SerialPort;
use crate::responses::{UartStatistics, STATISTICS_PATTERN};
use crate::scanner::TerminalCode;

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Binds the module's data channel to the target socket. Requires both paths.
    ///
    /// On failure the cursor remains unchanged.
    pub(crate) fn change_socket(&self, paths: &mut Paths<'_>, target: usize) -> Result<(), Error> {
        self.change_socket_within(paths, target, None)
    }

    /// Same as [TransportManager::change_socket], but gives up once the caller's deadline expires
    pub(crate) fn change_socket_within(
        &self,
        paths: &mut Paths<'_>,
        target: usize,
        limit: Option<&Deadline>,
    ) -> Result<(), Error> {
        let current = self.cursor.current();
        if current == target {
            return Ok(());
        }

        debug!("Switching data channel from socket {} to {}", current, target);
        self.clock
            .sleep(Deadline::bound(&self.clock, self.config.switch_delay, limit));
        self.ensure_command_mode(paths)?;

        let deadline = Deadline::start_within(&self.clock, self.config.switch_timeout, limit);

        // Late bytes of an earlier switch must be routed before the fence is replaced
        let pending = self.cursor.get().fence;
        if let Some(fence) = pending {
            if self.cursor.is_fence_pending(paths.rx.received) {
                self.drain_until(&mut paths.rx, fence.until, &deadline);
            }
        }

        self.data_port.set_flow_pause(true);
        let result = self.select_socket(paths, target, &deadline);
        if result.is_err() {
            self.data_port.set_flow_pause(false);
            warn!("Switching data channel to socket {} failed", target);
            return result;
        }

        self.route_pending(&mut paths.rx);
        self.data_port.set_flow_pause(false);
        debug!("Data channel switched to socket {}", target);
        Ok(())
    }

    /// Issues the select command, retrying on BUSY, and moves the cursor once acknowledged.
    /// Flow is paused on entry and exit.
    fn select_socket(&self, paths: &mut Paths<'_>, target: usize, deadline: &Deadline) -> Result<(), Error> {
        let snapshot = self
            .settled_statistics(paths, deadline)
            .map_err(|_| Error::ChangeSocketFailed)?;
        self.cursor.record_snapshot(snapshot);

        let mut fence = snapshot.sent;
        let command = SelectSocketCommand::new(target);

        loop {
            let result = self.engine(&mut paths.rx).execute(&command);

            match result {
                Ok(TerminalCode::Ok) => break,
                Ok(TerminalCode::Busy) if !deadline.is_expired(&self.clock) => {
                    // Module is still flushing data of the current socket, which needs to be received first
                    debug!("Module busy while switching to socket {}", target);
                    self.data_port.set_flow_pause(false);

                    let flushed = self
                        .settled_statistics(paths, deadline)
                        .map_err(|_| Error::ChangeSocketFailed)?;
                    self.drain_until(&mut paths.rx, flushed.sent, deadline);
                    fence = flushed.sent;

                    self.data_port.set_flow_pause(true);
                }
                result => {
                    self.check_result(&command, result)?;
                    return Err(Error::ChangeSocketFailed);
                }
            }
        }

        // The module switched, so the cursor must follow even if the fence is just an estimate
        match self.settled_statistics(paths, deadline) {
            Ok(statistics) => fence = statistics.sent,
            Err(error) => warn!("Statistics after switch unavailable, using last snapshot: {:?}", error),
        }

        self.cursor.commit(target, fence);
        self.drain_until(&mut paths.rx, fence, deadline);
        Ok(())
    }

    /// Routes received bytes until the host's received counter reaches the given module sent counter
    fn drain_until(&self, rx: &mut RxPath, until: u32, deadline: &Deadline) {
        loop {
            self.route_pending(rx);

            let missing = until.wrapping_sub(rx.received) as i32;
            if missing <= 0 {
                return;
            }

            if deadline.is_expired(&self.clock) {
                warn!("{} bytes of the data channel not received in time", missing);
                return;
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Queries the statistics until the sent counter is identical for the configured number of readings
    fn settled_statistics(&self, paths: &mut Paths<'_>, deadline: &Deadline) -> Result<UartStatistics, Error> {
        let required = self.config.statistics_attempts.max(1);
        let mut last = self.uart_statistics(paths)?;
        let mut identical = 1;

        while identical < required {
            if deadline.is_expired(&self.clock) {
                return Err(Error::ChangeSocketFailed);
            }

            let next = self.uart_statistics(paths)?;
            if next.sent == last.sent {
                identical += 1;
            } else {
                identical = 1;
            }
            last = next;
        }

        Ok(last)
    }

    /// Queries the byte counters of the data channel
    pub(crate) fn uart_statistics(&self, paths: &mut Paths<'_>) -> Result<UartStatistics, Error> {
        self.query(paths, &UartStatisticsCommand, STATISTICS_PATTERN)?;
        Ok(UartStatistics::from_scanner(&paths.rx.scanner)?)
    }
}
