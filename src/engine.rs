//! Issues AT commands and waits for their terminal result
use crate::clock::{Clock, Deadline, Duration, POLL_INTERVAL};
use crate::commands::COMMAND_BUFFER_SIZE;
use crate::error::CommandError;
use crate::port::SerialPort;
use crate::scanner::{ResponseScanner, ScanError, TerminalCode};
use atat::AtatCmd;

/// One call = one command, one terminal result
///
/// Borrows the command port, the clock and the response scanner for the duration of the
/// exchange. The caller holds the TX and RX paths.
pub(crate) struct CommandEngine<'a, P: SerialPort, C: Clock, const LEN: usize> {
    port: &'a P,
    clock: &'a C,
    scanner: &'a mut ResponseScanner<LEN>,
}

impl<'a, P: SerialPort, C: Clock, const LEN: usize> CommandEngine<'a, P, C, LEN> {
    pub fn new(port: &'a P, clock: &'a C, scanner: &'a mut ResponseScanner<LEN>) -> Self {
        Self { port, clock, scanner }
    }

    /// Sends the command and waits for the terminal code
    pub fn execute<Cmd: AtatCmd>(&mut self, command: &Cmd) -> Result<TerminalCode, CommandError> {
        self.write_command(command, None)?;
        self.recv_terminal(Self::timeout::<Cmd>())
    }

    /// Sends the command and captures the fields of the first response line matching the pattern
    pub fn query<Cmd: AtatCmd>(&mut self, command: &Cmd, pattern: &'static str) -> Result<TerminalCode, CommandError> {
        self.write_command(command, Some(pattern))?;
        self.recv_terminal(Self::timeout::<Cmd>())
    }

    /// Sends the command without waiting for a response, e.g. if a raw payload follows
    pub fn write_command<Cmd: AtatCmd>(
        &mut self,
        command: &Cmd,
        pattern: Option<&'static str>,
    ) -> Result<(), CommandError> {
        let discarded = self.port.discard_input();
        if discarded > 0 {
            debug!("Discarded {} stale bytes before command", discarded);
        }

        self.scanner.reset();
        if let Some(pattern) = pattern {
            self.scanner.expect(pattern);
        }

        let mut buffer = [0u8; COMMAND_BUFFER_SIZE];
        let length = command.write(&mut buffer);
        trace!("Sending command of {} bytes", length);

        self.transmit(&buffer[..length], Self::timeout::<Cmd>())
    }

    /// Writes the bytes as they are, in chunks bounded by the transmit buffer size
    ///
    /// The bytes are not scanned. A following [CommandEngine::recv_terminal] call waits for the
    /// module's response.
    pub fn send_raw(&mut self, data: &[u8], timeout: Duration) -> Result<(), CommandError> {
        self.scanner.reset();

        let chunk_size = self.port.transmit_buffer_size().max(1);
        for chunk in data.chunks(chunk_size) {
            self.transmit(chunk, timeout)?;
        }

        Ok(())
    }

    /// Feeds received bytes into the scanner until a terminal code is recognized
    pub fn recv_terminal(&mut self, timeout: Duration) -> Result<TerminalCode, CommandError> {
        let deadline = Deadline::start(self.clock, timeout);

        loop {
            match self.port.read() {
                Ok(byte) => match self.scanner.feed(byte) {
                    Ok(Some(code)) => {
                        trace!("Terminal code received: {:?}", code);
                        return Ok(code);
                    }
                    Ok(None) => {}
                    Err(ScanError::BufferOverflow) => {
                        error!("Response exceeded the response buffer");
                        return Err(CommandError::BufferOverflow);
                    }
                },
                Err(error) => {
                    if let nb::Error::Other(_) = error {
                        warn!("Serial receive error while waiting for a response");
                    }

                    if deadline.is_expired(self.clock) {
                        warn!("Timeout while waiting for a terminal code");
                        return Err(CommandError::Timeout);
                    }
                    self.clock.sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Scanner holding the response of the last command
    pub fn scanner(&self) -> &ResponseScanner<LEN> {
        self.scanner
    }

    /// Starts a transmission and waits for its completion
    fn transmit(&self, data: &[u8], timeout: Duration) -> Result<(), CommandError> {
        self.port.write(data).map_err(|_| CommandError::WriteFailed)?;

        let deadline = Deadline::start(self.clock, timeout);
        while !self.port.is_transmit_complete() {
            if deadline.is_expired(self.clock) {
                return Err(CommandError::WriteFailed);
            }
            self.clock.sleep(POLL_INTERVAL);
        }

        Ok(())
    }

    fn timeout<Cmd: AtatCmd>() -> Duration {
        Duration::millis(Cmd::MAX_TIMEOUT_MS)
    }
}
