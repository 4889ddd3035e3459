use crate::clock::{Clock, Duration, Instant};
use crate::config::Config;
use crate::manager::TransportManager;
use crate::port::{PortConfig, SerialPort};
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Number of sockets supported by the simulated module
pub const SOCKETS: usize = 4;

/// Queue size used by most tests
pub const QUEUE_SIZE: usize = 64;

/// Delay between the escape sequence and the module's OK
pub const ESCAPE_RESPONSE_DELAY_MS: u32 = 186;

/// IP address assigned by the simulated DHCP server
pub const ASSIGNED_IP: &str = "192.168.1.10";

pub type ModuleManager<'a> = TransportManager<ModulePort<'a>, ModulePort<'a>, &'a FakeClock, SOCKETS, QUEUE_SIZE>;

/// Clock advanced by sleeping
#[derive(Default)]
pub struct FakeClock {
    now: AtomicU32,
}

impl FakeClock {
    pub fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn advance(&self, duration_ms: u32) {
        self.now.fetch_add(duration_ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.now_ms())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.ticks());
    }
}

/// Wall clock for multithreaded tests
pub struct StdClock {
    start: std::time::Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for StdClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.start.elapsed().as_millis() as u32)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(std::time::Duration::from_millis(duration.ticks() as u64));
    }
}

mock! {
    pub Clock {}

    impl Clock for Clock {
        fn now(&self) -> Instant;
        fn sleep(&self, duration: Duration);
    }
}

mock! {
    pub SerialPort {}

    impl SerialPort for SerialPort {
        type Error = u8;

        fn write(&self, data: &[u8]) -> Result<(), u8>;
        fn is_transmit_complete(&self) -> bool;
        fn read(&self) -> nb::Result<u8, u8>;
        fn set_flow_pause(&self, paused: bool);
        fn configure(&self, config: &PortConfig) -> Result<(), u8>;
        fn transmit_buffer_size(&self) -> usize;
    }
}

/// Peer side of a module socket
#[derive(Default)]
struct Remote {
    /// Socket state reported by +NSTAT
    state: &'static str,

    /// Data sent by the peer, not yet emitted on the data channel
    outbound: VecDeque<u8>,

    /// Data written by the host
    inbound: Vec<u8>,
}

struct ModuleState {
    /// Single UART module currently in transparent mode
    transparent: bool,

    /// Incomplete command line
    line: Vec<u8>,

    /// Pending command responses
    responses: VecDeque<u8>,

    /// Data channel bytes already emitted by the module
    in_flight: VecDeque<u8>,

    remotes: Vec<Remote>,

    /// Socket bound to the data channel
    active: usize,

    /// Data channel bytes emitted by the module
    sent: u32,

    /// Data channel bytes received from the host
    received: u32,

    /// Flow control pause asserted by the host
    paused: bool,

    commands: Vec<String>,

    /// Responses replacing the default behavior of the next command starting with the prefix
    scripted: VecDeque<(String, String)>,

    /// Number of following socket switches answered with BUSY
    busy: usize,

    /// Bytes of the old socket emitted when a switch is acknowledged
    jitter: usize,

    joined: bool,

    /// Number of following join attempts failing
    join_failures: usize,

    /// Number of IP queries reporting no address after joining
    pending_address_polls: usize,

    /// Number of following pings failing
    ping_failures: usize,

    hosts: HashMap<String, String>,

    /// Primary and secondary DNS server
    dns_servers: [Option<String>; 2],

    certificates: Vec<(String, Vec<u8>)>,

    /// Certificate name, expected length and received data of a running upload
    upload: Option<(String, usize, Vec<u8>)>,

    /// Time at which the OK of the escape sequence gets readable
    escape_response_at: Option<u32>,

    transmit_buffer_size: usize,

    /// Number of data writes completing before the transmitter stalls
    stall_after: Option<usize>,

    data_writes: Vec<usize>,

    port_configs: Vec<PortConfig>,

    configure_fails: bool,
}

/// Simulated ULPGN module
///
/// Executes commands sent on the command port and emits peer data on the data port. Peer data
/// is emitted byte by byte while the host reads the data port, unless flow is paused.
pub struct SimulatedModule {
    state: Mutex<ModuleState>,
    pub clock: FakeClock,
}

impl Default for SimulatedModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedModule {
    pub fn new() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert(String::from("example.org"), String::from("93.184.216.34"));

        Self {
            state: Mutex::new(ModuleState {
                transparent: false,
                line: Vec::new(),
                responses: VecDeque::new(),
                in_flight: VecDeque::new(),
                remotes: (0..SOCKETS)
                    .map(|_| Remote {
                        state: "CLOSED",
                        ..Default::default()
                    })
                    .collect(),
                active: 0,
                sent: 0,
                received: 0,
                paused: false,
                commands: Vec::new(),
                scripted: VecDeque::new(),
                busy: 0,
                jitter: 0,
                joined: false,
                join_failures: 0,
                pending_address_polls: 0,
                ping_failures: 0,
                hosts,
                dns_servers: [None, None],
                certificates: Vec::new(),
                upload: None,
                escape_response_at: None,
                transmit_buffer_size: 64,
                stall_after: None,
                data_writes: Vec::new(),
                port_configs: Vec::new(),
                configure_fails: false,
            }),
            clock: FakeClock::default(),
        }
    }

    pub fn command_port(&self) -> ModulePort<'_> {
        ModulePort {
            module: self,
            kind: PortKind::Command,
        }
    }

    pub fn data_port(&self) -> ModulePort<'_> {
        ModulePort {
            module: self,
            kind: PortKind::Data,
        }
    }

    /// Port carrying both commands and data
    pub fn shared_port(&self) -> ModulePort<'_> {
        ModulePort {
            module: self,
            kind: PortKind::Shared,
        }
    }

    /// Manager with separate command and data port
    pub fn dual_manager(&self, config: Config) -> ModuleManager<'_> {
        TransportManager::new_dual(self.command_port(), self.data_port(), &self.clock, config)
    }

    /// Manager sharing one port
    pub fn single_manager(&self, config: Config) -> ModuleManager<'_> {
        TransportManager::new_single(self.shared_port(), &self.clock, config)
    }

    /// Returns all received command lines
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Number of received command lines starting with the prefix
    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    /// Answers the next command starting with the prefix with the given response lines
    pub fn script(&self, prefix: &str, response: &str) {
        self.state()
            .scripted
            .push_back((String::from(prefix), String::from(response)));
    }

    /// Adds data sent by the peer of the socket
    pub fn push_remote(&self, socket: usize, data: &[u8]) {
        self.state().remotes[socket].outbound.extend(data.iter().copied());
    }

    /// Data written by the host to the socket
    pub fn remote_inbound(&self, socket: usize) -> Vec<u8> {
        self.state().remotes[socket].inbound.clone()
    }

    pub fn set_remote_state(&self, socket: usize, state: &'static str) {
        self.state().remotes[socket].state = state;
    }

    pub fn set_busy(&self, count: usize) {
        self.state().busy = count;
    }

    pub fn set_jitter(&self, count: usize) {
        self.state().jitter = count;
    }

    pub fn set_join_failures(&self, count: usize) {
        self.state().join_failures = count;
    }

    pub fn set_pending_address_polls(&self, count: usize) {
        self.state().pending_address_polls = count;
    }

    pub fn set_ping_failures(&self, count: usize) {
        self.state().ping_failures = count;
    }

    pub fn set_transmit_buffer_size(&self, size: usize) {
        self.state().transmit_buffer_size = size;
    }

    pub fn stall_after(&self, writes: usize) {
        self.state().stall_after = Some(writes);
    }

    pub fn fail_configure(&self) {
        self.state().configure_fails = true;
    }

    pub fn add_certificate(&self, name: &str, data: &[u8]) {
        self.state().certificates.push((String::from(name), data.to_vec()));
    }

    pub fn certificate(&self, name: &str) -> Option<Vec<u8>> {
        self.state()
            .certificates
            .iter()
            .find(|(stored, _)| stored == name)
            .map(|(_, data)| data.clone())
    }

    pub fn certificate_count(&self) -> usize {
        self.state().certificates.len()
    }

    /// Sizes of all data port writes
    pub fn data_writes(&self) -> Vec<usize> {
        self.state().data_writes.clone()
    }

    pub fn port_configs(&self) -> Vec<PortConfig> {
        self.state().port_configs.clone()
    }

    pub fn active_socket(&self) -> usize {
        self.state().active
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn is_transparent(&self) -> bool {
        self.state().transparent
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap()
    }

    fn write_command(&self, data: &[u8]) {
        let mut state = self.state();

        let mut data = data;
        if let Some((name, length, mut received)) = state.upload.take() {
            let count = (length - received.len()).min(data.len());
            received.extend_from_slice(&data[..count]);
            data = &data[count..];

            if received.len() == length {
                state.certificates.retain(|(stored, _)| stored != &name);
                state.certificates.push((name, received));
                respond(&mut state, "OK");
            } else {
                state.upload = Some((name, length, received));
            }
        }

        for byte in data {
            if *byte != b'\n' {
                state.line.push(*byte);
                continue;
            }

            let line = String::from_utf8(core::mem::take(&mut state.line)).unwrap();
            let line = String::from(line.trim_end_matches('\r'));

            // Command latency
            self.clock.advance(1);
            execute(&mut state, &line);
        }
    }

    fn write_data(&self, data: &[u8]) {
        let mut state = self.state();
        let active = state.active;
        state.remotes[active].inbound.extend_from_slice(data);
        state.received = state.received.wrapping_add(data.len() as u32);
        state.data_writes.push(data.len());
    }

    fn read_command(&self) -> nb::Result<u8, u8> {
        let mut state = self.state();

        if let Some(at) = state.escape_response_at {
            if self.clock.now_ms() < at {
                return Err(nb::Error::WouldBlock);
            }
            state.escape_response_at = None;
            respond(&mut state, "OK");
        }

        state.responses.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn read_data(&self) -> nb::Result<u8, u8> {
        let mut state = self.state();
        if let Some(byte) = state.in_flight.pop_front() {
            return Ok(byte);
        }

        if state.paused {
            return Err(nb::Error::WouldBlock);
        }

        let active = state.active;
        match state.remotes[active].outbound.pop_front() {
            Some(byte) => {
                state.sent = state.sent.wrapping_add(1);
                Ok(byte)
            }
            None => Err(nb::Error::WouldBlock),
        }
    }

    /// Pending responses are emitted before any data, e.g. the OK preceding the transparent mode
    fn read_shared(&self) -> nb::Result<u8, u8> {
        let (response, transparent) = {
            let mut state = self.state();
            (state.responses.pop_front(), state.transparent)
        };

        match response {
            Some(byte) => Ok(byte),
            None if transparent => self.read_data(),
            None => self.read_command(),
        }
    }

    fn is_transmit_stalled(&self) -> bool {
        let state = self.state();
        matches!(state.stall_after, Some(writes) if state.data_writes.len() > writes)
    }
}

fn respond(state: &mut ModuleState, response: &str) {
    state.responses.extend(response.as_bytes());
    state.responses.extend(b"\r\n");
}

/// Argument list of the command line, without quotes
fn arguments(line: &str) -> Vec<String> {
    match line.split_once('=') {
        Some((_, arguments)) => arguments
            .split(',')
            .map(|argument| String::from(argument.trim_matches('"')))
            .collect(),
        None => Vec::new(),
    }
}

fn execute(state: &mut ModuleState, line: &str) {
    state.commands.push(String::from(line));

    let scripted = state.scripted.iter().position(|(prefix, _)| line.starts_with(prefix.as_str()));
    if let Some(index) = scripted {
        let (_, response) = state.scripted.remove(index).unwrap();
        respond(state, &response);
        return;
    }

    let name = line.split('=').next().unwrap_or_default();
    let arguments = arguments(line);

    match name {
        "AT+USTAT" => {
            let response = format!("recv={} sent={}\r\nOK", state.received, state.sent);
            respond(state, &response);
        }
        "AT+USTATRST" => {
            state.sent = 0;
            state.received = 0;
            respond(state, "OK");
        }
        "AT+NSOCKINDEX" => {
            if state.busy > 0 {
                state.busy -= 1;
                respond(state, "BUSY");
                return;
            }

            let index: usize = arguments[0].parse().unwrap();
            if index >= SOCKETS {
                respond(state, "ERROR");
                return;
            }

            // Bytes already in the UART FIFO when the switch happens
            let old = state.active;
            for _ in 0..state.jitter {
                match state.remotes[old].outbound.pop_front() {
                    Some(byte) => {
                        state.in_flight.push_back(byte);
                        state.sent = state.sent.wrapping_add(1);
                    }
                    None => break,
                }
            }

            state.active = index;
            respond(state, "OK");
        }
        "AT+WAWPA" => {
            if state.join_failures > 0 {
                state.join_failures -= 1;
                respond(state, "ERROR");
                return;
            }

            state.joined = true;
            respond(state, "OK");
        }
        "AT+WD" => {
            state.joined = false;
            respond(state, "OK");
        }
        "AT+NSET?" => {
            let address = if state.joined && state.pending_address_polls == 0 {
                ASSIGNED_IP
            } else {
                state.pending_address_polls = state.pending_address_polls.saturating_sub(1);
                "0.0.0.0"
            };

            let response = format!("IP:{}, Mask:255.255.255.0, Gateway:192.168.1.1\r\nOK", address);
            respond(state, &response);
        }
        "AT+W" => respond(state, "SSID:test_wifi\r\nMAC:00:11:22:33:44:55\r\nOK"),
        "AT+WS" => respond(
            state,
            "ssid = test_wifi\r\nbssid = 00:11:22:33:44:66\r\nchannel = 6\r\nindicator = -45\r\nsecurity = WPA\r\nRSN/WPA2= PSK\r\n\
             ssid = open_wifi\r\nbssid = 00:11:22:33:44:77\r\nchannel = 11\r\nindicator = -70\r\nsecurity = NONE\r\nOK",
        ),
        "AT+NDNSQUERY" => {
            let response = match state.hosts.get(&arguments[0]) {
                Some(address) => format!("+NDNSQUERY:1,{}\r\nOK", address),
                None => String::from("+NDNSQUERY:0\r\nOK"),
            };
            respond(state, &response);
        }
        "AT+NDNSSVR" => {
            let index: usize = arguments[0].parse().unwrap();
            state.dns_servers[index - 1] = Some(arguments[1].clone());
            respond(state, "OK");
        }
        "AT+NDNSSVR?" => {
            let servers: Vec<String> = state.dns_servers.iter().flatten().cloned().collect();
            let mut response = format!("+NDNSSVR:{}\r\n", servers.len());
            for server in servers {
                response.push_str(&format!("{}\r\n", server));
            }
            response.push_str("OK");
            respond(state, &response);
        }
        "AT+NPING" => {
            if state.ping_failures > 0 {
                state.ping_failures -= 1;
                respond(state, "ERROR");
                return;
            }
            respond(state, "OK");
        }
        "AT+NSOCK" => {
            let active = state.active;
            state.remotes[active].state = "SOCKET";
            respond(state, "OK");
        }
        "AT+NCTCP" | "AT+NCUDP" => {
            let active = state.active;
            state.remotes[active].state = "CONNECTED";
            respond(state, "OK");
        }
        "AT+NCLOSE" => {
            let active = state.active;
            state.remotes[active].state = "CLOSED";
            state.remotes[active].outbound.clear();
            respond(state, "OK");
        }
        "AT+NSTAT" => {
            let active = state.active;
            let response = format!("+NSTAT:{},TCP,IPv4\r\nOK", state.remotes[active].state);
            respond(state, &response);
        }
        "AT+NSSLCERT?" => {
            let mut response = String::new();
            for (name, _) in &state.certificates {
                response.push_str(&format!("+NSSLCERT:{}\r\n", name));
            }
            response.push_str("OK");
            respond(state, &response);
        }
        "AT+NSSLCERT" => {
            let length: usize = arguments[1].parse().unwrap();
            if length == 0 {
                state.certificates.retain(|(stored, _)| stored != &arguments[0]);
                respond(state, "OK");
                return;
            }

            state.upload = Some((arguments[0].clone(), length, Vec::new()));
        }
        "ATO" => {
            state.transparent = true;
            respond(state, "OK");
        }
        _ => respond(state, "OK"),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortKind {
    Command,
    Data,
    Shared,
}

/// Host side UART connected to the simulated module
#[derive(Copy, Clone)]
pub struct ModulePort<'a> {
    module: &'a SimulatedModule,
    kind: PortKind,
}

impl SerialPort for ModulePort<'_> {
    type Error = u8;

    fn write(&self, data: &[u8]) -> Result<(), u8> {
        match self.kind {
            PortKind::Command => self.module.write_command(data),
            PortKind::Data => self.module.write_data(data),
            PortKind::Shared => {
                if !self.module.is_transparent() {
                    self.module.write_command(data);
                } else if data == b"+++" {
                    let mut state = self.module.state();
                    state.transparent = false;
                    state.escape_response_at = Some(self.module.clock.now_ms() + ESCAPE_RESPONSE_DELAY_MS);
                } else {
                    self.module.write_data(data);
                }
            }
        }

        Ok(())
    }

    fn is_transmit_complete(&self) -> bool {
        match self.kind {
            PortKind::Command => true,
            PortKind::Data | PortKind::Shared => !self.module.is_transmit_stalled(),
        }
    }

    fn read(&self) -> nb::Result<u8, u8> {
        match self.kind {
            PortKind::Command => self.module.read_command(),
            PortKind::Data => self.module.read_data(),
            PortKind::Shared => self.module.read_shared(),
        }
    }

    fn set_flow_pause(&self, paused: bool) {
        self.module.state().paused = paused;
    }

    fn configure(&self, config: &PortConfig) -> Result<(), u8> {
        let mut state = self.module.state();
        if state.configure_fails {
            return Err(1);
        }

        state.port_configs.push(*config);
        Ok(())
    }

    fn transmit_buffer_size(&self) -> usize {
        self.module.state().transmit_buffer_size
    }
}

/// Configuration with the default timing, which is simulated by the fake clock
pub fn test_config() -> Config {
    Config::default()
}

/// Opens the module and joins the test network
pub fn joined_manager(module: &SimulatedModule) -> ModuleManager<'_> {
    let manager = module.dual_manager(test_config());
    manager.open().unwrap();
    manager
        .connect_ap("test_wifi", "secret", crate::Security::Wpa2, crate::IpMode::Dhcp)
        .unwrap();
    module.clear_commands();
    manager
}

/// Creates and connects a TCP socket
pub fn connected_socket(manager: &ModuleManager<'_>, port: u16) -> usize {
    let slot = manager
        .create_socket(crate::Protocol::Tcp, crate::IpVersion::V4)
        .unwrap();
    manager
        .connect_socket(slot, core::net::Ipv4Addr::new(10, 0, 0, 1), port, None)
        .unwrap();
    slot
}
