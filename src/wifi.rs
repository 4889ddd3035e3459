//! # WIFI access point client
//!
//! Joining a network, obtaining address information and network diagnostics.
//!
//! Note: While joining, the module retries the association up to [Config::join_attempts](crate::Config)
//! times. With DHCP, the assigned address is polled afterwards.
//!
//! ## Example
//!
//! ````ignore
//! manager.open()?;
//!
//! let address = manager.connect_ap("test_wifi", "secret", Security::Wpa2, IpMode::Dhcp)?;
//! assert!(manager.is_joined());
//!
//! let remote = manager.dns_query("example.org")?;
//! manager.ping(remote, 3, 1_000)?;
//! ````
use crate::clock::Clock;
use crate::commands::{
    string_arg, DisconnectCommand, DnsQueryCommand, JoinCommand, PingCommand, QueryDnsServersCommand, QueryIpCommand,
    ScanCommand, SetDhcpCommand, SetDnsServerCommand, SetStaticIpCommand, StatusCommand,
};
use crate::error::{CommandError, Error};
use crate::manager::{ModuleState, Paths, TransportManager};
use crate::port::SerialPort;
use crate::scanner::ResponseScanner;
use core::net::Ipv4Addr;
use core::str::FromStr;
use fugit::ExtU32;
use heapless::{String, Vec};

/// Field pattern of the IP configuration response
const IP_CONFIGURATION_PATTERN: &str = "IP:{}, Mask:{}, Gateway:{}";

/// Field pattern of the MAC address line in the status response
const MAC_ADDRESS_PATTERN: &str = "MAC:{}";

/// Field pattern of the DNS query response
const DNS_QUERY_PATTERN: &str = "+NDNSQUERY:{},{}";

/// Field pattern of the DNS server count line, followed by one address per line
const DNS_SERVERS_PATTERN: &str = "+NDNSSVR:{}";

/// Max. number of access points returned by a scan
pub const SCAN_RESULTS: usize = 16;

/// MAC address in colon separated notation
pub type MacAddress = String<17>;

/// Security of an access point
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Security {
    #[default]
    Open,
    Wep,
    Wpa,
    Wpa2,
}

/// Address assignment when joining an access point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpMode {
    Dhcp,
    Static(IpConfiguration),
}

/// IPv4 configuration of the module
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IpConfiguration {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl IpConfiguration {
    fn from_scanner<const LEN: usize>(scanner: &ResponseScanner<LEN>) -> Result<Self, Error> {
        Ok(Self {
            address: scanner.field(0).ok_or(CommandError::UnexpectedResponse)?,
            mask: scanner.field(1).ok_or(CommandError::UnexpectedResponse)?,
            gateway: scanner.field(2).ok_or(CommandError::UnexpectedResponse)?,
        })
    }
}

/// Access point found by a scan
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanResult {
    pub ssid: String<32>,
    pub bssid: MacAddress,
    pub channel: u8,

    /// Signal strength in dBm
    pub rssi: i16,
    pub security: Security,
}

impl ScanResult {
    /// Parses the scan response. Each access point starts with its `ssid = ` line.
    fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<ScanResult, SCAN_RESULTS> {
        let mut results = Vec::new();
        let mut current: Option<ScanResult> = None;

        for line in lines {
            if let Some(ssid) = line.strip_prefix("ssid = ") {
                if let Some(result) = current.take() {
                    if results.push(result).is_err() {
                        return results;
                    }
                }

                current = Some(ScanResult {
                    ssid: String::from_str(ssid).unwrap_or_default(),
                    ..Default::default()
                });
                continue;
            }

            let Some(result) = current.as_mut() else {
                continue;
            };

            if let Some(bssid) = line.strip_prefix("bssid = ") {
                result.bssid = String::from_str(bssid).unwrap_or_default();
            } else if let Some(channel) = line.strip_prefix("channel = ") {
                result.channel = channel.trim().parse().unwrap_or_default();
            } else if let Some(rssi) = line.strip_prefix("indicator = ") {
                result.rssi = rssi.trim().parse().unwrap_or_default();
            } else if let Some(security) = line.strip_prefix("security = ") {
                // Refined by the following RSN/WPA lines
                result.security = if security.starts_with("NONE") {
                    Security::Open
                } else {
                    Security::Wep
                };
            } else if line.starts_with("RSN/WPA2=") {
                result.security = Security::Wpa2;
            } else if line.starts_with("WPA=") && result.security == Security::Wep {
                result.security = Security::Wpa;
            }
        }

        if let Some(result) = current {
            let _ = results.push(result);
        }

        results
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Joins a WPA/WPA2 access point and returns the assigned IP configuration
    pub fn connect_ap(
        &self,
        ssid: &str,
        passphrase: &str,
        security: Security,
        ip_mode: IpMode,
    ) -> Result<IpConfiguration, Error> {
        self.require_open()?;
        if self.state() == ModuleState::Joined {
            return Err(Error::BadParameter);
        }

        let wpa_version = match security {
            Security::Wpa => 1,
            Security::Wpa2 => 2,
            Security::Open | Security::Wep => return Err(Error::BadParameter),
        };

        if passphrase.len() > 63 {
            return Err(Error::BadParameter);
        }

        if let IpMode::Static(configuration) = ip_mode {
            if configuration.address.is_unspecified() || configuration.mask.is_unspecified() {
                return Err(Error::BadParameter);
            }
        }

        let command = JoinCommand::new(string_arg(ssid)?, wpa_version, string_arg(passphrase)?);

        let mut paths = self.lock_both()?;
        match ip_mode {
            IpMode::Dhcp => self.command(&mut paths, &SetDhcpCommand::new(true))?,
            IpMode::Static(configuration) => {
                self.command(&mut paths, &SetDhcpCommand::new(false))?;
                self.command(
                    &mut paths,
                    &SetStaticIpCommand::new(configuration.address, configuration.mask, configuration.gateway),
                )?;
            }
        }

        self.join(&mut paths, &command)?;

        let configuration = match ip_mode {
            IpMode::Dhcp => self.wait_for_address(&mut paths)?,
            IpMode::Static(configuration) => configuration,
        };

        self.set_state(ModuleState::Joined);
        info!("Joined access point");
        Ok(configuration)
    }

    /// Disconnects from the access point
    pub fn disconnect(&self) -> Result<(), Error> {
        self.require_open()?;
        if self.state() != ModuleState::Joined {
            return Ok(());
        }

        let mut paths = self.lock_both()?;
        self.disconnect_access_point(&mut paths)
    }

    /// True if associated with an access point
    pub fn is_joined(&self) -> bool {
        self.state() == ModuleState::Joined
    }

    /// Returns the current IP configuration
    pub fn get_ip_address(&self) -> Result<IpConfiguration, Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        self.query_ip_configuration(&mut paths)
    }

    /// Returns the module's MAC address
    pub fn get_mac_address(&self) -> Result<MacAddress, Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        self.query(&mut paths, &StatusCommand, MAC_ADDRESS_PATTERN)?;

        let mac = paths.rx.scanner.field_str(0).ok_or(CommandError::UnexpectedResponse)?;
        String::from_str(mac).map_err(|_| Error::ModuleCommError(CommandError::UnexpectedResponse))
    }

    /// Sets the primary and optionally the secondary DNS server
    pub fn set_dns_servers(&self, primary: Ipv4Addr, secondary: Option<Ipv4Addr>) -> Result<(), Error> {
        self.require_open()?;
        if primary.is_unspecified() {
            return Err(Error::BadParameter);
        }

        let mut paths = self.lock_both()?;
        self.command(&mut paths, &SetDnsServerCommand::primary(primary))?;

        if let Some(secondary) = secondary {
            self.command(&mut paths, &SetDnsServerCommand::secondary(secondary))?;
        }

        Ok(())
    }

    /// Returns the primary and the secondary DNS server
    ///
    /// The primary server is [Ipv4Addr::UNSPECIFIED] if the module has no DNS server configured.
    pub fn get_dns_servers(&self) -> Result<(Ipv4Addr, Option<Ipv4Addr>), Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        self.query(&mut paths, &QueryDnsServersCommand, DNS_SERVERS_PATTERN)?;

        let scanner = &paths.rx.scanner;
        let count: usize = scanner.field(0).ok_or(CommandError::UnexpectedResponse)?;

        let mut addresses = scanner
            .lines()
            .skip_while(|line| !line.starts_with("+NDNSSVR:"))
            .skip(1)
            .take(count)
            .map(|line| Ipv4Addr::from_str(line.trim()).map_err(|_| CommandError::UnexpectedResponse));

        let primary = addresses.next().transpose()?.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let secondary = addresses.next().transpose()?;
        Ok((primary, secondary))
    }

    /// Scans for access points
    pub fn scan(&self) -> Result<Vec<ScanResult, SCAN_RESULTS>, Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        self.command(&mut paths, &ScanCommand)?;
        Ok(ScanResult::from_lines(paths.rx.scanner.lines()))
    }

    /// Resolves the host name to an IPv4 address
    pub fn dns_query(&self, name: &str) -> Result<Ipv4Addr, Error> {
        self.require_joined()?;
        if name.is_empty() {
            return Err(Error::BadParameter);
        }

        let command = DnsQueryCommand::new(string_arg(name)?);
        let mut paths = self.lock_both()?;
        self.resolve(&mut paths, &command)
    }

    /// Sends `count` echo requests, `interval_ms` apart. Returns the number of answered requests.
    ///
    /// Fails only if no request was answered.
    pub fn ping(&self, address: Ipv4Addr, count: u16, interval_ms: u32) -> Result<u16, Error> {
        self.require_joined()?;
        if count == 0 || address.is_unspecified() {
            return Err(Error::BadParameter);
        }

        let command = PingCommand::new(address);
        let mut successes = 0;
        let mut last_error = Error::ModuleCommError(CommandError::Timeout);

        for attempt in 0..count {
            if attempt > 0 {
                self.clock.sleep(interval_ms.millis());
            }

            let mut paths = self.lock_both()?;
            match self.command(&mut paths, &command) {
                Ok(_) => successes += 1,
                Err(error) => {
                    debug!("Ping {} failed: {:?}", attempt, error);
                    last_error = error;
                }
            }
        }

        if successes == 0 {
            return Err(last_error);
        }

        Ok(successes)
    }

    /// Disconnects from the access point and resets the data channel counters
    pub(crate) fn disconnect_access_point(&self, paths: &mut Paths<'_>) -> Result<(), Error> {
        self.command(paths, &DisconnectCommand)?;
        self.set_state(ModuleState::Connected);
        info!("Disconnected from access point");

        self.cursor.reset();
        self.reset_statistics(paths)
    }

    /// Resolves the host name while holding both paths
    pub(crate) fn resolve(&self, paths: &mut Paths<'_>, command: &DnsQueryCommand) -> Result<Ipv4Addr, Error> {
        self.query(paths, command, DNS_QUERY_PATTERN)?;

        let scanner = &paths.rx.scanner;
        if scanner.field::<u8>(0) != Some(1) {
            return Err(Error::ModuleCommError(CommandError::UnexpectedResponse));
        }

        scanner
            .field(1)
            .ok_or(Error::ModuleCommError(CommandError::UnexpectedResponse))
    }

    /// Sends the join command, retrying with a disconnect in between
    fn join(&self, paths: &mut Paths<'_>, command: &JoinCommand) -> Result<(), Error> {
        let mut result = Ok(());

        for attempt in 0..self.config.join_attempts.max(1) {
            result = self.command(paths, command);
            if result.is_ok() {
                return Ok(());
            }

            warn!("Join attempt {} failed", attempt + 1);
            if let Err(error) = self.command(paths, &DisconnectCommand) {
                debug!("Disconnect after failed join attempt failed: {:?}", error);
            }
        }

        result
    }

    /// Polls the IP configuration until an address has been assigned by DHCP
    fn wait_for_address(&self, paths: &mut Paths<'_>) -> Result<IpConfiguration, Error> {
        for attempt in 0..self.config.ip_poll_attempts.max(1) {
            if attempt > 0 {
                self.clock.sleep(self.config.ip_poll_interval);
            }

            match self.query_ip_configuration(paths) {
                Ok(configuration) if !configuration.address.is_unspecified() => return Ok(configuration),
                Ok(_) => debug!("No IP address assigned yet"),
                Err(error) => debug!("Querying the IP address failed: {:?}", error),
            }
        }

        warn!("No IP address assigned by DHCP, disconnecting");
        if let Err(error) = self.command(paths, &DisconnectCommand) {
            debug!("Disconnect failed: {:?}", error);
        }

        Err(Error::ModuleCommError(CommandError::UnexpectedResponse))
    }

    fn query_ip_configuration(&self, paths: &mut Paths<'_>) -> Result<IpConfiguration, Error> {
        self.query(paths, &QueryIpCommand, IP_CONFIGURATION_PATTERN)?;
        IpConfiguration::from_scanner(&paths.rx.scanner)
    }
}
