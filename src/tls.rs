//! # TLS certificate store
//!
//! The module stores certificates in its own flash, addressed by name (`cert<N>.crt` for client
//! certificates, `calist<N>.crt` for CA lists). Certificate profiles bind a certificate ID to a
//! peer, identified by IP address or host name, and are resolved when connecting a TLS socket.
use crate::clock::{Clock, Duration};
use crate::commands::{
    string_arg, CertificateListCommand, CertificateWriteCommand, DnsQueryCommand, TlsAlertCommand, TlsContextCommand,
    TlsLoadCommand, TlsPeerNameCommand,
};
use crate::error::Error;
use crate::manager::{Paths, TransportManager, CERTIFICATE_PROFILES};
use crate::port::SerialPort;
use crate::socket::{Protocol, SocketStatus};
use atat::AtatCmd;
use core::fmt::Write;
use core::net::Ipv4Addr;
use core::str::FromStr;
use heapless::{String, Vec};

/// Max. number of certificates returned by [TransportManager::list_certificates]
pub const MAX_CERTIFICATES: usize = 10;

/// Prefix of a single certificate line in the listing response
const CERTIFICATE_LINE_PREFIX: &str = "+NSSLCERT:";

/// Name of a certificate in the module's store
pub type CertificateName = String<16>;

/// Type of a stored certificate
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CertificateKind {
    /// Client certificate
    Certificate,
    /// List of trusted CA certificates
    CaList,
}

impl CertificateKind {
    /// Name of the certificate with the given ID
    pub fn file_name(&self, id: u8) -> CertificateName {
        let mut name = String::new();
        // Max. 13 chars, always fits
        let _ = match self {
            CertificateKind::Certificate => write!(name, "cert{}.crt", id),
            CertificateKind::CaList => write!(name, "calist{}.crt", id),
        };
        name
    }

    /// Type code used when loading the certificate into the TLS context
    fn load_code(&self) -> u8 {
        match self {
            CertificateKind::Certificate => 1,
            CertificateKind::CaList => 2,
        }
    }
}

/// Binding of a certificate ID to a TLS peer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct CertificateProfile {
    pub(crate) address: Option<Ipv4Addr>,
    pub(crate) host_name: Option<String<253>>,
}

impl CertificateProfile {
    fn is_empty(&self) -> bool {
        self.address.is_none() && self.host_name.is_none()
    }
}

impl<CP, DP, C, const SOCKETS: usize, const QUEUE_SIZE: usize> TransportManager<CP, DP, C, SOCKETS, QUEUE_SIZE>
where
    CP: SerialPort,
    DP: SerialPort,
    C: Clock,
{
    /// Writes a certificate to the module's store
    pub fn write_certificate(&self, id: u8, kind: CertificateKind, data: &[u8]) -> Result<(), Error> {
        self.require_open()?;
        if usize::from(id) >= CERTIFICATE_PROFILES || data.is_empty() {
            return Err(Error::BadParameter);
        }

        let length = u32::try_from(data.len()).map_err(|_| Error::BadParameter)?;
        let command = CertificateWriteCommand::upload(string_arg(&kind.file_name(id))?, length);
        let timeout = Duration::millis(CertificateWriteCommand::MAX_TIMEOUT_MS);

        let mut paths = self.lock_both()?;
        self.ensure_command_mode(&mut paths)?;

        let mut engine = self.engine(&mut paths.rx);
        let result = engine
            .write_command(&command, None)
            .and_then(|_| engine.send_raw(data, self.config.transmit_timeout))
            .and_then(|_| engine.recv_terminal(timeout));

        self.check_result(&command, result)?;
        info!("Certificate {} written ({} bytes)", id, length);
        Ok(())
    }

    /// Erases the certificate. Erasing an unknown certificate succeeds.
    pub fn erase_certificate(&self, name: &str) -> Result<(), Error> {
        self.require_open()?;
        if name.is_empty() {
            return Err(Error::BadParameter);
        }

        let name: CertificateName = String::from_str(name).map_err(|_| Error::BadParameter)?;
        let mut paths = self.lock_both()?;

        if !self.certificate_names(&mut paths)?.contains(&name) {
            debug!("Certificate to erase not found");
            return Ok(());
        }

        self.command(&mut paths, &CertificateWriteCommand::erase(string_arg(&name)?))
    }

    /// Erases all stored certificates
    pub fn erase_all_certificates(&self) -> Result<(), Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        for name in self.certificate_names(&mut paths)? {
            self.command(&mut paths, &CertificateWriteCommand::erase(string_arg(&name)?))?;
        }

        Ok(())
    }

    /// Lists the names of all stored certificates
    pub fn list_certificates(&self) -> Result<Vec<CertificateName, MAX_CERTIFICATES>, Error> {
        self.require_open()?;

        let mut paths = self.lock_both()?;
        self.certificate_names(&mut paths)
    }

    /// Binds the certificate ID to a peer, identified by address and/or host name
    pub fn set_certificate_profile(
        &self,
        id: u8,
        address: Option<Ipv4Addr>,
        host_name: Option<&str>,
    ) -> Result<(), Error> {
        if usize::from(id) >= CERTIFICATE_PROFILES {
            return Err(Error::BadParameter);
        }

        let host_name = match host_name {
            Some(name) if name.is_empty() => return Err(Error::BadParameter),
            Some(name) => Some(String::from_str(name).map_err(|_| Error::BadParameter)?),
            None => None,
        };

        let profile = CertificateProfile { address, host_name };
        if profile.is_empty() {
            return Err(Error::BadParameter);
        }

        let mut tx = self.lock_tx()?;
        tx.certificate_profiles[usize::from(id)] = profile;
        Ok(())
    }

    /// Upgrades a created TCP socket to TLS
    pub fn request_tls(&self, slot: usize) -> Result<(), Error> {
        self.require_joined()?;
        self.sockets.check(slot)?;

        let _paths = self.lock_both()?;
        if self.sockets.status(slot) != SocketStatus::Created
            || self.sockets.protocol(slot) == Protocol::Udp
        {
            return Err(Error::BadSocketState);
        }

        self.sockets.set_protocol(slot, Protocol::Tls);
        Ok(())
    }

    /// Loads the certificates bound to the peer into the TLS context. Returns the certificate ID.
    pub(crate) fn prepare_tls(
        &self,
        paths: &mut Paths<'_>,
        address: Ipv4Addr,
        server_name: Option<atat::heapless::String<253>>,
    ) -> Result<u8, Error> {
        let id = self.find_certificate_profile(paths, address)?;

        self.command(paths, &TlsContextCommand::client())?;

        let names = self.certificate_names(paths)?;
        if names.is_empty() {
            warn!("No certificates stored on module");
            return Err(Error::CertificateNotFound);
        }

        for kind in [CertificateKind::Certificate, CertificateKind::CaList] {
            let name = kind.file_name(id);
            if names.contains(&name) {
                self.command(paths, &TlsLoadCommand::new(string_arg(&name)?, kind.load_code()))?;
            }
        }

        self.command(paths, &TlsAlertCommand::enabled())?;

        if let Some(host) = server_name {
            self.command(paths, &TlsPeerNameCommand::new(host))?;
        }

        Ok(id)
    }

    /// Returns the ID of the first profile matching the peer address, resolving host names if required
    fn find_certificate_profile(&self, paths: &mut Paths<'_>, address: Ipv4Addr) -> Result<u8, Error> {
        let profiles = paths.tx.certificate_profiles.clone();

        for (id, profile) in profiles.iter().enumerate() {
            if profile.address == Some(address) {
                return Ok(id as u8);
            }

            if let Some(host_name) = &profile.host_name {
                let command = DnsQueryCommand::new(string_arg(host_name)?);
                match self.resolve(paths, &command) {
                    Ok(resolved) if resolved == address => return Ok(id as u8),
                    Ok(_) => {}
                    Err(error) => debug!("Resolving certificate profile {} failed: {:?}", id, error),
                }
            }
        }

        warn!("No certificate profile for TLS peer");
        Err(Error::CertificateNotFound)
    }

    /// Lists the stored certificates while holding both paths
    fn certificate_names(&self, paths: &mut Paths<'_>) -> Result<Vec<CertificateName, MAX_CERTIFICATES>, Error> {
        self.command(paths, &CertificateListCommand)?;

        let mut names = Vec::new();
        for line in paths.rx.scanner.lines() {
            if let Some(name) = line.strip_prefix(CERTIFICATE_LINE_PREFIX) {
                if let Ok(name) = String::from_str(name.trim()) {
                    if names.push(name).is_err() {
                        break;
                    }
                }
            }
        }

        Ok(names)
    }
}
