//! Driver connection configuration.
//!
//! A [`ConnectionConfig`] is usually loaded from YAML:
//!
//! ```yaml
//! address: quic://csi-driver.kube-system:7443
//! timeout_secs: 15
//! server_name: csi-driver.kube-system
//! ca_file: /etc/rk8s/csi/ca.pem
//! final_codes: [NotFound, InvalidArgument, Unimplemented]
//! ```
//!
//! Environment variables override file values:
//! - `CSI_ADDRESS`: driver endpoint.
//! - `CSI_TIMEOUT_SECS`: per-call timeout in seconds.
//! - `CSI_SERVER_NAME`: TLS server name.
//! - `CSI_CA_FILE`: PEM bundle trusted for the driver certificate.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::FinalCodes;
use crate::error::CsiError;
use crate::status::Code;

const QUIC_SCHEME: &str = "quic://";

fn default_timeout_secs() -> u64 {
    15
}

/// Everything needed to open a [`Connection`](crate::Connection) to a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver endpoint, `host:port` or `quic://host:port`.
    pub address: String,
    /// Bound applied to connection setup and to every RPC.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// TLS server name; defaults to the host part of `address`.
    #[serde(default)]
    pub server_name: Option<String>,
    /// PEM bundle of CA certificates trusted for the driver.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Status codes after which an attach/detach counts as final.
    #[serde(default)]
    pub final_codes: FinalCodes,
}

impl ConnectionConfig {
    /// Config for `address` with default policy.  `timeout` is rounded up to
    /// whole seconds, so a non-zero timeout never becomes zero.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        let timeout_secs = timeout
            .as_secs()
            .saturating_add(u64::from(timeout.subsec_nanos() > 0));
        Self {
            address: address.into(),
            timeout_secs,
            server_name: None,
            ca_file: None,
            final_codes: FinalCodes::default(),
        }
    }

    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(ca_file.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    pub fn with_final_codes(mut self, final_codes: FinalCodes) -> Self {
        self.final_codes = final_codes;
        self
    }

    /// Load and validate a YAML config file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CsiError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| CsiError::Config(format!("cannot open {}: {e}", path.display())))?;
        let mut config: Self = serde_yaml::from_reader(file)
            .map_err(|e| CsiError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from the variables listed in the module docs.
    ///
    /// `lookup` is normally `std::env::var`; it is a parameter so callers can
    /// layer other sources.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), CsiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("CSI_ADDRESS") {
            self.address = address;
        }
        if let Some(timeout) = lookup("CSI_TIMEOUT_SECS") {
            self.timeout_secs = timeout
                .trim()
                .parse()
                .map_err(|e| CsiError::Config(format!("CSI_TIMEOUT_SECS={timeout:?}: {e}")))?;
        }
        if let Some(server_name) = lookup("CSI_SERVER_NAME") {
            self.server_name = Some(server_name);
        }
        if let Some(ca_file) = lookup("CSI_CA_FILE") {
            self.ca_file = Some(ca_file.into());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CsiError> {
        if self.address.trim().is_empty() {
            return Err(CsiError::Config("address must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(CsiError::Config("timeout_secs must be positive".into()));
        }
        if self.final_codes.contains(Code::Ok) {
            return Err(CsiError::Config("Ok cannot be a final error code".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured server name, or the host part of the address.
    pub fn server_name(&self) -> Result<String, CsiError> {
        match &self.server_name {
            Some(name) => Ok(name.clone()),
            None => Ok(self.address.parse::<DriverAddress>()?.host),
        }
    }

    /// Build a rustls client config trusting the certificates in `ca_file`.
    pub fn tls_config(&self) -> Result<rustls::ClientConfig, CsiError> {
        let ca_file = self
            .ca_file
            .as_ref()
            .ok_or_else(|| CsiError::Config("ca_file is required for QUIC transport".into()))?;
        let file = File::open(ca_file)
            .map_err(|e| CsiError::Config(format!("cannot open {}: {e}", ca_file.display())))?;

        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
            let cert = cert
                .map_err(|e| CsiError::Config(format!("bad PEM in {}: {e}", ca_file.display())))?;
            roots.add(cert).map_err(CsiError::config)?;
        }
        if roots.is_empty() {
            return Err(CsiError::Config(format!(
                "no certificates found in {}",
                ca_file.display()
            )));
        }

        Ok(rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

/// A parsed driver endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAddress {
    pub host: String,
    pub port: u16,
}

impl DriverAddress {
    /// Resolve to the first socket address the host maps to.
    pub async fn resolve(&self) -> Result<SocketAddr, CsiError> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| CsiError::InvalidAddress(format!("{self}: {e}")))?
            .next()
            .ok_or_else(|| CsiError::InvalidAddress(format!("{self}: no addresses")))
    }
}

impl FromStr for DriverAddress {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CsiError::InvalidAddress(s.to_owned());
        let rest = s.strip_prefix(QUIC_SCHEME).unwrap_or(s);
        if rest.contains("://") {
            return Err(invalid());
        }

        if let Ok(addr) = rest.parse::<SocketAddr>() {
            if addr.port() == 0 {
                return Err(invalid());
            }
            return Ok(Self {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }

        let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() || host.contains(':') || host.contains('/') {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for DriverAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
