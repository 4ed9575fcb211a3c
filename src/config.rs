//! # Harness Configuration
//!
//! Settings for standing up route reflector clusters, loaded from
//! environment variables with defaults.
//!
//! The etcd scheme is resolved exactly once here into an [`EtcdTransport`].
//! Nothing downstream reads `ETCD_SCHEME` again.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::{HarnessError, Result};
use crate::network;

/// Client TLS material for an etcd cluster running with TLS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    /// CA certificate used to validate etcd
    pub ca_cert: PathBuf,
    /// Client certificate presented to etcd
    pub cert: PathBuf,
    /// Private key for the client certificate
    pub key: PathBuf,
}

/// How route reflectors and the harness talk to etcd
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtcdTransport {
    /// Plain HTTP, no authentication
    Plain,
    /// HTTPS with CA validation and client-certificate authentication
    Secure(TlsFiles),
}

impl EtcdTransport {
    /// Resolve the transport from an `ETCD_SCHEME` value
    ///
    /// Only the exact value `https` selects TLS; anything else, including an
    /// unset variable, selects plain HTTP.
    #[must_use]
    pub fn from_scheme(scheme: Option<&str>, tls: TlsFiles) -> Self {
        match scheme {
            Some("https") => EtcdTransport::Secure(tls),
            _ => EtcdTransport::Plain,
        }
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            EtcdTransport::Plain => "http",
            EtcdTransport::Secure(_) => "https",
        }
    }

    /// Label used for metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EtcdTransport::Plain => "plain",
            EtcdTransport::Secure(_) => "secure",
        }
    }
}

/// Everything the cluster manager needs besides its group counts
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// etcd `host:port`, as passed to route reflectors in `ETCD_AUTHORITY`
    pub etcd_authority: String,
    pub transport: EtcdTransport,
    /// Directory whose `certs/` subdirectory is mounted into route reflectors
    pub checkout_dir: PathBuf,
    /// Image archive loaded into each host
    pub rr_image_tarball: String,
    pub rr_image: String,
    /// Image used for the docker-in-docker hosts
    pub dind_image: String,
    pub etcd_request_timeout_secs: u64,
}

impl HarnessConfig {
    /// Configuration for a plain-HTTP etcd at `<host_ip>:2379`
    #[must_use]
    pub fn new(host_ip: IpAddr) -> Self {
        Self {
            etcd_authority: format!("{host_ip}:{DEFAULT_ETCD_PORT}"),
            transport: EtcdTransport::Plain,
            checkout_dir: PathBuf::from(DEFAULT_CHECKOUT_DIR),
            rr_image_tarball: DEFAULT_RR_IMAGE_TARBALL.to_string(),
            rr_image: DEFAULT_RR_IMAGE.to_string(),
            dind_image: DEFAULT_DIND_IMAGE.to_string(),
            etcd_request_timeout_secs: DEFAULT_ETCD_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Load configuration from environment variables with defaults
    ///
    /// `HOST_IP` falls back to the machine's outbound IPv4 address, which is
    /// the only step that can fail.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HarnessConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let etcd_authority = match lookup("ETCD_AUTHORITY") {
            Some(authority) => authority,
            None => {
                let host_ip: IpAddr = match lookup("HOST_IP") {
                    Some(ip) => ip.parse::<IpAddr>().map_err(|_| HarnessError::InvalidHostIp {
                        host: "HOST_IP".to_string(),
                        value: ip.clone(),
                    })?,
                    None => network::local_ip()?,
                };
                format!("{host_ip}:{DEFAULT_ETCD_PORT}")
            }
        };

        let tls = TlsFiles {
            ca_cert: PathBuf::from(var_or_default(&lookup, "ETCD_CA_CERT_FILE", "")),
            cert: PathBuf::from(var_or_default(&lookup, "ETCD_CERT_FILE", "")),
            key: PathBuf::from(var_or_default(&lookup, "ETCD_KEY_FILE", "")),
        };
        let scheme = lookup("ETCD_SCHEME");

        Ok(Self {
            etcd_authority,
            transport: EtcdTransport::from_scheme(scheme.as_deref(), tls),
            checkout_dir: PathBuf::from(var_or_default(
                &lookup,
                "HOST_CHECKOUT_DIR",
                DEFAULT_CHECKOUT_DIR,
            )),
            rr_image_tarball: var_or_default(&lookup, "RR_IMAGE_TARBALL", DEFAULT_RR_IMAGE_TARBALL),
            rr_image: var_or_default(&lookup, "RR_IMAGE", DEFAULT_RR_IMAGE),
            dind_image: var_or_default(&lookup, "DIND_IMAGE", DEFAULT_DIND_IMAGE),
            etcd_request_timeout_secs: lookup("ETCD_REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_ETCD_REQUEST_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_transport(mut self, transport: EtcdTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Base URL of the etcd client API, e.g. `https://10.0.0.1:2379`
    #[must_use]
    pub fn etcd_base_url(&self) -> String {
        format!("{}://{}", self.transport.scheme(), self.etcd_authority)
    }

    /// Get registration request timeout duration
    #[must_use]
    pub fn etcd_request_timeout(&self) -> Duration {
        Duration::from_secs(self.etcd_request_timeout_secs)
    }

    /// Directory mounted read-only into route reflectors in secure mode
    #[must_use]
    pub fn certs_dir(&self) -> PathBuf {
        self.checkout_dir.join("certs")
    }
}

/// Read a variable as string or return default
fn var_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}
