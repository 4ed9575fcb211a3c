//! # etcd Registry
//!
//! [`RouteReflectorRegistry`] backed by the etcd v2 HTTP API, using reqwest
//! with rustls. In secure mode the client validates etcd against the
//! configured CA and authenticates with the configured client certificate.
//!
//! Every PUT races the [`Interrupt`]; a registration that loses the race
//! fails with [`HarnessError::Cancelled`].

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use tracing::{debug, info, warn};

use super::{RouteReflectorEntry, RouteReflectorRegistry};
use crate::config::{EtcdTransport, HarnessConfig, TlsFiles};
use crate::error::{HarnessError, Result};
use crate::interrupt::Interrupt;

#[derive(Debug, Clone)]
pub struct EtcdRegistry {
    http_client: Client,
    base_url: String,
    transport: EtcdTransport,
    interrupt: Interrupt,
}

impl EtcdRegistry {
    /// Build a client for the transport selected in `config`
    pub fn new(config: &HarnessConfig, interrupt: Interrupt) -> Result<Self> {
        let builder = Client::builder().timeout(config.etcd_request_timeout());
        let builder = match &config.transport {
            EtcdTransport::Plain => builder,
            EtcdTransport::Secure(tls) => {
                let (ca, identity) = load_tls(tls)?;
                builder
                    .use_rustls_tls()
                    .add_root_certificate(ca)
                    .identity(identity)
            }
        };

        Ok(Self {
            http_client: builder.build()?,
            base_url: config.etcd_base_url(),
            transport: config.transport.clone(),
            interrupt,
        })
    }

    /// Client for an arbitrary base URL, without TLS material
    ///
    /// Used against mock servers; the scheme in `base_url` decides the protocol.
    /// The client never observes an interrupt unless one is attached with
    /// [`with_interrupt`](Self::with_interrupt).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http_client: Client::builder().build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport: EtcdTransport::Plain,
            interrupt: Interrupt::never(),
        })
    }

    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Full URL the entry is PUT to
    #[must_use]
    pub fn entry_url(&self, entry: &RouteReflectorEntry) -> String {
        format!("{}{}", self.base_url, entry.key_path())
    }

    #[must_use]
    pub fn transport(&self) -> &EtcdTransport {
        &self.transport
    }
}

#[async_trait]
impl RouteReflectorRegistry for EtcdRegistry {
    async fn register(&self, entry: &RouteReflectorEntry) -> Result<()> {
        let url = self.entry_url(entry);
        let value = serde_json::to_string(entry)?;
        if self.interrupt.is_triggered() {
            return Err(HarnessError::Cancelled);
        }
        debug!("PUT {} value={}", url, value);

        let request = self
            .http_client
            .put(&url)
            .form(&[("value", value.as_str())])
            .send();
        let response = tokio::select! {
            response = request => response?,
            () = self.interrupt.triggered() => {
                warn!("Interrupted while registering route reflector {}", entry.ip);
                return Err(HarnessError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::Registration {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            "Registered route reflector {} in cluster {} ({})",
            entry.ip,
            entry.cluster_id,
            self.transport.as_str()
        );
        Ok(())
    }
}

fn load_tls(tls: &TlsFiles) -> Result<(Certificate, Identity)> {
    let ca_pem = read_pem(&tls.ca_cert)?;
    let ca = Certificate::from_pem(&ca_pem).map_err(|e| tls_error(&tls.ca_cert, &e))?;

    // rustls identities are a single PEM bundle holding the certificate and key
    let mut identity_pem = read_pem(&tls.cert)?;
    identity_pem.push(b'\n');
    identity_pem.extend(read_pem(&tls.key)?);
    let identity = Identity::from_pem(&identity_pem).map_err(|e| tls_error(&tls.cert, &e))?;

    Ok((ca, identity))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| tls_error(path, &e))
}

fn tls_error(path: &Path, err: &dyn std::fmt::Display) -> HarnessError {
    HarnessError::Tls {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
