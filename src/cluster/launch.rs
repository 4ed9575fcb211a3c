//! # Route Reflector Launch
//!
//! Renders the `docker run` command that starts the route reflector
//! container inside a host.

use std::net::IpAddr;

use crate::config::{EtcdTransport, HarnessConfig};
use crate::constants::RR_CONTAINER_NAME;

/// `docker load` command that makes the route reflector image available on a host
#[must_use]
pub fn image_load_command(config: &HarnessConfig) -> String {
    format!("docker load --input {}", config.rr_image_tarball)
}

/// `docker run` command for a route reflector advertising `ip`
///
/// The container is privileged and shares the host's network namespace.
/// In secure mode it also receives the TLS file locations and a read-only
/// mount of the certificates directory.
#[must_use]
pub fn route_reflector_run_command(config: &HarnessConfig, ip: IpAddr) -> String {
    let mut parts = vec![
        "docker run --privileged --net=host -d".to_string(),
        format!("--name {RR_CONTAINER_NAME}"),
        format!("-e ETCD_AUTHORITY={}", config.etcd_authority),
    ];

    match &config.transport {
        EtcdTransport::Plain => {
            parts.push(format!("-e IP={ip}"));
        }
        EtcdTransport::Secure(tls) => {
            parts.push(format!("-e ETCD_CA_CERT_FILE={}", tls.ca_cert.display()));
            parts.push(format!("-e ETCD_CERT_FILE={}", tls.cert.display()));
            parts.push(format!("-e ETCD_KEY_FILE={}", tls.key.display()));
            parts.push(format!("-e IP={ip}"));
            parts.push("-e ETCD_SCHEME=https".to_string());
            parts.push(format!("-v {certs}:{certs}:ro", certs = config.certs_dir().display()));
        }
    }

    parts.push(config.rr_image.clone());
    parts.join(" ")
}
