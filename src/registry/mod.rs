//! # Route Reflector Registry
//!
//! Publishes route reflectors into the key-value store so BGP peers can
//! discover them.
//!
//! Wire contract (etcd v2 keys API):
//!
//! ```text
//! PUT /v2/keys/calico/bgp/v1/rr_v4/<ip>
//! Content-Type: application/x-www-form-urlencoded
//!
//! value={"ip":"<ip>","cluster_id":"<cluster id>"}
//! ```

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::RR_V4_KEY_PREFIX;
use crate::error::Result;

/// Document stored for each route reflector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteReflectorEntry {
    pub ip: IpAddr,
    pub cluster_id: Ipv4Addr,
}

impl RouteReflectorEntry {
    /// Key path the entry is stored under
    #[must_use]
    pub fn key_path(&self) -> String {
        rr_key_path(self.ip)
    }
}

/// Key path for the route reflector at `ip`
#[must_use]
pub fn rr_key_path(ip: IpAddr) -> String {
    format!("{RR_V4_KEY_PREFIX}/{ip}")
}

/// Sink for route reflector registrations
#[async_trait]
pub trait RouteReflectorRegistry: Send + Sync {
    async fn register(&self, entry: &RouteReflectorEntry) -> Result<()>;
}

pub mod etcd;

pub use etcd::EtcdRegistry;
