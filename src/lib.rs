//! Route Reflector Harness Library
//!
//! Stands up and tears down clusters of route reflector containers for
//! overlay networking system tests. Route reflectors are grouped into
//! redundancy groups that share a cluster identifier, launched on
//! docker-in-docker hosts and registered in etcd.
//!
//! Tests are included in the module files and under `tests/`.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod error;
pub mod host;
pub mod interrupt;
pub mod network;
pub mod observability;
pub mod registry;

pub use cluster::{RedundancyGroup, RouteReflector, RouteReflectorCluster, TeardownReport};
pub use config::{EtcdTransport, HarnessConfig, TlsFiles};
pub use error::{HarnessError, Result};
pub use host::{Host, HostOptions, HostProvisioner};
pub use interrupt::{Interrupt, InterruptHandle};
pub use registry::{RouteReflectorEntry, RouteReflectorRegistry};
