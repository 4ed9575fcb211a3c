//! # Hosts
//!
//! Container-backed hosts that route reflectors run on.
//!
//! Each provisioner implements [`HostProvisioner`] and hands out boxed
//! [`Host`]s. The cluster manager only talks to these traits, so tests can
//! substitute in-memory hosts.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::Result;

/// Options applied when a host is provisioned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions {
    /// Start the networking system (calico node) on the host once it is up
    pub start_calico: bool,
}

impl HostOptions {
    /// A bare host: container runtime only, no networking system
    #[must_use]
    pub fn bare() -> Self {
        Self {
            start_calico: false,
        }
    }
}

/// A provisioned host
#[async_trait]
pub trait Host: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Address route reflector peers reach this host on
    fn ip(&self) -> IpAddr;

    /// Run a shell command on the host and return its stdout
    async fn execute(&self, command: &str) -> Result<String>;

    /// Destroy the host
    ///
    /// May fail with [`HarnessError::Cancelled`](crate::HarnessError::Cancelled)
    /// if the user interrupts the removal.
    async fn cleanup(&self) -> Result<()>;
}

/// Creates hosts by name
#[async_trait]
pub trait HostProvisioner: Send + Sync {
    async fn provision(&self, name: &str, options: HostOptions) -> Result<Box<dyn Host>>;
}

pub mod docker;

pub use docker::{DockerHost, DockerHostProvisioner};
