//! # Route Reflector Cluster
//!
//! Stands up, tracks, rotates and tears down a cluster of route reflectors
//! grouped into redundancy groups.
//!
//! ## Lifecycle
//!
//! 1. [`RouteReflectorCluster::setup`] provisions `num_redundancy_groups`
//!    groups of `num_in_redundancy_group` hosts each, launches a route
//!    reflector on every host and registers it in etcd.
//! 2. Tests pick groups round-robin with
//!    [`RouteReflectorCluster::get_redundancy_group`].
//! 3. [`RouteReflectorCluster::teardown`] cleans up every host it can.
//!
//! [`RouteReflectorCluster::scoped`] runs all three and guarantees step 3
//! on every exit path, including panics.
//!
//! Setup is not atomic: a failure part way through leaves earlier route
//! reflectors running and registered until teardown.

use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::host::{DockerHostProvisioner, Host, HostOptions, HostProvisioner};
use crate::interrupt::Interrupt;
use crate::network;
use crate::observability::metrics;
use crate::registry::{EtcdRegistry, RouteReflectorEntry, RouteReflectorRegistry};

pub mod launch;

/// One route reflector and the host it runs on
#[derive(Debug)]
pub struct RouteReflector {
    host: Box<dyn Host>,
    group_index: usize,
}

impl RouteReflector {
    #[must_use]
    pub fn name(&self) -> &str {
        self.host.name()
    }

    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.host.ip()
    }

    /// Index of the redundancy group this route reflector belongs to
    #[must_use]
    pub fn group_index(&self) -> usize {
        self.group_index
    }

    #[must_use]
    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }
}

/// Route reflectors sharing one cluster identifier
///
/// Members are kept in creation order and removed from the back.
#[derive(Debug)]
pub struct RedundancyGroup {
    index: usize,
    cluster_id: Ipv4Addr,
    members: Vec<RouteReflector>,
}

impl RedundancyGroup {
    /// An empty group
    #[must_use]
    pub fn new(index: usize, cluster_id: Ipv4Addr) -> Self {
        Self {
            index,
            cluster_id,
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn cluster_id(&self) -> Ipv4Addr {
        self.cluster_id
    }

    #[must_use]
    pub fn members(&self) -> &[RouteReflector] {
        &self.members
    }

    /// Addresses of the members, in creation order
    #[must_use]
    pub fn ips(&self) -> Vec<IpAddr> {
        self.members.iter().map(RouteReflector::ip).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Outcome of a completed teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Hosts cleaned up successfully
    pub cleaned: usize,
    /// Hosts whose cleanup failed and was skipped
    pub failed: usize,
}

pub struct RouteReflectorCluster {
    num_in_redundancy_group: usize,
    num_redundancy_groups: usize,
    config: HarnessConfig,
    provisioner: Arc<dyn HostProvisioner>,
    registry: Arc<dyn RouteReflectorRegistry>,
    redundancy_groups: VecDeque<RedundancyGroup>,
}

impl fmt::Debug for RouteReflectorCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteReflectorCluster")
            .field("num_in_redundancy_group", &self.num_in_redundancy_group)
            .field("num_redundancy_groups", &self.num_redundancy_groups)
            .field("config", &self.config)
            .field("redundancy_groups", &self.redundancy_groups)
            .finish_non_exhaustive()
    }
}

impl RouteReflectorCluster {
    /// Describe a cluster; nothing is started until [`setup`](Self::setup)
    #[must_use]
    pub fn new(
        num_in_redundancy_group: usize,
        num_redundancy_groups: usize,
        config: HarnessConfig,
        provisioner: Arc<dyn HostProvisioner>,
        registry: Arc<dyn RouteReflectorRegistry>,
    ) -> Self {
        Self {
            num_in_redundancy_group,
            num_redundancy_groups,
            config,
            provisioner,
            registry,
            redundancy_groups: VecDeque::new(),
        }
    }

    /// Describe a cluster of docker-in-docker hosts registered in etcd
    pub fn with_docker(
        num_in_redundancy_group: usize,
        num_redundancy_groups: usize,
        config: HarnessConfig,
        interrupt: Interrupt,
    ) -> Result<Self> {
        let provisioner = Arc::new(DockerHostProvisioner::new(&config, interrupt.clone())?);
        let registry = Arc::new(EtcdRegistry::new(&config, interrupt)?);
        Ok(Self::new(
            num_in_redundancy_group,
            num_redundancy_groups,
            config,
            provisioner,
            registry,
        ))
    }

    #[must_use]
    pub fn num_in_redundancy_group(&self) -> usize {
        self.num_in_redundancy_group
    }

    #[must_use]
    pub fn num_redundancy_groups(&self) -> usize {
        self.num_redundancy_groups
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Groups in current selection order
    pub fn redundancy_groups(&self) -> impl Iterator<Item = &RedundancyGroup> {
        self.redundancy_groups.iter()
    }

    /// Total route reflectors currently tracked
    #[must_use]
    pub fn route_reflector_count(&self) -> usize {
        self.redundancy_groups.iter().map(RedundancyGroup::len).sum()
    }

    /// Provision, launch and register every route reflector
    ///
    /// Errors propagate immediately without rollback. Each host is tracked as
    /// soon as it is provisioned, so a later [`teardown`](Self::teardown)
    /// still removes hosts left behind by a failed setup.
    pub async fn setup(&mut self) -> Result<&mut Self> {
        info!(
            "Setting up route reflector cluster: {} redundancy groups of {} ({} transport)",
            self.num_redundancy_groups,
            self.num_in_redundancy_group,
            self.config.transport.as_str()
        );

        for ii in 0..self.num_redundancy_groups {
            let cluster_id = network::cluster_id(ii)?;
            self.redundancy_groups
                .push_back(RedundancyGroup::new(ii, cluster_id));

            for jj in 0..self.num_in_redundancy_group {
                let name = format!("RR.{ii}.{jj}");
                let host = self
                    .provisioner
                    .provision(&name, HostOptions::bare())
                    .await?;

                let group = self
                    .redundancy_groups
                    .back_mut()
                    .ok_or(HarnessError::NoRedundancyGroups)?;
                group.members.push(RouteReflector {
                    host,
                    group_index: ii,
                });
                let host = group
                    .members
                    .last()
                    .map(RouteReflector::host)
                    .ok_or(HarnessError::NoRedundancyGroups)?;

                start_route_reflector(&self.config, self.registry.as_ref(), host, cluster_id)
                    .await?;
            }
            debug!("Redundancy group {} ({}) is up", ii, cluster_id);
        }

        info!(
            "Route reflector cluster is up with {} route reflectors",
            self.route_reflector_count()
        );
        Ok(self)
    }

    /// Clean up every route reflector, best effort
    ///
    /// Cleanup failures are logged and skipped. A cancellation stops teardown
    /// immediately and is returned; route reflectors not yet popped stay
    /// tracked.
    pub async fn teardown(&mut self) -> Result<TeardownReport> {
        let mut report = TeardownReport::default();
        if self.route_reflector_count() > 0 {
            info!(
                "Tearing down {} route reflectors...",
                self.route_reflector_count()
            );
        }

        for group in &mut self.redundancy_groups {
            while !group.is_empty() {
                match Self::pop_and_cleanup_route_reflector(group).await {
                    Ok(_) => {
                        report.cleaned += 1;
                        metrics::increment_cleanups();
                    }
                    Err(e) if e.is_cancellation() => {
                        warn!(
                            "Teardown cancelled in redundancy group {}; {} route reflectors left in it",
                            group.index,
                            group.len()
                        );
                        return Err(e);
                    }
                    Err(e) => {
                        report.failed += 1;
                        metrics::increment_cleanup_failures();
                        warn!(
                            "Failed to clean up route reflector in redundancy group {}: {}",
                            group.index, e
                        );
                    }
                }
            }
        }

        if report.cleaned + report.failed > 0 {
            info!(
                "Teardown complete: {} cleaned, {} failed",
                report.cleaned, report.failed
            );
        }
        Ok(report)
    }

    /// Pop the most recently added route reflector off `group` and clean up its host
    ///
    /// The route reflector is removed from the group even when cleanup fails.
    /// Returns `Ok(None)` for an empty group.
    pub async fn pop_and_cleanup_route_reflector(
        group: &mut RedundancyGroup,
    ) -> Result<Option<RouteReflector>> {
        let Some(route_reflector) = group.members.pop() else {
            return Ok(None);
        };
        debug!(
            "Cleaning up route reflector '{}' ({})",
            route_reflector.name(),
            route_reflector.ip()
        );
        route_reflector.host.cleanup().await?;
        Ok(Some(route_reflector))
    }

    /// Next redundancy group in round-robin order
    ///
    /// Moves the front group to the back and returns it. Fails with
    /// [`HarnessError::NoRedundancyGroups`] before setup.
    pub fn get_redundancy_group(&mut self) -> Result<&RedundancyGroup> {
        if self.redundancy_groups.is_empty() {
            return Err(HarnessError::NoRedundancyGroups);
        }
        self.redundancy_groups.rotate_left(1);
        self.redundancy_groups
            .back()
            .ok_or(HarnessError::NoRedundancyGroups)
    }

    /// Run `body` against a freshly set up cluster, then always tear it down
    ///
    /// Teardown runs whether setup or `body` succeed, fail or panic, including
    /// a panic in the closure before it returns its future. A panic resumes
    /// after teardown. Setup and body errors take precedence over
    /// teardown errors, which are then only logged.
    ///
    /// ```no_run
    /// # use route_reflector_harness::{HarnessConfig, Interrupt, RouteReflectorCluster};
    /// # async fn run() -> anyhow::Result<()> {
    /// let config = HarnessConfig::from_env()?;
    /// let cluster = RouteReflectorCluster::with_docker(2, 3, config, Interrupt::on_ctrl_c())?;
    /// cluster
    ///     .scoped(|cluster| {
    ///         Box::pin(async move {
    ///             let group = cluster.get_redundancy_group()?;
    ///             println!("peering with {:?}", group.ips());
    ///             Ok::<_, anyhow::Error>(())
    ///         })
    ///     })
    ///     .await
    /// # }
    /// ```
    pub async fn scoped<F, T, E>(mut self, body: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut RouteReflectorCluster) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<HarnessError>,
    {
        let setup = self.setup().await.map(|_| ());
        let outcome = match setup {
            Ok(()) => {
                // The closure itself may panic before handing back its future
                let cluster = &mut self;
                match std::panic::catch_unwind(AssertUnwindSafe(move || body(cluster))) {
                    Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                    Err(panic) => Err(panic),
                }
            }
            Err(e) => Ok(Err(E::from(e))),
        };

        let teardown = self.teardown().await;

        match outcome {
            Err(panic) => {
                if let Err(e) = teardown {
                    warn!("Teardown after panic failed: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                if let Err(teardown_err) = teardown {
                    warn!("Teardown after failure failed: {}", teardown_err);
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                teardown.map_err(E::from)?;
                Ok(value)
            }
        }
    }
}

impl Drop for RouteReflectorCluster {
    fn drop(&mut self) {
        let remaining = self.route_reflector_count();
        if remaining > 0 {
            warn!(
                "Route reflector cluster dropped with {} route reflectors still running",
                remaining
            );
        }
    }
}

/// Load the image, launch the route reflector container and register it
async fn start_route_reflector(
    config: &HarnessConfig,
    registry: &dyn RouteReflectorRegistry,
    host: &dyn Host,
    cluster_id: Ipv4Addr,
) -> Result<()> {
    host.execute(&launch::image_load_command(config)).await?;
    host.execute(&launch::route_reflector_run_command(config, host.ip()))
        .await?;
    metrics::increment_route_reflectors_started();

    let entry = RouteReflectorEntry {
        ip: host.ip(),
        cluster_id,
    };
    registry.register(&entry).await?;
    metrics::increment_registrations(config.transport.as_str());

    debug!(
        "Route reflector '{}' ({}) started in cluster {}",
        host.name(),
        host.ip(),
        cluster_id
    );
    Ok(())
}
