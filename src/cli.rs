//! # RRCTL CLI
//!
//! Command-line interface for standing up route reflector clusters by hand,
//! outside of a test run.
//!
//! ## Usage
//!
//! ```bash
//! # Stand up 3 redundancy groups of 2 route reflectors, hold until Ctrl-C
//! rrctl up --per-group 2 --groups 3
//!
//! # Same, against etcd running with TLS
//! ETCD_SCHEME=https ETCD_CA_CERT_FILE=... ETCD_CERT_FILE=... ETCD_KEY_FILE=... rrctl up
//!
//! # Print the cluster identifiers that 4 redundancy groups would use
//! rrctl cluster-ids --groups 4
//! ```
//!
//! While holding, the first Ctrl-C starts teardown. A Ctrl-C during setup
//! or teardown cancels the in-flight docker command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::info;

use route_reflector_harness::network::cluster_id;
use route_reflector_harness::observability::metrics;
use route_reflector_harness::{HarnessConfig, Interrupt, InterruptHandle, RouteReflectorCluster};

/// Route reflector cluster harness CLI
#[derive(Parser)]
#[command(name = "rrctl")]
#[command(
    about = "Route reflector cluster harness CLI",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), ", built ", env!("BUILD_DATETIME"), ")"),
    long_about = None,
    after_help = "\
Configuration is read from the environment:
  ETCD_SCHEME, ETCD_AUTHORITY, HOST_IP, ETCD_CA_CERT_FILE, ETCD_CERT_FILE,
  ETCD_KEY_FILE, HOST_CHECKOUT_DIR, RR_IMAGE_TARBALL, RR_IMAGE, DIND_IMAGE

Examples:
  rrctl up --per-group 2 --groups 3
  rrctl cluster-ids --groups 4
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stand up a route reflector cluster and hold it until Ctrl-C
    Up {
        /// Route reflectors in each redundancy group
        #[arg(long, default_value_t = 1)]
        per_group: usize,

        /// Number of redundancy groups
        #[arg(long, default_value_t = 1)]
        groups: usize,

        /// Print Prometheus metrics after teardown
        #[arg(long)]
        metrics: bool,
    },
    /// Print the cluster identifiers assigned to redundancy groups
    #[command(name = "cluster-ids")]
    ClusterIds {
        /// Number of redundancy groups
        #[arg(long)]
        groups: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configure rustls crypto provider FIRST, before any client is built
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "route_reflector_harness=info,rrctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Up {
            per_group,
            groups,
            metrics,
        } => up_command(per_group, groups, metrics).await,
        Commands::ClusterIds { groups } => cluster_ids_command(groups),
    }
}

/// Stand up the cluster, hold it, then tear it down
async fn up_command(per_group: usize, groups: usize, print_metrics: bool) -> Result<()> {
    metrics::register_metrics()?;

    let config = HarnessConfig::from_env().context("Failed to load harness configuration")?;
    println!("🔄 Standing up {groups} redundancy groups of {per_group} route reflectors");
    println!("   etcd: {}", config.etcd_base_url());

    let (interrupt_handle, interrupt) = Interrupt::manual();
    let hold = Arc::new(Hold::new(interrupt_handle));

    {
        let hold = Arc::clone(&hold);
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if hold.on_ctrl_c() {
                    info!("Received interrupt, tearing down route reflector cluster...");
                }
            }
        });
    }

    let cluster = RouteReflectorCluster::with_docker(per_group, groups, config, interrupt)
        .context("Failed to prepare route reflector cluster")?;

    cluster
        .scoped(|cluster| {
            // Start holding as soon as setup returns
            hold.start();
            Box::pin(async move {
                print_layout(cluster);
                println!();
                println!("✅ Route reflector cluster is up. Press Ctrl-C to tear it down.");
                hold.released().await;
                Ok::<_, anyhow::Error>(())
            })
        })
        .await
        .context("Route reflector cluster run failed")?;

    println!("✅ Route reflector cluster torn down");

    if print_metrics {
        println!();
        print!("{}", metrics::gather_text()?);
    }
    Ok(())
}

/// What a Ctrl-C means during `rrctl up`
///
/// While holding, Ctrl-C releases the hold so teardown can run. At any other
/// time it fires the interrupt and cancels the in-flight docker command.
#[derive(Debug)]
struct Hold {
    holding: AtomicBool,
    release: Notify,
    interrupt: InterruptHandle,
}

impl Hold {
    fn new(interrupt: InterruptHandle) -> Self {
        Self {
            holding: AtomicBool::new(false),
            release: Notify::new(),
            interrupt,
        }
    }

    fn start(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Returns `true` when the Ctrl-C released the hold
    fn on_ctrl_c(&self) -> bool {
        if self.holding.swap(false, Ordering::SeqCst) {
            // A stored permit covers a release before anyone waits
            self.release.notify_one();
            true
        } else {
            self.interrupt.trigger();
            false
        }
    }

    async fn released(&self) {
        self.release.notified().await;
    }
}

fn print_layout(cluster: &RouteReflectorCluster) {
    println!();
    for group in cluster.redundancy_groups() {
        println!(
            "Redundancy group {} (cluster id {})",
            group.index(),
            group.cluster_id()
        );
        for route_reflector in group.members() {
            println!("   {:<10} {}", route_reflector.name(), route_reflector.ip());
        }
    }
}

fn cluster_ids_command(groups: usize) -> Result<()> {
    for index in 0..groups {
        let id = cluster_id(index)?;
        println!("{index}\t{id}");
    }
    Ok(())
}
