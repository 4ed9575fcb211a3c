//! Common test utilities
//!
//! Provides rustls crypto provider setup for Pact tests and in-memory
//! hosts/registries for cluster lifecycle tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use route_reflector_harness::{
    HarnessError, Host, HostOptions, HostProvisioner, Result, RouteReflectorEntry,
    RouteReflectorRegistry,
};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        rustls::crypto::ring::default_provider()
            .install_default()
            .expect("Failed to install rustls crypto provider");
    });
}

/// Start an etcd stand-in that reads one request and never answers
///
/// Returns its base URL.
pub async fn silent_etcd() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind silent etcd");
    let addr = listener.local_addr().expect("Failed to read local address");
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(stream);
        }
    });
    format!("http://{addr}")
}

/// What a fake host does when cleaned up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupBehaviour {
    Succeed,
    Fail,
    Cancel,
}

/// Shared record of everything the fakes were asked to do
#[derive(Debug, Default)]
pub struct Journal {
    /// Host names in provisioning order
    pub provisioned: Vec<String>,
    /// `(host, command)` in execution order
    pub executed: Vec<(String, String)>,
    /// Host names in cleanup-attempt order
    pub cleanup_attempts: Vec<String>,
    /// Host names whose cleanup succeeded
    pub cleaned: Vec<String>,
}

pub type SharedJournal = Arc<Mutex<Journal>>;

#[derive(Debug)]
pub struct FakeHost {
    name: String,
    ip: IpAddr,
    cleanup: CleanupBehaviour,
    journal: SharedJournal,
}

#[async_trait]
impl Host for FakeHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn ip(&self) -> IpAddr {
        self.ip
    }

    async fn execute(&self, command: &str) -> Result<String> {
        self.journal
            .lock()
            .unwrap()
            .executed
            .push((self.name.clone(), command.to_string()));
        Ok(String::new())
    }

    async fn cleanup(&self) -> Result<()> {
        let mut journal = self.journal.lock().unwrap();
        journal.cleanup_attempts.push(self.name.clone());
        match self.cleanup {
            CleanupBehaviour::Succeed => {
                journal.cleaned.push(self.name.clone());
                Ok(())
            }
            CleanupBehaviour::Fail => Err(HarnessError::CommandFailed {
                command: format!("docker rm -f {}", self.name),
                status: "exit status: 1".to_string(),
                stderr: "daemon unreachable".to_string(),
            }),
            CleanupBehaviour::Cancel => Err(HarnessError::Cancelled),
        }
    }
}

/// Hands out [`FakeHost`]s with addresses 10.0.0.1, 10.0.0.2, ...
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    next_host: AtomicU32,
    cleanup: HashMap<String, CleanupBehaviour>,
    pub journal: SharedJournal,
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the host named `name` behave as `behaviour` on cleanup
    pub fn with_cleanup(mut self, name: &str, behaviour: CleanupBehaviour) -> Self {
        self.cleanup.insert(name.to_string(), behaviour);
        self
    }
}

#[async_trait]
impl HostProvisioner for FakeProvisioner {
    async fn provision(&self, name: &str, options: HostOptions) -> Result<Box<dyn Host>> {
        assert!(!options.start_calico, "route reflector hosts never run calico");
        let n = self.next_host.fetch_add(1, Ordering::SeqCst) + 1;
        self.journal
            .lock()
            .unwrap()
            .provisioned
            .push(name.to_string());
        Ok(Box::new(FakeHost {
            name: name.to_string(),
            ip: IpAddr::V4(Ipv4Addr::from(0x0A00_0000 + n)),
            cleanup: self
                .cleanup
                .get(name)
                .copied()
                .unwrap_or(CleanupBehaviour::Succeed),
            journal: Arc::clone(&self.journal),
        }))
    }
}

/// Records registrations; optionally rejects the n-th one (1-based)
#[derive(Debug, Default)]
pub struct FakeRegistry {
    pub entries: Mutex<Vec<RouteReflectorEntry>>,
    reject_at: Option<usize>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_at(n: usize) -> Self {
        Self {
            entries: Mutex::default(),
            reject_at: Some(n),
        }
    }
}

#[async_trait]
impl RouteReflectorRegistry for FakeRegistry {
    async fn register(&self, entry: &RouteReflectorEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        if self.reject_at == Some(entries.len() + 1) {
            return Err(HarnessError::Registration {
                status: 500,
                body: "etcd cluster is unavailable".to_string(),
            });
        }
        entries.push(entry.clone());
        Ok(())
    }
}
