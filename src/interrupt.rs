//! # Interrupt Handling
//!
//! Turns a user interrupt (SIGINT / Ctrl-C) into an observable flag that
//! long-running docker commands race against. Commands that lose the race
//! fail with [`HarnessError::Cancelled`](crate::HarnessError::Cancelled).

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Receiving side of an interrupt signal
///
/// Cheap to clone; every clone observes the same trigger.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

/// Test and embedding hook that fires an [`Interrupt`] by hand
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Interrupt {
    /// An interrupt that never fires
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// An interrupt fired manually through the returned handle
    #[must_use]
    pub fn manual() -> (InterruptHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (InterruptHandle { tx: Arc::new(tx) }, Self { rx })
    }

    /// An interrupt fired by SIGINT/Ctrl-C
    ///
    /// Must be called from within a tokio runtime. Once installed, Ctrl-C no
    /// longer terminates the process directly; it cancels the in-flight
    /// command instead so teardown can report it.
    #[must_use]
    pub fn on_ctrl_c() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt (SIGINT), cancelling in-flight harness commands...");
                tx.send_replace(true);
            }
        });
        Self { rx }
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the interrupt fires; pends forever if it never can
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without firing
                std::future::pending::<()>().await;
            }
        }
    }
}
