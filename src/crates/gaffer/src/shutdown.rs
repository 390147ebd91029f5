//! Two-stage interrupt handling.
//!
//! The first interrupt sets a flag the driver checks between cycles and
//! between node dispatches; in-flight subprocesses run to completion (or
//! their own timeout) before the check fires. A second interrupt forces
//! immediate exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Cooperative shutdown flag, cloned into everything that blocks
#[derive(Clone)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl std::fmt::Debug for ShutdownFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownFlag")
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request graceful shutdown; returns whether it was already requested
    pub fn request(&self) -> bool {
        self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Install the interrupt handler: first signal requests graceful
    /// shutdown, a second one exits the process immediately.
    pub fn install_signal_handler(&self) -> tokio::task::JoinHandle<()> {
        let flag = self.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    warn!("interrupt handler unavailable; graceful shutdown disabled");
                    return;
                }
                if flag.request() {
                    warn!("forced shutdown (second interrupt)");
                    std::process::exit(1);
                }
                info!("interrupt received; shutting down after the current operation");
            }
        })
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}
