//! Shutdown coordination
//!
//! An accepted `DELETE /shutdown` flips the process into draining, which is
//! never undone. The listener is closed after a grace delay so the shutdown
//! response itself can still be written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Credential did not match; nothing changed
    Rejected,
    /// This request started draining
    Started,
    /// Draining had already started
    AlreadyDraining,
}

pub struct ShutdownCoordinator {
    token: String,
    grace: Duration,
    draining: AtomicBool,
    /// Cancelled once the grace delay has elapsed
    terminate: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: String, grace: Duration) -> Self {
        Self {
            token,
            grace,
            draining: AtomicBool::new(false),
            terminate: CancellationToken::new(),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Check `presented` against the secret and enter draining if it matches
    ///
    /// Only the first matching call returns [`ShutdownOutcome::Started`].
    pub fn begin(&self, presented: Option<&str>) -> ShutdownOutcome {
        if presented != Some(self.token.as_str()) {
            warn!("Rejected shutdown request with invalid token");
            return ShutdownOutcome::Rejected;
        }

        match self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!(grace_ms = self.grace.as_millis() as u64, "Shutdown requested, draining");
                ShutdownOutcome::Started
            }
            Err(_) => ShutdownOutcome::AlreadyDraining,
        }
    }

    /// Cancel the termination token once the grace delay has passed
    ///
    /// Does not block the caller.
    pub fn schedule_termination(&self) {
        let terminate = self.terminate.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            info!("Grace period elapsed, closing listener");
            terminate.cancel();
        });
    }

    /// Token cancelled when the server should stop accepting connections
    pub fn termination_token(&self) -> CancellationToken {
        self.terminate.clone()
    }
}
