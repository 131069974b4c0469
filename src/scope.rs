//! Per-instance signals a worker raises towards its host.

use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;
use uuid::Uuid;

/// The global scope of one worker instance.
///
/// A worker cannot change its own lifecycle state. It can only ask the host
/// to skip the waiting phase or to take control of open clients; the host
/// reads these requests after each event it dispatches.
#[derive(Debug)]
pub struct WorkerScope {
    id: Uuid,
    origin: Url,
    skip_waiting: AtomicBool,
    claim: AtomicBool,
}

impl WorkerScope {
    /// Creates the scope for a fresh worker instance serving `origin`.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            skip_waiting: AtomicBool::new(false),
            claim: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    /// Asks the host to activate this worker without waiting for the current
    /// one's clients to close.
    pub fn skip_waiting(&self) {
        log::debug!("Worker {} requested skip-waiting", self.id);
        self.skip_waiting.store(true, Ordering::Release);
    }

    /// Returns true once [`skip_waiting`](Self::skip_waiting) was called.
    #[must_use]
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Asks the host to make this worker the controller of every open client.
    pub fn claim_clients(&self) {
        log::debug!("Worker {} requested clients claim", self.id);
        self.claim.store(true, Ordering::Release);
    }

    /// Consumes a pending claim request.
    pub(crate) fn take_claim(&self) -> bool {
        self.claim.swap(false, Ordering::AcqRel)
    }
}
