//! Single-flight coordination of access token refreshes.
//!
//! The first request that hits a 401 while no refresh is running becomes the
//! leader of a refresh episode and receives a [`RefreshLease`]. Every request
//! that hits a 401 while the episode is open is parked as a continuation. When
//! the leader settles the lease, the continuations run in the order they were
//! queued, each exactly once, with the new token or `None` on failure.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::auth::AccessToken;

/// Callback invoked once when the refresh episode it waits on settles.
type Continuation = Box<dyn FnOnce(Option<AccessToken>) + Send + 'static>;

#[derive(Default)]
struct EpisodeState {
    refreshing: bool,
    waiters: VecDeque<Continuation>,
    episodes: u64,
}

/// Process-wide refresh latch plus the queue of requests waiting on it.
/// Clone is cheap and clones share state.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<EpisodeState>>,
}

/// Outcome of reporting a 401 to the coordinator.
pub enum RefreshTicket {
    /// No refresh was running: the caller must perform it and settle the lease.
    Lead(RefreshLease),
    /// A refresh is already running: await the receiver for its outcome.
    Wait(oneshot::Receiver<Option<AccessToken>>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EpisodeState> {
        // A panic inside a continuation cannot leave the state half-updated:
        // the queue is taken out before any continuation runs.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Either open a new episode (caller leads) or join the running one.
    pub fn begin(&self) -> RefreshTicket {
        let (tx, rx) = oneshot::channel();
        let continuation: Continuation = Box::new(move |token| {
            let _ = tx.send(token);
        });
        match self.lead_or_park(continuation) {
            Some(lease) => RefreshTicket::Lead(lease),
            None => RefreshTicket::Wait(rx),
        }
    }

    /// Open a new episode when idle, otherwise queue `continuation` behind the
    /// running one. The continuation is discarded when the caller leads.
    fn lead_or_park(&self, continuation: Continuation) -> Option<RefreshLease> {
        let mut state = self.lock();
        if state.refreshing {
            state.waiters.push_back(continuation);
            debug!(waiting = state.waiters.len(), "Joined in-flight token refresh");
            return None;
        }
        state.refreshing = true;
        state.episodes += 1;
        debug!(episode = state.episodes, "Starting token refresh episode");
        Some(RefreshLease {
            coordinator: self.clone(),
            settled: false,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    /// Number of continuations parked on the running episode.
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of refresh episodes started since creation.
    pub fn episodes(&self) -> u64 {
        self.lock().episodes
    }

    fn settle(&self, outcome: Option<AccessToken>) {
        let waiters = {
            let mut state = self.lock();
            state.refreshing = false;
            std::mem::take(&mut state.waiters)
        };
        debug!(
            waiters = waiters.len(),
            success = outcome.is_some(),
            "Token refresh episode settled"
        );
        for continuation in waiters {
            continuation(outcome.clone());
        }
    }
}

/// Proof of leadership over one refresh episode.
///
/// Dropping an unsettled lease settles the episode as failed so that parked
/// requests are released.
pub struct RefreshLease {
    coordinator: RefreshCoordinator,
    settled: bool,
}

impl RefreshLease {
    /// Close the episode and run every parked continuation in FIFO order.
    pub fn settle(mut self, outcome: Option<AccessToken>) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh abandoned before completion, failing waiters");
            self.coordinator.settle(None);
        }
    }
}
