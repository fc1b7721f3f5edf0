//! Bulk download sessions.
//!
//! Each bulk download runs under a [`SessionController`]. Every task of the
//! run holds the same controller and checks it before starting; the teardown
//! path flips it exactly once. Starting a new bulk download retires the
//! previous controller, so at most one session is live.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

/// Cancellation flag for one bulk download invocation. Never reused.
#[derive(Debug)]
pub struct SessionController {
    id: u64,
    cancelled: AtomicBool,
}

impl SessionController {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop scheduling further fetches in this session.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            debug!(session = self.id, "Session cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Tracks the single live session.
#[derive(Debug, Default)]
pub struct Sessions {
    next_id: AtomicU64,
    active: Mutex<Option<Arc<SessionController>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire the live session, if any, and start a new one.
    pub async fn begin(&self) -> Arc<SessionController> {
        let controller = Arc::new(SessionController::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
        ));

        let mut active = self.active.lock().await;
        if let Some(previous) = active.replace(controller.clone()) {
            info!(session = previous.id(), "Retiring previous download session");
            previous.cancel();
        }
        controller
    }

    /// Cancel the live session. Returns whether one was live.
    pub async fn cancel(&self) -> bool {
        match self.active.lock().await.take() {
            Some(controller) => {
                info!(session = controller.id(), "Cancelling download session");
                controller.cancel();
                true
            }
            None => false,
        }
    }

    /// The live session, if any.
    pub async fn active(&self) -> Option<Arc<SessionController>> {
        self.active.lock().await.clone()
    }
}
