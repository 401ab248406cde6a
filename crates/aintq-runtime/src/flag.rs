use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Shared {
    raised: AtomicBool,
    notify: Notify,
}

/// A one-shot async flag used for cooperative shutdown.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<Shared>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            raised: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn raise(&self) {
        self.0.raised.store(true, Ordering::Release);
        self.0.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.0.raised.load(Ordering::Acquire)
    }

    /// Wait until the flag is raised.
    ///
    /// Returns immediately if it already is.
    pub async fn wait(&self) {
        while !self.is_raised() {
            // The Notified must be created before the flag is re-checked, or
            // a raise() between the check and the await would be missed.
            let notified = self.0.notify.notified();

            if self.is_raised() {
                break;
            }

            notified.await;
        }
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}
