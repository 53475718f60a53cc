//! Throttled instance status reporting

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::batch::Coalescer;
use crate::host::{Host, InstanceStatus};

type StatusUpdate = (InstanceStatus, Option<String>);

/// Forwards status changes to the host at most once per throttle window
///
/// Only the latest status inside a window is delivered, and a status equal to
/// the last delivered one is skipped. After `shutdown()` updates are only
/// logged locally.
pub struct StatusReporter {
    pending: Coalescer<Option<StatusUpdate>>,
    latest: Mutex<Option<StatusUpdate>>,
    destroyed: Arc<AtomicBool>,
}

impl StatusReporter {
    pub fn new(host: Arc<dyn Host>, throttle: Duration) -> Self {
        let destroyed = Arc::new(AtomicBool::new(false));
        let delivered: Arc<Mutex<Option<StatusUpdate>>> = Arc::new(Mutex::new(None));

        let sink_destroyed = Arc::clone(&destroyed);
        let pending = Coalescer::new(
            "status",
            throttle,
            Arc::new(move |update: Option<StatusUpdate>| {
                let Some((status, message)) = update else {
                    return;
                };
                if sink_destroyed.load(Ordering::SeqCst) {
                    return;
                }
                let mut last = delivered.lock();
                if last.as_ref() == Some(&(status, message.clone())) {
                    return;
                }
                *last = Some((status, message.clone()));
                drop(last);
                host.update_status(status, message);
            }),
        );

        Self {
            pending,
            latest: Mutex::new(None),
            destroyed,
        }
    }

    pub fn report(&self, status: InstanceStatus, message: Option<String>) {
        if self.destroyed.load(Ordering::SeqCst) {
            debug!(%status, ?message, "Status update after destroy suppressed");
            return;
        }
        *self.latest.lock() = Some((status, message.clone()));
        self.pending.schedule(|slot| *slot = Some((status, message)));
    }

    /// Most recently reported status (delivered or still pending)
    pub fn current(&self) -> Option<InstanceStatus> {
        self.latest.lock().as_ref().map(|(status, _)| *status)
    }

    pub fn flush(&self) {
        self.pending.flush();
    }

    /// Deliver anything pending, then stop forwarding
    pub fn shutdown(&self) {
        self.pending.flush();
        self.destroyed.store(true, Ordering::SeqCst);
    }
}
