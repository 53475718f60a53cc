//! Coalescing of bursty updates into one delivery per window
//!
//! The first `schedule()` after an idle period arms a timer; everything
//! scheduled before it fires is merged into the same pending batch and
//! delivered once. `flush()` delivers immediately (teardown must call it so a
//! final update is not lost) and `cancel()` drops whatever is pending.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Receives each coalesced batch
pub type BatchSink<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Pending<T> {
    batch: Option<T>,
    timer: Option<JoinHandle<()>>,
}

/// Timer-owning batcher (see module docs)
pub struct Coalescer<T> {
    name: &'static str,
    window: Duration,
    pending: Arc<Mutex<Pending<T>>>,
    sink: BatchSink<T>,
}

impl<T: Default + Send + 'static> Coalescer<T> {
    pub fn new(name: &'static str, window: Duration, sink: BatchSink<T>) -> Self {
        Self {
            name,
            window,
            pending: Arc::new(Mutex::new(Pending {
                batch: None,
                timer: None,
            })),
            sink,
        }
    }

    /// Merge an update into the pending batch, arming the timer if idle
    ///
    /// Outside a tokio runtime the batch is delivered synchronously.
    pub fn schedule(&self, update: impl FnOnce(&mut T)) {
        let mut pending = self.pending.lock();
        update(pending.batch.get_or_insert_with(T::default));

        if pending.timer.is_some() {
            return;
        }
        if self.window.is_zero() || tokio::runtime::Handle::try_current().is_err() {
            let batch = pending.batch.take();
            drop(pending);
            if let Some(batch) = batch {
                (self.sink)(batch);
            }
            return;
        }

        let shared = Arc::clone(&self.pending);
        let sink = Arc::clone(&self.sink);
        let window = self.window;
        let name = self.name;
        pending.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let batch = {
                let mut pending = shared.lock();
                pending.timer = None;
                pending.batch.take()
            };
            if let Some(batch) = batch {
                trace!(coalescer = name, "Delivering coalesced batch");
                sink(batch);
            }
        }));
    }

    /// Deliver the pending batch now
    pub fn flush(&self) {
        let batch = {
            let mut pending = self.pending.lock();
            if let Some(timer) = pending.timer.take() {
                timer.abort();
            }
            pending.batch.take()
        };
        if let Some(batch) = batch {
            trace!(coalescer = self.name, "Flushing coalesced batch");
            (self.sink)(batch);
        }
    }

    /// Drop the pending batch without delivering it
    pub fn cancel(&self) {
        let mut pending = self.pending.lock();
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }
        pending.batch = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().batch.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn collector() -> (Arc<Mutex<Vec<BTreeMap<String, i32>>>>, BatchSink<BTreeMap<String, i32>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: BatchSink<BTreeMap<String, i32>> = Arc::new(move |batch| {
            sink_seen.lock().push(batch);
        });
        (seen, sink)
    }

    #[tokio::test]
    async fn test_burst_is_delivered_once() {
        let (seen, sink) = collector();
        let coalescer = Coalescer::new("test", Duration::from_millis(30), sink);

        for i in 0..10 {
            coalescer.schedule(|b| {
                b.insert("a".to_string(), i);
            });
        }
        coalescer.schedule(|b| {
            b.insert("b".to_string(), 1);
        });
        assert!(seen.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get("a"), Some(&9));
        assert_eq!(seen[0].get("b"), Some(&1));
    }

    #[tokio::test]
    async fn test_flush_and_cancel() {
        let (seen, sink) = collector();
        let coalescer = Coalescer::new("test", Duration::from_secs(60), sink);

        coalescer.schedule(|b| {
            b.insert("a".to_string(), 1);
        });
        coalescer.flush();
        assert_eq!(seen.lock().len(), 1);
        assert!(!coalescer.has_pending());

        coalescer.schedule(|b| {
            b.insert("a".to_string(), 2);
        });
        coalescer.cancel();
        coalescer.flush();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_without_runtime_delivers_inline() {
        let (seen, sink) = collector();
        let coalescer = Coalescer::new("test", Duration::from_millis(50), sink);
        coalescer.schedule(|b| {
            b.insert("a".to_string(), 1);
        });
        assert_eq!(seen.lock().len(), 1);
    }
}
