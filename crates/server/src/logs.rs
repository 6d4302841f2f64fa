//! Per-job fan-out of log entries to live viewers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use vidslim_db::repo::job_logs::JobLogRow;

/// Entries buffered per subscriber before new ones are dropped for it.
pub const SUBSCRIBER_QUEUE: usize = 256;

type Registry = HashMap<String, Vec<(u64, mpsc::Sender<JobLogRow>)>>;

#[derive(Clone, Default)]
pub struct LogBroadcaster {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscribers: Registry,
}

/// A live feed for one job. Dropping it unsubscribes.
pub struct Subscription {
    pub id: u64,
    pub job_id: String,
    rx: mpsc::Receiver<JobLogRow>,
    broadcaster: LogBroadcaster,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<JobLogRow> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.job_id, self.id);
    }
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .subscribers
            .entry(job_id.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            id,
            job_id: job_id.to_string(),
            rx,
            broadcaster: self.clone(),
        }
    }

    pub fn unsubscribe(&self, job_id: &str, id: u64) {
        let mut inner = self.lock();
        if let Some(subs) = inner.subscribers.get_mut(job_id) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                inner.subscribers.remove(job_id);
            }
        }
    }

    /// Push `entry` to every subscriber of its job without waiting. A full
    /// queue loses this entry; a closed one is pruned.
    pub fn broadcast(&self, entry: &JobLogRow) {
        let mut inner = self.lock();
        let Some(subs) = inner.subscribers.get_mut(&entry.job_id) else {
            return;
        };
        subs.retain(|(id, tx)| match tx.try_send(entry.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(job_id = %entry.job_id, subscriber = id, "log subscriber lagging, entry dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if subs.is_empty() {
            inner.subscribers.remove(&entry.job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.lock().subscribers.get(job_id).map_or(0, Vec::len)
    }
}
