//! Table change notifications.
//!
//! The poller compares a cheap per-table fingerprint on an interval and
//! emits a notification whenever it moves. Consumers treat every
//! notification as "re-fetch everything", so duplicates and reordering are
//! harmless.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{ChangeNotification, DataStore, Table};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ChangeFeed {
    interval: Duration,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ChangeFeed {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// Start polling `store` for changes to the watched tables.
    pub fn subscribe<S>(&self, store: Arc<S>) -> ChangeSubscription
    where
        S: DataStore + ?Sized + 'static,
    {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            poll_changes(store, interval, sender).await;
        });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "change feed started");
        ChangeSubscription {
            receiver,
            handle: Some(handle),
        }
    }
}

async fn poll_changes<S>(store: Arc<S>, interval: Duration, sender: mpsc::Sender<ChangeNotification>)
where
    S: DataStore + ?Sized,
{
    let mut last: HashMap<Table, String> = HashMap::new();
    for table in Table::WATCHED {
        match store.fingerprint(table).await {
            Ok(fingerprint) => {
                last.insert(table, fingerprint);
            }
            Err(err) => tracing::warn!(%table, error = %err, "initial fingerprint failed"),
        }
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for table in Table::WATCHED {
            let fingerprint = match store.fingerprint(table).await {
                Ok(fingerprint) => fingerprint,
                Err(err) => {
                    tracing::warn!(%table, error = %err, "change poll failed");
                    continue;
                }
            };
            if last.get(&table) == Some(&fingerprint) {
                continue;
            }
            last.insert(table, fingerprint);
            let notification = ChangeNotification {
                table,
                observed_at: Utc::now(),
            };
            if sender.send(notification).await.is_err() {
                tracing::debug!("change feed receiver dropped");
                return;
            }
        }
    }
}

/// A live subscription. Dropping it stops the poller.
#[derive(Debug)]
pub struct ChangeSubscription {
    receiver: mpsc::Receiver<ChangeNotification>,
    handle: Option<JoinHandle<()>>,
}

impl ChangeSubscription {
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.receiver.recv().await
    }

    /// Drain everything already queued; returns how many were pending.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("change feed closed");
        }
        self.receiver.close();
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn notifies_after_a_write() {
        let backend = Arc::new(MemoryBackend::new());
        let mut subscription = ChangeFeed::new(Duration::from_millis(20)).subscribe(backend.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.touch(Table::TaskLogs);

        let notification = tokio::time::timeout(Duration::from_secs(2), subscription.recv())
            .await
            .expect("notification in time")
            .expect("feed open");
        assert_eq!(notification.table, Table::TaskLogs);
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let backend = Arc::new(MemoryBackend::new());
        let mut subscription = ChangeFeed::new(Duration::from_millis(20)).subscribe(backend);
        subscription.close();
        assert!(subscription.is_closed());
        assert!(subscription.recv().await.is_none());
    }
}
