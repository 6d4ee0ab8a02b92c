//! Topic-based change feed over the store's change notifications.
//!
//! Notifications carry no payload worth trusting; subscribers use them as a
//! signal to re-query.

use crate::store::{Collection, SessionStore, StoreChange};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Feed topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// A session row was written
    SessionChanged,
    /// A captured field row was written
    DataCaptured,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SessionChanged => "session-changed",
            Topic::DataCaptured => "data-captured",
        }
    }

    fn matches(&self, collection: Collection) -> bool {
        matches!(
            (self, collection),
            (Topic::SessionChanged, Collection::Sessions)
                | (Topic::DataCaptured, Collection::CapturedFields)
        )
    }
}

/// Delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub topic: Topic,
    /// Row that changed; `None` when standing in for dropped notifications
    pub row_id: Option<i64>,
}

/// Pub/sub front end for store changes.
#[derive(Clone)]
pub struct ChangeFeed {
    store: Arc<dyn SessionStore>,
}

impl ChangeFeed {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Call `handler` for every change on `topic`, in write order, until the
    /// returned [`Subscription`] is unsubscribed or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: FnMut(Notification) + Send + 'static,
    {
        // Subscribe before spawning so nothing written after this call is missed.
        spawn_forwarder(self.store.changes(), topic, handler)
    }
}

fn spawn_forwarder<F>(
    mut rx: broadcast::Receiver<StoreChange>,
    topic: Topic,
    mut handler: F,
) -> Subscription
where
    F: FnMut(Notification) + Send + 'static,
{
    let active = Arc::new(AtomicBool::new(true));
    let task_active = active.clone();

    let task = tokio::spawn(async move {
        loop {
            let notification = match rx.recv().await {
                Ok(change) if topic.matches(change.collection) => Notification {
                    topic,
                    row_id: Some(change.row_id),
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(topic = topic.as_str(), skipped, "Change feed lagged");
                    Notification {
                        topic,
                        row_id: None,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if !task_active.load(Ordering::SeqCst) {
                break;
            }
            handler(notification);
        }
    });

    Subscription {
        active,
        task: Some(task),
    }
}

/// Handle to a live subscription.
pub struct Subscription {
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivery. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
