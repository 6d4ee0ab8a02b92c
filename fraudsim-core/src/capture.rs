//! Field capture pipeline.
//!
//! Captures are classified, stamped and pushed onto a bounded queue drained by
//! a single worker task, which writes them through
//! [`SessionManager::record_capture`]. Callers never see a write error: the
//! worker keeps failed fields in the fallback cache and logs them.
//!
//! The worker also owns replay of the fallback cache. Whatever is pending is
//! retried before each write (so older values never land after newer ones)
//! and on a fixed interval while the queue is idle.

use crate::session::{RiskInputs, SessionHandle, SessionManager};
use crate::types::{timestamp_now, CapturedField, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Field names containing any of these (ignoring case and separators) are
/// flagged sensitive.
const SENSITIVE_TOPICS: &[&str] = &[
    "password",
    "card number",
    "cvv",
    "ssn",
    "pin",
    "bank account",
    "routing number",
    "passport",
];

/// Lowercase and drop `_`, `-` and spaces.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether a field name falls under one of the sensitive topics.
pub fn is_sensitive_field(field_name: &str) -> bool {
    let name = normalize(field_name);
    SENSITIVE_TOPICS
        .iter()
        .any(|topic| name.contains(&normalize(topic)))
}

/// One entry of a batch capture.
#[derive(Debug, Clone)]
pub struct FieldCapture {
    pub field_name: String,
    pub value: String,
    pub step: u32,
    /// Overrides the name-based sensitivity check
    pub sensitive: Option<bool>,
}

enum Job {
    Write(CapturedField),
    Batch(Vec<CapturedField>),
    Complete(SessionHandle, RiskInputs, oneshot::Sender<Option<Session>>),
    Flush(oneshot::Sender<()>),
}

/// Queue-backed capture front end.
pub struct CapturePipeline {
    tx: mpsc::Sender<Job>,
    manager: Arc<SessionManager>,
    worker: JoinHandle<()>,
}

impl CapturePipeline {
    /// Start the pipeline. Must be called from within a tokio runtime.
    pub fn new(manager: Arc<SessionManager>, queue_size: usize) -> Self {
        let replay_every = manager.replay_interval();
        Self::with_replay_interval(manager, queue_size, replay_every)
    }

    pub fn with_replay_interval(
        manager: Arc<SessionManager>,
        queue_size: usize,
        replay_every: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let worker = tokio::spawn(run_worker(manager.clone(), rx, replay_every));
        Self {
            tx,
            manager,
            worker,
        }
    }

    /// Capture one field value.
    ///
    /// Waits for queue capacity, then returns without waiting for the write.
    pub async fn capture(
        &self,
        handle: &SessionHandle,
        field_name: &str,
        value: &str,
        step: u32,
        sensitive: Option<bool>,
    ) {
        let field = build_field(handle, field_name, value, step, sensitive);
        self.enqueue(Job::Write(field)).await;
    }

    /// Capture several fields. Each is written independently.
    pub async fn capture_batch(&self, handle: &SessionHandle, fields: &[FieldCapture]) {
        if fields.is_empty() {
            return;
        }
        let batch = fields
            .iter()
            .map(|f| build_field(handle, &f.field_name, &f.value, f.step, f.sensitive))
            .collect();
        self.enqueue(Job::Batch(batch)).await;
    }

    /// Complete the session once every capture enqueued before this call has
    /// been written, so the risk score covers them.
    pub async fn complete(&self, handle: &SessionHandle, inputs: RiskInputs) -> Option<Session> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job::Complete(handle.clone(), inputs, reply_tx);
        if self.tx.send(job).await.is_err() {
            tracing::warn!(session_id = %handle.session_id, "Capture worker stopped, completing directly");
            return self.manager.complete(handle, inputs);
        }
        match reply_rx.await {
            Ok(session) => session,
            Err(_) => self.manager.complete(handle, inputs),
        }
    }

    /// Wait until every capture enqueued before this call has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Drain the queue and stop the worker.
    pub async fn shutdown(self) {
        let Self { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            tracing::warn!(error = %e, "Capture worker ended abnormally");
        }
    }

    async fn enqueue(&self, job: Job) {
        if self.tx.capacity() == 0 {
            tracing::debug!("Capture queue full, waiting for capacity");
        }
        if let Err(mpsc::error::SendError(job)) = self.tx.send(job).await {
            tracing::warn!("Capture worker stopped, writing to local cache");
            let fields = match job {
                Job::Write(field) => vec![field],
                Job::Batch(fields) => fields,
                Job::Complete(..) | Job::Flush(_) => Vec::new(),
            };
            for field in &fields {
                self.manager.cache().record_field(field, true);
            }
        }
    }
}

fn build_field(
    handle: &SessionHandle,
    field_name: &str,
    value: &str,
    step: u32,
    sensitive: Option<bool>,
) -> CapturedField {
    CapturedField {
        id: uuid::Uuid::new_v4().to_string(),
        session_id: handle.session_id.clone(),
        step,
        field_name: field_name.to_string(),
        field_value: value.to_string(),
        is_sensitive: sensitive.unwrap_or_else(|| is_sensitive_field(field_name)),
        captured_at: timestamp_now(),
    }
}

async fn run_worker(
    manager: Arc<SessionManager>,
    mut rx: mpsc::Receiver<Job>,
    replay_every: Duration,
) {
    let mut replay = tokio::time::interval(replay_every.max(Duration::from_millis(1)));
    replay.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    replay.tick().await;

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => handle_job(&manager, job),
                None => break,
            },
            _ = replay.tick() => {
                manager.replay_if_pending();
            }
        }
    }

    manager.replay_if_pending();
    tracing::debug!("Capture worker stopped");
}

fn handle_job(manager: &SessionManager, job: Job) {
    match job {
        Job::Write(field) => {
            manager.replay_if_pending();
            manager.record_capture(&field);
        }
        Job::Batch(fields) => {
            manager.replay_if_pending();
            let failed = fields
                .iter()
                .filter(|field| !manager.record_capture(field))
                .count();
            if failed > 0 {
                tracing::warn!(
                    failed,
                    total = fields.len(),
                    "Partial batch failure, failed fields kept in local cache"
                );
            }
        }
        Job::Complete(handle, inputs, reply) => {
            manager.replay_if_pending();
            let _ = reply.send(manager.complete(&handle, inputs));
        }
        Job::Flush(done) => {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::fallback::FallbackCache;
    use crate::session::SessionInit;
    use crate::store::SessionStore;
    use crate::types::SessionStatus;
    use crate::test_support::FlakyStore;

    fn setup() -> (Arc<FlakyStore>, Arc<SessionManager>, SessionHandle) {
        let store = Arc::new(FlakyStore::new());
        let manager = Arc::new(SessionManager::new(
            store.clone(),
            Arc::new(FallbackCache::in_memory()),
            TrackingConfig::default(),
        ));
        let session = manager.initialize(None, &SessionInit::default());
        (store, manager, SessionHandle::from(&session))
    }

    #[test]
    fn test_sensitive_field_names() {
        assert!(is_sensitive_field("card_number"));
        assert!(is_sensitive_field("cardNumber"));
        assert!(is_sensitive_field("Card Number"));
        assert!(is_sensitive_field("payment_cvv"));
        assert!(is_sensitive_field("bank-account"));
        assert!(is_sensitive_field("passport_no"));
        assert!(!is_sensitive_field("origin"));
        assert!(!is_sensitive_field("email"));
    }

    #[tokio::test]
    async fn test_capture_is_written_with_sensitivity() {
        let (store, manager, handle) = setup();
        let pipeline = CapturePipeline::new(manager, 8);

        pipeline.capture(&handle, "card_number", "4111", 5, None).await;
        pipeline.capture(&handle, "origin", "BOG", 1, None).await;
        pipeline.capture(&handle, "notes", "hi", 2, Some(true)).await;
        pipeline.flush().await;

        let fields = store.inner().current_fields(&handle.session_id).unwrap();
        assert_eq!(fields.len(), 3);
        let card = fields.iter().find(|f| f.field_name == "card_number").unwrap();
        assert!(card.is_sensitive);
        let origin = fields.iter().find(|f| f.field_name == "origin").unwrap();
        assert!(!origin.is_sensitive);
        let notes = fields.iter().find(|f| f.field_name == "notes").unwrap();
        assert!(notes.is_sensitive);

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_same_field_last_write_wins() {
        let (store, manager, handle) = setup();
        let pipeline = Arc::new(CapturePipeline::new(manager.clone(), 4));

        let a = {
            let pipeline = pipeline.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                pipeline.capture(&handle, "email", "a@example.com", 3, None).await;
            })
        };
        let b = {
            let pipeline = pipeline.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                pipeline.capture(&handle, "email", "b@example.com", 3, None).await;
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        pipeline.flush().await;

        let stored = store.inner().current_fields(&handle.session_id).unwrap();
        assert_eq!(stored.len(), 1);
        let value = &stored[0].field_value;
        assert!(value == "a@example.com" || value == "b@example.com");
        // The cache saw the writes in the same order as the store
        let cached = manager.cache().field(&handle.session_id, "email").unwrap();
        assert_eq!(&cached.field_value, value);
    }

    #[tokio::test]
    async fn test_capture_during_outage_recoverable_from_cache() {
        let (store, manager, handle) = setup();
        let pipeline = CapturePipeline::new(manager.clone(), 8);

        store.set_offline(true);
        pipeline.capture(&handle, "origin", "BOG", 1, Some(false)).await;
        pipeline.flush().await;

        let cached = manager.cache().field(&handle.session_id, "origin").unwrap();
        assert_eq!(cached.field_name, "origin");
        assert_eq!(cached.field_value, "BOG");
        assert_eq!(cached.step, 1);
        assert_eq!(manager.cache().pending_fields().len(), 1);

        store.set_offline(false);
        manager.sync_pending();
        let stored = store.inner().current_fields(&handle.session_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].field_value, "BOG");
    }

    #[tokio::test]
    async fn test_batch_writes_each_field() {
        let (store, manager, handle) = setup();
        let pipeline = CapturePipeline::new(manager, 2);

        let batch: Vec<FieldCapture> = ["first_name", "last_name", "email", "phone"]
            .iter()
            .map(|name| FieldCapture {
                field_name: name.to_string(),
                value: "x".to_string(),
                step: 3,
                sensitive: None,
            })
            .collect();
        pipeline.capture_batch(&handle, &batch).await;
        pipeline.flush().await;

        assert_eq!(
            store.inner().current_fields(&handle.session_id).unwrap().len(),
            4
        );
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_complete_counts_captures_still_queued() {
        let (store, manager, handle) = setup();
        let pipeline = CapturePipeline::new(manager, 8);

        pipeline.capture(&handle, "email", "ada@example.com", 3, None).await;
        pipeline.capture(&handle, "card_number", "4111", 5, None).await;
        let completed = pipeline
            .complete(&handle, RiskInputs::default())
            .await
            .unwrap();

        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(completed.risk_score, Some(75));
        let stored = store.inner().get_session(&handle.session_id).unwrap().unwrap();
        assert_eq!(stored.risk_score, Some(75));
        assert_eq!(
            store.inner().current_fields(&handle.session_id).unwrap().len(),
            2
        );

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_next_write_after_outage_replays_cache() {
        let (store, manager, handle) = setup();
        let pipeline = CapturePipeline::new(manager.clone(), 8);

        store.set_offline(true);
        pipeline.capture(&handle, "email", "old@example.com", 3, None).await;
        manager.advance(&handle, 3, 6);
        pipeline.flush().await;
        assert_eq!(manager.cache().pending_count(), 2);

        store.set_offline(false);
        pipeline.capture(&handle, "email", "new@example.com", 3, None).await;
        pipeline.capture(&handle, "origin", "BOG", 1, None).await;
        pipeline.flush().await;

        assert_eq!(manager.cache().pending_count(), 0);
        let stored = store.inner().get_session(&handle.session_id).unwrap().unwrap();
        assert_eq!(stored.current_step, 3);
        let fields = store.inner().current_fields(&handle.session_id).unwrap();
        assert_eq!(fields.len(), 2);
        let email = fields.iter().find(|f| f.field_name == "email").unwrap();
        assert_eq!(email.field_value, "new@example.com");

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_worker_replays_on_interval() {
        let (store, manager, handle) = setup();
        let pipeline =
            CapturePipeline::with_replay_interval(manager.clone(), 8, Duration::from_millis(10));

        store.set_offline(true);
        pipeline.capture(&handle, "origin", "BOG", 1, None).await;
        pipeline.flush().await;
        store.set_offline(false);

        for _ in 0..100 {
            if manager.cache().pending_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.cache().pending_count(), 0);
        assert_eq!(
            store.inner().current_fields(&handle.session_id).unwrap().len(),
            1
        );

        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_capture_for_unknown_session_is_not_retried() {
        let (_store, manager, _) = setup();
        let pipeline = CapturePipeline::new(manager.clone(), 8);
        let ghost = SessionHandle {
            session_id: "ghost".to_string(),
            token: "ghost".to_string(),
        };

        pipeline.capture(&ghost, "email", "a@example.com", 3, None).await;
        pipeline.flush().await;

        assert_eq!(manager.cache().pending_count(), 0);
        for _ in 0..3 {
            assert_eq!(manager.sync_pending().still_pending, 0);
        }
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_created_offline_is_replayed_before_its_fields() {
        let store = Arc::new(FlakyStore::new());
        let manager = Arc::new(SessionManager::new(
            store.clone(),
            Arc::new(FallbackCache::in_memory()),
            TrackingConfig::default(),
        ));
        store.set_offline(true);
        let session = manager.initialize(None, &SessionInit::default());
        let handle = SessionHandle::from(&session);
        store.set_offline(false);

        let pipeline = CapturePipeline::new(manager.clone(), 8);
        pipeline.capture(&handle, "origin", "BOG", 1, None).await;
        pipeline.flush().await;

        assert!(store.inner().get_session(&session.id).unwrap().is_some());
        assert_eq!(store.inner().current_fields(&session.id).unwrap().len(), 1);
        assert_eq!(manager.cache().pending_count(), 0);
        pipeline.shutdown().await;
    }
}
