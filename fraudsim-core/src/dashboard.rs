//! Continuously refreshed operator view.
//!
//! A fixed-interval poll and change-feed notifications both request a reload.
//! Requests go through a capacity-1 channel read by a single reload task, so
//! a reload in flight absorbs any number of further requests and is followed
//! by exactly one more. Each reload replaces the published snapshot
//! wholesale.

use crate::config::DashboardConfig;
use crate::error::{Error, Result};
use crate::feed::{ChangeFeed, Subscription, Topic};
use crate::query::{self, SessionQueryService};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Opaque "is this actor an operator" capability check.
pub trait OperatorCheck: Send + Sync {
    fn is_operator(&self, actor_ref: &str) -> bool;
}

/// Operator check backed by the configured allow-list and the "admin"
/// identity heuristic.
pub struct AllowListCheck {
    operator_emails: Vec<String>,
}

impl AllowListCheck {
    pub fn new(operator_emails: Vec<String>) -> Self {
        Self { operator_emails }
    }
}

impl OperatorCheck for AllowListCheck {
    fn is_operator(&self, actor_ref: &str) -> bool {
        query::is_operator_identity(Some(actor_ref), None, &self.operator_emails)
    }
}

/// Aggregate counters shown above the session lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub live_sessions: usize,
    pub participant_sessions: usize,
    pub operator_sessions: usize,
    pub recently_active: usize,
    pub open_alerts: usize,
    pub sensitive_captures: i64,
}

/// One complete dashboard state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSnapshot {
    pub participants: Vec<SessionView>,
    pub operators: Vec<SessionView>,
    pub alerts: Vec<Alert>,
    pub recent_activity: Vec<AdminActivity>,
    pub stats: DashboardStats,
    /// `None` until the first reload completes
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Incremented on every reload
    pub reload_seq: u64,
}

pub struct AdminDashboardController {
    query: Arc<SessionQueryService>,
    feed: ChangeFeed,
    config: DashboardConfig,
}

impl AdminDashboardController {
    pub fn new(
        query: Arc<SessionQueryService>,
        feed: ChangeFeed,
        config: DashboardConfig,
    ) -> Self {
        Self {
            query,
            feed,
            config,
        }
    }

    /// Build a snapshot right now, outside the refresh loop.
    pub fn load(&self) -> DashboardSnapshot {
        build_snapshot(&self.query, &self.config, 0)
    }

    /// Start the refresh loop for `actor_ref`.
    ///
    /// Fails with [`Error::Unauthorized`] unless `check` accepts the actor.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, actor_ref: &str, check: &dyn OperatorCheck) -> Result<DashboardHandle> {
        if !check.is_operator(actor_ref) {
            return Err(Error::Unauthorized(actor_ref.to_string()));
        }

        let query = self.query.clone();
        let config = self.config.clone();
        let (trigger, snapshots, reload_task) =
            spawn_reload_loop(move |seq| build_snapshot(&query, &config, seq));

        let poll_trigger = trigger.clone();
        let poll_interval = self.config.poll_interval();
        let poll_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                request_reload(&poll_trigger);
            }
        });

        let subscriptions = [Topic::SessionChanged, Topic::DataCaptured]
            .into_iter()
            .map(|topic| {
                let trigger = trigger.clone();
                self.feed.subscribe(topic, move |_| request_reload(&trigger))
            })
            .collect();

        tracing::info!(actor = %actor_ref, "Dashboard started");
        Ok(DashboardHandle {
            trigger,
            snapshots,
            tasks: vec![reload_task, poll_task],
            _subscriptions: subscriptions,
        })
    }
}

/// Running dashboard. Dropping it stops the poll, the feed subscriptions and
/// the reload task.
pub struct DashboardHandle {
    trigger: mpsc::Sender<()>,
    snapshots: watch::Receiver<DashboardSnapshot>,
    tasks: Vec<JoinHandle<()>>,
    _subscriptions: Vec<Subscription>,
}

impl DashboardHandle {
    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> DashboardSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn request_reload(&self) {
        request_reload(&self.trigger);
    }

    pub fn stop(self) {}
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn request_reload(trigger: &mpsc::Sender<()>) {
    match trigger.try_send(()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(())) => {
            tracing::trace!("Reload already pending");
        }
        Err(mpsc::error::TrySendError::Closed(())) => {}
    }
}

fn spawn_reload_loop<F>(
    load: F,
) -> (
    mpsc::Sender<()>,
    watch::Receiver<DashboardSnapshot>,
    JoinHandle<()>,
)
where
    F: Fn(u64) -> DashboardSnapshot + Send + Sync + 'static,
{
    let (trigger_tx, mut trigger_rx) = mpsc::channel::<()>(1);
    let (snapshot_tx, snapshot_rx) = watch::channel(DashboardSnapshot::default());
    let load = Arc::new(load);

    let task = tokio::spawn(async move {
        let mut seq = 0u64;
        while trigger_rx.recv().await.is_some() {
            seq += 1;
            let load = load.clone();
            match tokio::task::spawn_blocking(move || load(seq)).await {
                Ok(snapshot) => {
                    snapshot_tx.send_replace(snapshot);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Dashboard reload failed");
                }
            }
        }
    });

    (trigger_tx, snapshot_rx, task)
}

fn build_snapshot(
    query: &SessionQueryService,
    config: &DashboardConfig,
    reload_seq: u64,
) -> DashboardSnapshot {
    let live = query.list_active(usize::MAX);
    let alerts = query.list_active_alerts();

    let stats = DashboardStats {
        live_sessions: live.len(),
        participant_sessions: live
            .iter()
            .filter(|v| v.role == SessionRole::Participant)
            .count(),
        operator_sessions: live
            .iter()
            .filter(|v| v.role == SessionRole::Operator)
            .count(),
        recently_active: live.iter().filter(|v| v.recently_active).count(),
        open_alerts: alerts.len(),
        sensitive_captures: live.iter().map(|v| v.sensitive_count).sum(),
    };

    let (mut operators, mut participants): (Vec<SessionView>, Vec<SessionView>) = live
        .into_iter()
        .partition(|v| v.role == SessionRole::Operator);
    participants.truncate(config.session_limit);
    operators.truncate(config.session_limit);

    DashboardSnapshot {
        participants,
        operators,
        alerts,
        recent_activity: query.list_recent_activity(config.activity_limit),
        stats,
        refreshed_at: Some(timestamp_now()),
        reload_seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::db::Database;
    use crate::store::SessionStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn session(id: &str, email: Option<&str>) -> Session {
        let now = timestamp_now();
        Session {
            id: id.to_string(),
            token: format!("tok-{}", id),
            participant_ref: None,
            participant_email: email.map(String::from),
            participant_name: None,
            role: SessionRole::Participant,
            started_at: now,
            last_activity_at: now,
            current_step: 1,
            total_steps: 6,
            status: SessionStatus::Active,
            entry_point: "/".to_string(),
            device_info: DeviceInfo::default(),
            risk_score: None,
            completed_at: None,
        }
    }

    fn controller(db: Arc<Database>, poll_interval_secs: u64) -> AdminDashboardController {
        let query = Arc::new(SessionQueryService::new(
            db.clone(),
            TrackingConfig::default(),
        ));
        let config = DashboardConfig {
            poll_interval_secs,
            ..Default::default()
        };
        AdminDashboardController::new(query, ChangeFeed::new(db), config)
    }

    fn db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    #[test]
    fn test_allow_list_check() {
        let check = AllowListCheck::new(vec!["ops@example.com".to_string()]);
        assert!(check.is_operator("ops@example.com"));
        assert!(check.is_operator("admin@example.com"));
        assert!(!check.is_operator("ada@example.com"));
    }

    #[tokio::test]
    async fn test_start_requires_operator() {
        let dashboard = controller(db(), 10);
        let check = AllowListCheck::new(Vec::new());
        assert!(matches!(
            dashboard.start("ada@example.com", &check),
            Err(Error::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_during_flight_replays_exactly_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let (trigger, _snapshots, task) = spawn_reload_loop(move |seq| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            DashboardSnapshot {
                reload_seq: seq,
                ..Default::default()
            }
        });

        request_reload(&trigger);
        tokio::time::sleep(Duration::from_millis(30)).await;
        for _ in 0..5 {
            request_reload(&trigger);
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        task.abort();
    }

    #[tokio::test]
    async fn test_snapshot_splits_operator_sessions() {
        let db = db();
        db.upsert_session(&session("guest", Some("ada@example.com")))
            .unwrap();
        db.upsert_session(&session("ops", Some("admin.ops@example.com")))
            .unwrap();

        let snapshot = controller(db, 10).load();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].session.id, "guest");
        assert_eq!(snapshot.operators.len(), 1);
        assert_eq!(snapshot.stats.live_sessions, 2);
        assert_eq!(snapshot.stats.recently_active, 2);
    }

    #[tokio::test]
    async fn test_feed_change_triggers_reload() {
        let db = db();
        let dashboard = controller(db.clone(), 3600);
        let check = AllowListCheck::new(Vec::new());
        let handle = dashboard.start("admin@example.com", &check).unwrap();
        let mut snapshots = handle.subscribe();

        // Initial poll tick
        tokio::time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .unwrap()
            .unwrap();

        db.upsert_session(&session("guest", None)).unwrap();

        let found = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                snapshots.changed().await.unwrap();
                if snapshots.borrow().participants.len() == 1 {
                    break;
                }
            }
        })
        .await;
        assert!(found.is_ok());
        assert!(handle.latest().reload_seq >= 2);
        handle.stop();
    }
}
