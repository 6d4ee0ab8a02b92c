//! Test helpers shared by unit tests.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::store::{ProgressUpdate, SessionStore, StoreChange};
use crate::types::*;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// In-memory store that can be switched offline to simulate an outage.
pub struct FlakyStore {
    inner: Database,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        let inner = Database::open_in_memory().unwrap();
        inner.migrate().unwrap();
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &Database {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(Error::StoreUnavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SessionStore for FlakyStore {
    fn upsert_session(&self, session: &Session) -> Result<()> {
        self.check()?;
        self.inner.upsert_session(session)
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        self.check()?;
        self.inner.get_session(id)
    }

    fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        self.check()?;
        self.inner.get_session_by_token(token)
    }

    fn advance_session(&self, id: &str, update: ProgressUpdate) -> Result<Option<Session>> {
        self.check()?;
        self.inner.advance_session(id, update)
    }

    fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.inner.touch_session(id, at)
    }

    fn complete_session(
        &self,
        id: &str,
        risk_score: u8,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        self.check()?;
        self.inner.complete_session(id, risk_score, at)
    }

    fn list_live_sessions(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LiveSessionRow>> {
        self.check()?;
        self.inner.list_live_sessions(since, limit)
    }

    fn deactivate_sessions(&self, cutoff: Option<DateTime<Utc>>) -> Result<usize> {
        self.check()?;
        self.inner.deactivate_sessions(cutoff)
    }

    fn append_captured_field(&self, field: &CapturedField) -> Result<()> {
        self.check()?;
        self.inner.append_captured_field(field)
    }

    fn current_fields(&self, session_id: &str) -> Result<Vec<CapturedField>> {
        self.check()?;
        self.inner.current_fields(session_id)
    }

    fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.check()?;
        self.inner.insert_alert(alert)
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        self.check()?;
        self.inner.get_alert(id)
    }

    fn list_unresolved_alerts(&self, session_id: Option<&str>) -> Result<Vec<Alert>> {
        self.check()?;
        self.inner.list_unresolved_alerts(session_id)
    }

    fn resolve_alert(
        &self,
        id: &str,
        actor_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        self.check()?;
        self.inner.resolve_alert(id, actor_ref, at)
    }

    fn append_activity(&self, activity: &AdminActivity) -> Result<()> {
        self.check()?;
        self.inner.append_activity(activity)
    }

    fn list_recent_activity(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        self.check()?;
        self.inner.list_recent_activity(limit)
    }

    fn insert_guidance(&self, guidance: &GuidanceMessage) -> Result<()> {
        self.check()?;
        self.inner.insert_guidance(guidance)
    }

    fn take_pending_guidance(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<GuidanceMessage>> {
        self.check()?;
        self.inner.take_pending_guidance(session_id, at)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes()
    }
}
