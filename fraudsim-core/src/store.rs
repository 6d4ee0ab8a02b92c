//! Durable store interface.
//!
//! Everything above this layer talks to an `Arc<dyn SessionStore>`; the
//! SQLite [`Database`](crate::db::Database) is the shipped implementation.

use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Collection touched by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Sessions,
    CapturedFields,
    Alerts,
    AdminActivity,
    Guidance,
}

impl Collection {
    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "sessions" => Some(Collection::Sessions),
            "captured_fields" => Some(Collection::CapturedFields),
            "alerts" => Some(Collection::Alerts),
            "admin_activity" => Some(Collection::AdminActivity),
            "guidance_messages" => Some(Collection::Guidance),
            _ => None,
        }
    }
}

/// A change notification. Carries no payload; receivers re-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub collection: Collection,
    pub row_id: i64,
}

/// Store-side progress update.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate {
    pub step: u32,
    pub total_steps: u32,
    pub at: DateTime<Utc>,
}

/// Opaque durable store: CRUD on the tracked collections plus change
/// notifications.
pub trait SessionStore: Send + Sync {
    // Sessions

    /// Insert a session, or replace it wholesale if the id exists.
    fn upsert_session(&self, session: &Session) -> Result<()>;

    fn get_session(&self, id: &str) -> Result<Option<Session>>;

    fn get_session_by_token(&self, token: &str) -> Result<Option<Session>>;

    /// Raise `current_step` to at least `update.step` and record activity.
    /// Reactivates inactive sessions; completed sessions are left alone.
    /// Returns the stored session after the update, `None` if unknown.
    fn advance_session(&self, id: &str, update: ProgressUpdate) -> Result<Option<Session>>;

    /// Bump `last_activity_at`, reactivating an inactive session.
    fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    fn complete_session(
        &self,
        id: &str,
        risk_score: u8,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>>;

    /// Active sessions with activity at or after `since`, newest first,
    /// joined with capture counts.
    fn list_live_sessions(&self, since: DateTime<Utc>, limit: usize)
        -> Result<Vec<LiveSessionRow>>;

    /// Mark active sessions inactive. With `cutoff`, only those whose last
    /// activity is before it; without, every active session.
    fn deactivate_sessions(&self, cutoff: Option<DateTime<Utc>>) -> Result<usize>;

    // Captured fields

    fn append_captured_field(&self, field: &CapturedField) -> Result<()>;

    /// Latest row per field name for a session, ordered by step.
    fn current_fields(&self, session_id: &str) -> Result<Vec<CapturedField>>;

    // Alerts

    fn insert_alert(&self, alert: &Alert) -> Result<()>;

    fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    /// Unresolved alerts, newest first, optionally scoped to one session.
    fn list_unresolved_alerts(&self, session_id: Option<&str>) -> Result<Vec<Alert>>;

    /// Stamp resolution if not already resolved. Returns the stored alert.
    fn resolve_alert(&self, id: &str, actor_ref: &str, at: DateTime<Utc>)
        -> Result<Option<Alert>>;

    // Admin activity

    fn append_activity(&self, activity: &AdminActivity) -> Result<()>;

    fn list_recent_activity(&self, limit: usize) -> Result<Vec<AdminActivity>>;

    // Guidance

    fn insert_guidance(&self, guidance: &GuidanceMessage) -> Result<()>;

    /// Return undelivered guidance for a session and stamp it delivered.
    fn take_pending_guidance(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<GuidanceMessage>>;

    // Notifications

    /// Subscribe to the raw change stream.
    fn changes(&self) -> broadcast::Receiver<StoreChange>;
}
