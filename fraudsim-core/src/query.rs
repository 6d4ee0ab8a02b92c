//! Read side for the operator dashboard.
//!
//! All reads degrade to empty results when the store is unavailable.

use crate::config::TrackingConfig;
use crate::store::SessionStore;
use crate::types::*;
use serde::Serialize;
use std::sync::Arc;

/// Whether the identity attributes mark someone as an operator.
///
/// True if the email or display name contains "admin" (case-insensitive) or
/// the email is on the operator allow-list.
pub fn is_operator_identity(
    email: Option<&str>,
    display_name: Option<&str>,
    allow_list: &[String],
) -> bool {
    let email = email.map(str::to_lowercase);
    let name = display_name.map(str::to_lowercase);

    if email.as_deref().is_some_and(|e| e.contains("admin")) {
        return true;
    }
    if name.as_deref().is_some_and(|n| n.contains("admin")) {
        return true;
    }
    email
        .as_deref()
        .is_some_and(|e| allow_list.iter().any(|a| a.trim().eq_ignore_ascii_case(e)))
}

/// Role of a stored session: its recorded role, or operator if any identity
/// heuristic matches.
pub fn classify_role(session: &Session, allow_list: &[String]) -> SessionRole {
    if session.role == SessionRole::Operator
        || is_operator_identity(
            session.participant_email.as_deref(),
            session.participant_name.as_deref(),
            allow_list,
        )
    {
        SessionRole::Operator
    } else {
        SessionRole::Participant
    }
}

/// One session with its current captured values and open alerts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub role: SessionRole,
    /// Latest value per field name, in step order
    pub fields: Vec<CapturedField>,
    pub alerts: Vec<Alert>,
}

pub struct SessionQueryService {
    store: Arc<dyn SessionStore>,
    config: TrackingConfig,
}

impl SessionQueryService {
    pub fn new(store: Arc<dyn SessionStore>, config: TrackingConfig) -> Self {
        Self { store, config }
    }

    /// Live sessions (active, seen within the liveness window), most recently
    /// active first, each classified.
    pub fn list_active(&self, limit: usize) -> Vec<SessionView> {
        let mut views = self.live_views();
        views.truncate(limit);
        views
    }

    /// Live sessions excluding operators.
    pub fn list_participant_sessions(&self, limit: usize) -> Vec<SessionView> {
        self.live_views()
            .into_iter()
            .filter(|v| v.role == SessionRole::Participant)
            .take(limit)
            .collect()
    }

    /// Live operator sessions.
    pub fn list_operator_sessions(&self, limit: usize) -> Vec<SessionView> {
        self.live_views()
            .into_iter()
            .filter(|v| v.role == SessionRole::Operator)
            .take(limit)
            .collect()
    }

    pub fn list_recent_activity(&self, limit: usize) -> Vec<AdminActivity> {
        self.store.list_recent_activity(limit).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load admin activity");
            Vec::new()
        })
    }

    /// Unresolved alerts, newest first.
    pub fn list_active_alerts(&self) -> Vec<Alert> {
        self.store.list_unresolved_alerts(None).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to load alerts");
            Vec::new()
        })
    }

    pub fn session_detail(&self, session_id: &str) -> Option<SessionDetail> {
        let loaded = self.store.get_session(session_id).and_then(|session| {
            let Some(session) = session else {
                return Ok(None);
            };
            let fields = self.store.current_fields(session_id)?;
            let alerts = self.store.list_unresolved_alerts(Some(session_id))?;
            Ok(Some(SessionDetail {
                role: classify_role(&session, &self.config.operator_emails),
                session,
                fields,
                alerts,
            }))
        });

        loaded.unwrap_or_else(|e| {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to load session detail");
            None
        })
    }

    fn live_views(&self) -> Vec<SessionView> {
        let now = timestamp_now();
        let since = now - self.config.liveness_window();
        let recent_since = now - self.config.recent_window();

        let rows = self
            .store
            .list_live_sessions(since, usize::MAX)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load live sessions");
                Vec::new()
            });

        rows.into_iter()
            .map(|row| SessionView {
                role: classify_role(&row.session, &self.config.operator_emails),
                recently_active: row.session.last_activity_at >= recent_since,
                capture_count: row.capture_count,
                sensitive_count: row.sensitive_count,
                session: row.session,
            })
            .collect()
    }
}
