//! Operator interventions on a single session.
//!
//! Each operation stands alone: it either succeeds and appends one audit
//! record, or returns the error to the operator. Nothing is retried.

use crate::error::{Error, Result};
use crate::risk::{self, RiskAssessment};
use crate::store::SessionStore;
use crate::types::*;
use serde_json::json;
use std::sync::Arc;

const NUDGE_MESSAGE: &str =
    "Take a second look before you continue. Does this site look like the airline's real one?";
const RESTART_MESSAGE: &str = "Your operator has restarted the simulation.";

/// Actor recorded when no operator reference is configured.
const SYSTEM_ACTOR: &str = "system";

pub struct InterventionController {
    store: Arc<dyn SessionStore>,
    actor: Option<String>,
}

impl InterventionController {
    /// `actor` is the operator reference written to audit records and
    /// alert resolutions.
    pub fn new(store: Arc<dyn SessionStore>, actor: Option<String>) -> Self {
        Self { store, actor }
    }

    /// Score the session's current captured data.
    pub fn analyze(&self, session_id: &str) -> Result<RiskAssessment> {
        let (session, assessment) = self.assess(session_id)?;
        self.log(
            ActivityType::Analyze,
            format!("Analyzed session {}: {} risk", session.id, assessment.level),
            json!({
                "session_id": session.id,
                "risk_level": assessment.level,
                "risk_score": assessment.score,
            }),
        )?;
        Ok(assessment)
    }

    /// Queue a guidance message for the participant.
    pub fn send_guidance(
        &self,
        session_id: &str,
        message: &str,
        kind: GuidanceKind,
    ) -> Result<GuidanceMessage> {
        let session = self.require_session(session_id)?;
        let guidance = self.queue_guidance(&session, kind, message)?;
        self.log(
            ActivityType::Guidance,
            format!("Sent {} to session {}", kind.as_str(), session.id),
            json!({
                "session_id": session.id,
                "guidance_id": guidance.id,
                "kind": kind,
                "message": message,
            }),
        )?;
        Ok(guidance)
    }

    /// Ask the participant's flow to start over.
    ///
    /// Stored progress is left as is; the flow starts a fresh session.
    pub fn restart(&self, session_id: &str) -> Result<GuidanceMessage> {
        let session = self.require_session(session_id)?;
        let guidance = self.queue_guidance(&session, GuidanceKind::Restart, RESTART_MESSAGE)?;
        self.log(
            ActivityType::Restart,
            format!("Restarted session {}", session.id),
            json!({
                "session_id": session.id,
                "guidance_id": guidance.id,
                "step": session.current_step,
            }),
        )?;
        Ok(guidance)
    }

    pub fn nudge(&self, session_id: &str) -> Result<GuidanceMessage> {
        let session = self.require_session(session_id)?;
        let guidance = self.queue_guidance(&session, GuidanceKind::Nudge, NUDGE_MESSAGE)?;
        self.log(
            ActivityType::Nudge,
            format!("Nudged session {}", session.id),
            json!({ "session_id": session.id, "guidance_id": guidance.id }),
        )?;
        Ok(guidance)
    }

    /// Raise an alert if the session is at HIGH risk or above and none is
    /// open yet. Returns the session's unresolved alerts.
    pub fn check_alerts(&self, session_id: &str) -> Result<Vec<Alert>> {
        let (session, assessment) = self.assess(session_id)?;
        let mut open = self.store.list_unresolved_alerts(Some(&session.id))?;

        let mut raised = None;
        if let Some(severity) = assessment.level.alert_severity() {
            if !open.iter().any(|a| a.severity == severity) {
                let alert = Alert {
                    id: uuid::Uuid::new_v4().to_string(),
                    session_id: session.id.clone(),
                    severity,
                    message: format!(
                        "{} risk: {} data captured",
                        assessment.level,
                        assessment
                            .categories
                            .iter()
                            .map(|c| c.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    created_at: timestamp_now(),
                    resolved_by: None,
                    resolved_at: None,
                };
                self.store.insert_alert(&alert)?;
                tracing::info!(session_id = %session.id, alert_id = %alert.id, "Alert raised");
                raised = Some(alert.id.clone());
                open.insert(0, alert);
            }
        }

        self.log(
            ActivityType::CheckAlerts,
            format!("Checked alerts for session {}", session.id),
            json!({
                "session_id": session.id,
                "risk_level": assessment.level,
                "raised": raised,
                "open": open.len(),
            }),
        )?;
        Ok(open)
    }

    /// Mark an alert resolved. Already-resolved alerts are returned unchanged.
    pub fn resolve_alert(&self, alert_id: &str) -> Result<Alert> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        if alert.is_resolved() {
            return Ok(alert);
        }

        let actor = self.actor.as_deref().unwrap_or(SYSTEM_ACTOR);
        let resolved = self
            .store
            .resolve_alert(alert_id, actor, timestamp_now())?
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;

        self.log(
            ActivityType::ResolveAlert,
            format!("Resolved alert {}", resolved.id),
            json!({ "alert_id": resolved.id, "session_id": resolved.session_id }),
        )?;
        Ok(resolved)
    }

    fn require_session(&self, session_id: &str) -> Result<Session> {
        self.store
            .get_session(session_id)?
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn assess(&self, session_id: &str) -> Result<(Session, RiskAssessment)> {
        let session = self.require_session(session_id)?;
        let fields = self.store.current_fields(&session.id)?;
        let assessment = risk::assess_session(&session, &fields);
        Ok((session, assessment))
    }

    fn queue_guidance(
        &self,
        session: &Session,
        kind: GuidanceKind,
        message: &str,
    ) -> Result<GuidanceMessage> {
        let guidance = GuidanceMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            kind,
            message: message.to_string(),
            created_at: timestamp_now(),
            delivered_at: None,
        };
        self.store.insert_guidance(&guidance)?;
        Ok(guidance)
    }

    fn log(
        &self,
        activity_type: ActivityType,
        description: String,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let activity = AdminActivity {
            id: uuid::Uuid::new_v4().to_string(),
            actor_ref: self.actor.clone(),
            activity_type,
            description,
            metadata,
            created_at: timestamp_now(),
        };
        self.store.append_activity(&activity)?;
        tracing::info!(
            activity = activity_type.as_str(),
            actor = self.actor.as_deref().unwrap_or(SYSTEM_ACTOR),
            "{}",
            activity.description
        );
        Ok(())
    }
}
