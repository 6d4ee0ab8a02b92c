//! Participant-side session lifecycle.
//!
//! Every call takes an explicit [`SessionHandle`]; there is no ambient
//! "current session". All mutating calls are fail-open: when the store
//! rejects a write the change is kept in the [`FallbackCache`] and the caller
//! carries on.

use crate::config::TrackingConfig;
use crate::fallback::FallbackCache;
use crate::query;
use crate::risk;
use crate::store::{ProgressUpdate, SessionStore};
use crate::types::*;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies one session across participant-side calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub session_id: String,
    pub token: String,
}

impl From<&Session> for SessionHandle {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            token: session.token.clone(),
        }
    }
}

/// Who is entering the flow, as reported by the front-end.
#[derive(Debug, Clone, Default)]
pub struct Participant {
    pub reference: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Default)]
pub struct SessionInit {
    pub participant: Option<Participant>,
    pub entry_point: String,
    pub device_info: DeviceInfo,
    /// Result of the caller's is-operator capability check
    pub operator: bool,
    /// Overrides the configured number of steps
    pub total_steps: Option<u32>,
}

/// Inputs to the completion risk score.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskInputs {
    /// Whether the participant finished the whole flow. Derived from the
    /// session's progress when not given.
    pub flow_completed: Option<bool>,
}

/// Outcome of replaying the fallback cache into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sessions_synced: usize,
    pub fields_synced: usize,
    pub still_pending: usize,
}

/// Owns session creation, resumption, progress and completion.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Arc<FallbackCache>,
    config: TrackingConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<FallbackCache>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<FallbackCache> {
        &self.cache
    }

    /// Resume the session behind `existing_token` if it is still open,
    /// otherwise start a new one.
    pub fn initialize(&self, existing_token: Option<&str>, init: &SessionInit) -> Session {
        if let Some(token) = existing_token {
            if let Some(session) = self.resume(token) {
                tracing::info!(session_id = %session.id, step = session.current_step, "Session resumed");
                return session;
            }
        }
        self.create(init)
    }

    fn resume(&self, token: &str) -> Option<Session> {
        let remote = self.store.get_session_by_token(token).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Session lookup failed, checking local cache");
            None
        });

        let mut session = match remote {
            Some(remote) => {
                // Merge with anything newer recorded locally while offline.
                self.cache.put_session(&remote, false);
                self.cache.session(&remote.id).unwrap_or(remote)
            }
            None => self.cache.session_by_token(token)?,
        };

        if session.is_completed() {
            return None;
        }

        session.status = SessionStatus::Active;
        session.last_activity_at = timestamp_now().max(session.last_activity_at);
        self.persist_session(&session);
        Some(session)
    }

    fn create(&self, init: &SessionInit) -> Session {
        let now = timestamp_now();
        let id = uuid::Uuid::new_v4().to_string();
        let participant = init.participant.clone().unwrap_or_default();

        let role = if init.operator
            || query::is_operator_identity(
                participant.email.as_deref(),
                participant.display_name.as_deref(),
                &self.config.operator_emails,
            ) {
            SessionRole::Operator
        } else {
            SessionRole::Participant
        };

        let session = Session {
            token: generate_token(&id, now),
            id,
            participant_ref: participant.reference,
            participant_email: participant.email,
            participant_name: participant.display_name,
            role,
            started_at: now,
            last_activity_at: now,
            current_step: 0,
            total_steps: init.total_steps.unwrap_or(self.config.total_steps),
            status: SessionStatus::Active,
            entry_point: init.entry_point.clone(),
            device_info: init.device_info.clone(),
            risk_score: None,
            completed_at: None,
        };

        self.persist_session(&session);
        tracing::info!(session_id = %session.id, role = role.as_str(), "Session created");
        session
    }

    /// Record progress. Lower steps than the stored one are ignored.
    ///
    /// Returns the latest known state, or `None` if the session is unknown.
    pub fn advance(&self, handle: &SessionHandle, step: u32, total_steps: u32) -> Option<Session> {
        let update = ProgressUpdate {
            step,
            total_steps,
            at: timestamp_now(),
        };

        match self.store.advance_session(&handle.session_id, update) {
            Ok(Some(session)) => {
                self.cache.put_session(&session, false);
                Some(session)
            }
            Ok(None) => self.advance_cached(&handle.session_id, update),
            Err(e) => {
                tracing::warn!(session_id = %handle.session_id, error = %e, "Progress write failed, using local cache");
                self.advance_cached(&handle.session_id, update)
            }
        }
    }

    fn advance_cached(&self, session_id: &str, update: ProgressUpdate) -> Option<Session> {
        self.cache.update_session(session_id, |session| {
            if session.is_completed() {
                return;
            }
            session.current_step = session.current_step.max(update.step);
            if update.total_steps > 0 {
                session.total_steps = update.total_steps;
            }
            session.last_activity_at = session.last_activity_at.max(update.at);
            session.status = SessionStatus::Active;
        })
    }

    /// Mark the session completed and stamp its risk score.
    ///
    /// Scores the fields written so far. Flows that capture through a
    /// [`CapturePipeline`](crate::capture::CapturePipeline) should complete
    /// through [`CapturePipeline::complete`](crate::capture::CapturePipeline::complete)
    /// so queued captures are counted.
    pub fn complete(&self, handle: &SessionHandle, inputs: RiskInputs) -> Option<Session> {
        let fields = self.current_fields(&handle.session_id);
        let flow_completed = inputs.flow_completed.unwrap_or_else(|| {
            self.session(&handle.session_id)
                .map(|s| s.reached_final_step())
                .unwrap_or(false)
        });
        let assessment = risk::assess(&fields, flow_completed);
        let now = timestamp_now();

        let completed = match self
            .store
            .complete_session(&handle.session_id, assessment.score, now)
        {
            Ok(Some(session)) => {
                self.cache.put_session(&session, false);
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(session_id = %handle.session_id, error = %e, "Completion write failed, using local cache");
                None
            }
        };

        let completed = completed.or_else(|| {
            self.cache.update_session(&handle.session_id, |session| {
                session.status = SessionStatus::Completed;
                session.risk_score = Some(assessment.score);
                session.completed_at.get_or_insert(now);
                session.last_activity_at = session.last_activity_at.max(now);
            })
        });

        if let Some(session) = &completed {
            tracing::info!(
                session_id = %session.id,
                risk_level = assessment.level.as_str(),
                risk_score = assessment.score,
                "Session completed"
            );
        }
        completed
    }

    /// Write one captured field. Used by the capture worker.
    ///
    /// Stored fields are mirrored into the fallback cache. During an outage
    /// the field is kept there as pending; a field the store rejects outright
    /// is dropped, unless its session is itself still waiting to be synced.
    /// Returns whether the store accepted it.
    pub fn record_capture(&self, field: &CapturedField) -> bool {
        match self.store.append_captured_field(field) {
            Ok(()) => {
                self.cache.record_field(field, false);
                if let Err(e) = self.store.touch_session(&field.session_id, field.captured_at) {
                    tracing::debug!(session_id = %field.session_id, error = %e, "Activity touch failed");
                }
                true
            }
            Err(e) if e.is_store_unavailable() || self.cache.is_session_pending(&field.session_id) => {
                tracing::warn!(
                    session_id = %field.session_id,
                    field = %field.field_name,
                    error = %e,
                    "Capture write failed, kept in local cache"
                );
                self.cache.record_field(field, true);
                self.cache.update_session(&field.session_id, |session| {
                    if !session.is_completed() {
                        session.last_activity_at = session.last_activity_at.max(field.captured_at);
                        session.status = SessionStatus::Active;
                    }
                });
                false
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %field.session_id,
                    field = %field.field_name,
                    error = %e,
                    "Capture rejected by store, dropped"
                );
                false
            }
        }
    }

    /// Current captured fields, merging the store with local-only captures.
    pub fn current_fields(&self, session_id: &str) -> Vec<CapturedField> {
        let mut by_name: HashMap<String, CapturedField> = HashMap::new();

        match self.store.current_fields(session_id) {
            Ok(fields) => {
                for field in fields {
                    by_name.insert(field.field_name.clone(), field);
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Field read failed, using local cache");
            }
        }

        for field in self.cache.fields_for(session_id) {
            let newer = by_name
                .get(&field.field_name)
                .map_or(true, |existing| field.captured_at >= existing.captured_at);
            if newer {
                by_name.insert(field.field_name.clone(), field);
            }
        }

        let mut fields: Vec<CapturedField> = by_name.into_values().collect();
        fields.sort_by(|a, b| a.step.cmp(&b.step).then(a.captured_at.cmp(&b.captured_at)));
        fields
    }

    /// Latest known state of a session (store first, then cache).
    pub fn session(&self, session_id: &str) -> Option<Session> {
        match self.store.get_session(session_id) {
            Ok(Some(session)) => Some(session),
            Ok(None) => self.cache.session(session_id),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Session read failed, using local cache");
                self.cache.session(session_id)
            }
        }
    }

    /// Participant-facing guidance check. Each message is returned once.
    pub fn fetch_guidance(&self, handle: &SessionHandle) -> Vec<GuidanceMessage> {
        self.store
            .take_pending_guidance(&handle.session_id, timestamp_now())
            .unwrap_or_else(|e| {
                tracing::warn!(session_id = %handle.session_id, error = %e, "Guidance check failed");
                Vec::new()
            })
    }

    /// Replay cached sessions and captured fields the store has not accepted.
    ///
    /// Sessions go first so their fields satisfy the foreign key. Rows the
    /// store rejects for reasons other than an outage are discarded.
    pub fn sync_pending(&self) -> SyncReport {
        let mut report = SyncReport::default();

        for session in self.cache.pending_sessions() {
            match self.store.upsert_session(&session) {
                Ok(()) => {
                    self.cache.mark_session_synced(&session.id);
                    report.sessions_synced += 1;
                }
                Err(e) if e.is_store_unavailable() => {
                    tracing::debug!(session_id = %session.id, error = %e, "Session still pending");
                }
                Err(e) => {
                    tracing::warn!(session_id = %session.id, error = %e, "Store rejected cached session, no longer replayed");
                    self.cache.mark_session_synced(&session.id);
                }
            }
        }

        for field in self.cache.pending_fields() {
            match self.store.append_captured_field(&field) {
                Ok(()) => {
                    self.cache.mark_field_synced(&field.id);
                    report.fields_synced += 1;
                }
                Err(e) if e.is_store_unavailable() || self.cache.is_session_pending(&field.session_id) => {
                    tracing::debug!(field_id = %field.id, error = %e, "Field still pending");
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %field.session_id,
                        field = %field.field_name,
                        error = %e,
                        "Store rejected cached field, discarded"
                    );
                    self.cache.discard_field(&field.id);
                }
            }
        }

        report.still_pending = self.cache.pending_count();
        if report.sessions_synced + report.fields_synced > 0 {
            tracing::info!(
                sessions = report.sessions_synced,
                fields = report.fields_synced,
                still_pending = report.still_pending,
                "Replayed fallback cache"
            );
        }
        report
    }

    /// [`sync_pending`](Self::sync_pending) if anything is waiting.
    pub fn replay_if_pending(&self) -> Option<SyncReport> {
        (self.cache.pending_count() > 0).then(|| self.sync_pending())
    }

    /// How often the capture worker retries the fallback cache.
    pub fn replay_interval(&self) -> std::time::Duration {
        self.config.replay_interval()
    }

    fn persist_session(&self, session: &Session) {
        match self.store.upsert_session(session) {
            Ok(()) => self.cache.put_session(session, false),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Session write failed, using local cache");
                self.cache.put_session(session, true);
            }
        }
    }
}

/// Opaque resume token. Unique, not secret.
fn generate_token(session_id: &str, at: chrono::DateTime<chrono::Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(at.timestamp_micros().to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}
