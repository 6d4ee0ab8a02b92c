//! Local fallback cache
//!
//! Process-local mirror of the participant's session and captured fields.
//! Every participant write lands here first; entries the durable store did
//! not accept stay flagged `pending` until [`SessionManager::sync_pending`]
//! replays them.
//!
//! When opened with a path the cache is persisted as JSON after each write
//! (write to a temp file, then rename), so it survives a process restart.
//!
//! Completed sessions leave the cache, fields included, as soon as the store
//! holds them and nothing of theirs is pending. The file only ever carries
//! sessions still in progress plus unsynced data.
//!
//! [`SessionManager::sync_pending`]: crate::session::SessionManager::sync_pending

use crate::error::Result;
use crate::types::{CapturedField, Session, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    /// Sessions by id
    sessions: HashMap<String, CachedSession>,
    /// Latest captured value per field, by session id then field name
    fields: HashMap<String, BTreeMap<String, CapturedField>>,
    /// Captured rows the store has not accepted yet, in arrival order
    pending_fields: Vec<CapturedField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSession {
    session: Session,
    pending: bool,
}

/// Process-local durable cache used when the session store is unreachable.
pub struct FallbackCache {
    path: Option<PathBuf>,
    state: Mutex<CacheState>,
}

impl FallbackCache {
    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Open (or create) a cache persisted at `path`.
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty cache;
    /// the participant flow must be able to start regardless.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let state = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt fallback cache");
                CacheState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// Store or merge a session.
    ///
    /// Merging keeps the higher step and never reopens a completed session.
    pub fn put_session(&self, session: &Session, pending: bool) {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .sessions
            .entry(session.id.clone())
            .or_insert_with(|| CachedSession {
                session: session.clone(),
                pending,
            });

        let merged = merge_session(&entry.session, session);
        // A stored snapshot clears the flag unless the cache still holds newer state.
        entry.pending = pending || (entry.pending && merged != *session);
        entry.session = merged;

        prune_if_settled(&mut state, &session.id);
        self.persist(&state);
    }

    /// Apply an in-place update to a cached session and flag it pending.
    pub fn update_session<F>(&self, id: &str, update: F) -> Option<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut state = self.state.lock().unwrap();
        let entry = state.sessions.get_mut(id)?;
        update(&mut entry.session);
        entry.pending = true;
        let session = entry.session.clone();
        self.persist(&state);
        Some(session)
    }

    pub fn session(&self, id: &str) -> Option<Session> {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).map(|c| c.session.clone())
    }

    pub fn session_by_token(&self, token: &str) -> Option<Session> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .values()
            .find(|c| c.session.token == token)
            .map(|c| c.session.clone())
    }

    /// Mirror a captured field. Last write wins per field name.
    ///
    /// Stored fields are only mirrored for sessions this cache still tracks.
    pub fn record_field(&self, field: &CapturedField, pending: bool) {
        let mut state = self.state.lock().unwrap();
        if !pending && !state.sessions.contains_key(&field.session_id) {
            return;
        }
        state
            .fields
            .entry(field.session_id.clone())
            .or_default()
            .insert(field.field_name.clone(), field.clone());
        if pending {
            state.pending_fields.push(field.clone());
        }
        self.persist(&state);
    }

    /// Current captured fields for a session, ordered by step.
    pub fn fields_for(&self, session_id: &str) -> Vec<CapturedField> {
        let state = self.state.lock().unwrap();
        let mut fields: Vec<CapturedField> = state
            .fields
            .get(session_id)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default();
        fields.sort_by(|a, b| a.step.cmp(&b.step).then(a.captured_at.cmp(&b.captured_at)));
        fields
    }

    /// Look up the current value of one field.
    pub fn field(&self, session_id: &str, field_name: &str) -> Option<CapturedField> {
        let state = self.state.lock().unwrap();
        state
            .fields
            .get(session_id)
            .and_then(|by_name| by_name.get(field_name))
            .cloned()
    }

    pub fn pending_sessions(&self) -> Vec<Session> {
        let state = self.state.lock().unwrap();
        state
            .sessions
            .values()
            .filter(|c| c.pending)
            .map(|c| c.session.clone())
            .collect()
    }

    pub fn pending_fields(&self) -> Vec<CapturedField> {
        let state = self.state.lock().unwrap();
        state.pending_fields.clone()
    }

    /// Whether the session has local changes the store has not accepted.
    pub fn is_session_pending(&self, id: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.sessions.get(id).is_some_and(|c| c.pending)
    }

    pub fn mark_session_synced(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.sessions.get_mut(id) {
            entry.pending = false;
        }
        prune_if_settled(&mut state, id);
        self.persist(&state);
    }

    pub fn mark_field_synced(&self, field_id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.pending_fields.iter().position(|f| f.id == field_id) else {
            return;
        };
        let field = state.pending_fields.remove(pos);
        prune_if_settled(&mut state, &field.session_id);
        self.persist(&state);
    }

    /// Drop a pending field the store will never accept, along with its
    /// mirrored value.
    pub fn discard_field(&self, field_id: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.pending_fields.iter().position(|f| f.id == field_id) else {
            return;
        };
        let field = state.pending_fields.remove(pos);
        let now_empty = match state.fields.get_mut(&field.session_id) {
            Some(by_name) => {
                if by_name.get(&field.field_name).is_some_and(|f| f.id == field.id) {
                    by_name.remove(&field.field_name);
                }
                by_name.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.fields.remove(&field.session_id);
        }
        self.persist(&state);
    }

    /// Number of sessions currently held, pending or not.
    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Number of sessions and fields still waiting for the store.
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.sessions.values().filter(|c| c.pending).count() + state.pending_fields.len()
    }

    fn persist(&self, state: &CacheState) {
        let Some(path) = &self.path else {
            return;
        };

        let result = serde_json::to_vec(state)
            .map_err(crate::error::Error::from)
            .and_then(|bytes| {
                let tmp = path.with_extension("json.tmp");
                std::fs::write(&tmp, bytes)?;
                std::fs::rename(&tmp, path)?;
                Ok(())
            });

        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to persist fallback cache");
        }
    }
}

/// Forget a completed session once the store holds it and every field.
fn prune_if_settled(state: &mut CacheState, session_id: &str) {
    let settled = state
        .sessions
        .get(session_id)
        .is_some_and(|c| c.session.is_completed() && !c.pending)
        && !state.pending_fields.iter().any(|f| f.session_id == session_id);
    if settled {
        state.sessions.remove(session_id);
        state.fields.remove(session_id);
    }
}

/// Merge an incoming session snapshot over a cached one.
fn merge_session(cached: &Session, incoming: &Session) -> Session {
    let mut merged = incoming.clone();
    merged.current_step = cached.current_step.max(incoming.current_step);
    merged.last_activity_at = cached.last_activity_at.max(incoming.last_activity_at);
    if cached.status == SessionStatus::Completed {
        merged.status = SessionStatus::Completed;
        merged.risk_score = incoming.risk_score.or(cached.risk_score);
        merged.completed_at = incoming.completed_at.or(cached.completed_at);
    }
    merged
}
