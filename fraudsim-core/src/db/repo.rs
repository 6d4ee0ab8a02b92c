//! Database repository layer
//!
//! SQLite implementation of [`SessionStore`]. Change notifications come from
//! SQLite's update hook, so every committed row write on a tracked table is
//! announced on the broadcast channel returned by [`SessionStore::changes`].

use crate::error::{Error, Result};
use crate::store::{Collection, ProgressUpdate, SessionStore, StoreChange};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::hooks::Action;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Buffered change notifications per subscriber before it starts lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Format a timestamp for storage.
///
/// Fixed width (microseconds, `Z` suffix) so text comparison is chronological.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// `LIMIT` parameter; saturates instead of wrapping to SQLite's "no limit".
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self::with_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let hook_tx = tx.clone();
        conn.update_hook(Some(
            move |_action: Action, _db: &str, table: &str, row_id: i64| {
                if let Some(collection) = Collection::from_table(table) {
                    // No receivers is fine; nobody is watching yet.
                    let _ = hook_tx.send(StoreChange { collection, row_id });
                }
            },
        ));

        Self {
            conn: Mutex::new(conn),
            changes: tx,
        }
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
        let role_str: String = row.get("role")?;
        let status_str: String = row.get("status")?;
        let started_at_str: String = row.get("started_at")?;
        let last_activity_str: String = row.get("last_activity_at")?;
        let device_str: Option<String> = row.get("device_info")?;
        let completed_str: Option<String> = row.get("completed_at")?;

        Ok(Session {
            id: row.get("id")?,
            token: row.get("token")?,
            participant_ref: row.get("participant_ref")?,
            participant_email: row.get("participant_email")?,
            participant_name: row.get("participant_name")?,
            role: role_str.parse().unwrap_or_default(),
            started_at: parse_ts(&started_at_str),
            last_activity_at: parse_ts(&last_activity_str),
            current_step: row.get("current_step")?,
            total_steps: row.get("total_steps")?,
            status: status_str.parse().unwrap_or(SessionStatus::Inactive),
            entry_point: row.get("entry_point")?,
            device_info: device_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            risk_score: row.get("risk_score")?,
            completed_at: parse_ts_opt(completed_str),
        })
    }

    fn row_to_field(row: &Row) -> rusqlite::Result<CapturedField> {
        let captured_at_str: String = row.get("captured_at")?;
        Ok(CapturedField {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            step: row.get("step")?,
            field_name: row.get("field_name")?,
            field_value: row.get("field_value")?,
            is_sensitive: row.get("is_sensitive")?,
            captured_at: parse_ts(&captured_at_str),
        })
    }

    fn row_to_alert(row: &Row) -> rusqlite::Result<Alert> {
        let severity_str: String = row.get("severity")?;
        let created_at_str: String = row.get("created_at")?;
        let resolved_at_str: Option<String> = row.get("resolved_at")?;
        Ok(Alert {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            severity: severity_str.parse().unwrap_or(AlertSeverity::Low),
            message: row.get("message")?,
            created_at: parse_ts(&created_at_str),
            resolved_by: row.get("resolved_by")?,
            resolved_at: parse_ts_opt(resolved_at_str),
        })
    }

    fn row_to_activity(row: &Row) -> rusqlite::Result<AdminActivity> {
        let type_str: String = row.get("activity_type")?;
        let created_at_str: String = row.get("created_at")?;
        let metadata_str: Option<String> = row.get("metadata")?;
        Ok(AdminActivity {
            id: row.get("id")?,
            actor_ref: row.get("actor_ref")?,
            activity_type: type_str.parse().unwrap_or(ActivityType::Analyze),
            description: row.get("description")?,
            metadata: metadata_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::json!({})),
            created_at: parse_ts(&created_at_str),
        })
    }

    fn row_to_guidance(row: &Row) -> rusqlite::Result<GuidanceMessage> {
        let kind_str: String = row.get("kind")?;
        let created_at_str: String = row.get("created_at")?;
        let delivered_str: Option<String> = row.get("delivered_at")?;
        Ok(GuidanceMessage {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            kind: kind_str.parse().unwrap_or(GuidanceKind::Hint),
            message: row.get("message")?,
            created_at: parse_ts(&created_at_str),
            delivered_at: parse_ts_opt(delivered_str),
        })
    }

    fn query_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
        conn.query_row(
            "SELECT * FROM sessions WHERE id = ?",
            [id],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }
}

impl SessionStore for Database {
    // ============================================
    // Session operations
    // ============================================

    fn upsert_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let device_info = serde_json::to_string(&session.device_info)?;
        conn.execute(
            r#"
            INSERT INTO sessions (id, token, participant_ref, participant_email, participant_name,
                                  role, started_at, last_activity_at, current_step, total_steps,
                                  status, entry_point, device_info, risk_score, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                participant_ref = excluded.participant_ref,
                participant_email = excluded.participant_email,
                participant_name = excluded.participant_name,
                last_activity_at = MAX(sessions.last_activity_at, excluded.last_activity_at),
                current_step = MAX(sessions.current_step, excluded.current_step),
                total_steps = excluded.total_steps,
                status = CASE WHEN sessions.status = 'completed' THEN sessions.status
                              ELSE excluded.status END,
                device_info = excluded.device_info,
                risk_score = COALESCE(excluded.risk_score, sessions.risk_score),
                completed_at = COALESCE(excluded.completed_at, sessions.completed_at)
            "#,
            params![
                session.id,
                session.token,
                session.participant_ref,
                session.participant_email,
                session.participant_name,
                session.role.as_str(),
                ts(&session.started_at),
                ts(&session.last_activity_at),
                session.current_step,
                session.total_steps,
                session.status.as_str(),
                session.entry_point,
                device_info,
                session.risk_score,
                session.completed_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        Self::query_session(&conn, id)
    }

    fn get_session_by_token(&self, token: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM sessions WHERE token = ?",
            [token],
            Self::row_to_session,
        )
        .optional()
        .map_err(Error::from)
    }

    fn advance_session(&self, id: &str, update: ProgressUpdate) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE sessions SET
                current_step = MAX(current_step, ?2),
                total_steps = CASE WHEN ?3 > 0 THEN ?3 ELSE total_steps END,
                last_activity_at = MAX(last_activity_at, ?4),
                status = 'active'
            WHERE id = ?1 AND status != 'completed'
            "#,
            params![id, update.step, update.total_steps, ts(&update.at)],
        )?;
        Self::query_session(&conn, id)
    }

    fn touch_session(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE sessions SET
                last_activity_at = MAX(last_activity_at, ?2),
                status = 'active'
            WHERE id = ?1 AND status != 'completed'
            "#,
            params![id, ts(&at)],
        )?;
        Ok(())
    }

    fn complete_session(
        &self,
        id: &str,
        risk_score: u8,
        at: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            UPDATE sessions SET
                status = 'completed',
                risk_score = ?2,
                completed_at = COALESCE(completed_at, ?3),
                last_activity_at = MAX(last_activity_at, ?3)
            WHERE id = ?1
            "#,
            params![id, risk_score, ts(&at)],
        )?;
        Self::query_session(&conn, id)
    }

    fn list_live_sessions(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LiveSessionRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                s.*,
                COUNT(c.seq) AS capture_count,
                COALESCE(SUM(c.is_sensitive), 0) AS sensitive_count
            FROM sessions s
            LEFT JOIN captured_fields c ON c.session_id = s.id
            WHERE s.status = 'active' AND s.last_activity_at >= ?1
            GROUP BY s.id
            ORDER BY s.last_activity_at DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![ts(&since), sql_limit(limit)], |row| {
                Ok(LiveSessionRow {
                    session: Self::row_to_session(row)?,
                    capture_count: row.get("capture_count")?,
                    sensitive_count: row.get("sensitive_count")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn deactivate_sessions(&self, cutoff: Option<DateTime<Utc>>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = match cutoff {
            Some(cutoff) => conn.execute(
                "UPDATE sessions SET status = 'inactive' WHERE status = 'active' AND last_activity_at < ?1",
                [ts(&cutoff)],
            )?,
            None => conn.execute(
                "UPDATE sessions SET status = 'inactive' WHERE status = 'active'",
                [],
            )?,
        };
        Ok(changed)
    }

    // ============================================
    // Captured field operations
    // ============================================

    fn append_captured_field(&self, field: &CapturedField) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO captured_fields (id, session_id, step, field_name, field_value,
                                         is_sensitive, captured_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                field.id,
                field.session_id,
                field.step,
                field.field_name,
                field.field_value,
                field.is_sensitive,
                ts(&field.captured_at),
            ],
        )?;
        Ok(())
    }

    fn current_fields(&self, session_id: &str) -> Result<Vec<CapturedField>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT c.*
            FROM captured_fields c
            JOIN (
                SELECT field_name, MAX(seq) AS seq
                FROM captured_fields
                WHERE session_id = ?1
                GROUP BY field_name
            ) latest ON latest.seq = c.seq
            ORDER BY c.step, c.seq
            "#,
        )?;

        let fields = stmt
            .query_map([session_id], Self::row_to_field)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(fields)
    }

    // ============================================
    // Alert operations
    // ============================================

    fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO alerts (id, session_id, severity, message, created_at, resolved_by, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                alert.id,
                alert.session_id,
                alert.severity.as_str(),
                alert.message,
                ts(&alert.created_at),
                alert.resolved_by,
                alert.resolved_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM alerts WHERE id = ?", [id], Self::row_to_alert)
            .optional()
            .map_err(Error::from)
    }

    fn list_unresolved_alerts(&self, session_id: Option<&str>) -> Result<Vec<Alert>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM alerts
            WHERE resolved_at IS NULL AND (?1 IS NULL OR session_id = ?1)
            ORDER BY created_at DESC
            "#,
        )?;

        let alerts = stmt
            .query_map([session_id], Self::row_to_alert)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(alerts)
    }

    fn resolve_alert(
        &self,
        id: &str,
        actor_ref: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE alerts SET resolved_by = ?2, resolved_at = ?3 WHERE id = ?1 AND resolved_at IS NULL",
            params![id, actor_ref, ts(&at)],
        )?;
        conn.query_row("SELECT * FROM alerts WHERE id = ?", [id], Self::row_to_alert)
            .optional()
            .map_err(Error::from)
    }

    // ============================================
    // Admin activity operations
    // ============================================

    fn append_activity(&self, activity: &AdminActivity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO admin_activity (id, actor_ref, activity_type, description, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                activity.id,
                activity.actor_ref,
                activity.activity_type.as_str(),
                activity.description,
                activity.metadata.to_string(),
                ts(&activity.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_recent_activity(&self, limit: usize) -> Result<Vec<AdminActivity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM admin_activity ORDER BY created_at DESC, seq DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([sql_limit(limit)], Self::row_to_activity)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ============================================
    // Guidance operations
    // ============================================

    fn insert_guidance(&self, guidance: &GuidanceMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO guidance_messages (id, session_id, kind, message, created_at, delivered_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                guidance.id,
                guidance.session_id,
                guidance.kind.as_str(),
                guidance.message,
                ts(&guidance.created_at),
                guidance.delivered_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn take_pending_guidance(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<GuidanceMessage>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut pending: Vec<GuidanceMessage> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT * FROM guidance_messages
                WHERE session_id = ?1 AND delivered_at IS NULL
                ORDER BY seq
                "#,
            )?;
            let rows = stmt
                .query_map([session_id], Self::row_to_guidance)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let delivered_at = ts(&at);
        for guidance in &mut pending {
            tx.execute(
                "UPDATE guidance_messages SET delivered_at = ?2 WHERE id = ?1",
                params![guidance.id, delivered_at],
            )?;
            guidance.delivered_at = Some(at);
        }

        tx.commit()?;
        Ok(pending)
    }

    fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
