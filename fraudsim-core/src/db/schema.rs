//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Timestamps are fixed-width RFC 3339 UTC strings (see `repo::ts`), so range
//! predicates can compare them as text.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sessions, captured fields, alerts, admin activity
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id                TEXT PRIMARY KEY,
        token             TEXT NOT NULL UNIQUE,
        participant_ref   TEXT,
        participant_email TEXT,
        participant_name  TEXT,
        role              TEXT NOT NULL DEFAULT 'participant',
        started_at        DATETIME NOT NULL,
        last_activity_at  DATETIME NOT NULL,
        current_step      INTEGER NOT NULL DEFAULT 0,
        total_steps       INTEGER NOT NULL DEFAULT 0,
        status            TEXT NOT NULL,   -- 'active', 'inactive', 'completed'
        entry_point       TEXT NOT NULL,
        device_info       JSON,
        risk_score        INTEGER,
        completed_at      DATETIME
    );

    -- Append-only; the current value of a field is its latest row
    CREATE TABLE IF NOT EXISTS captured_fields (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        session_id       TEXT NOT NULL REFERENCES sessions(id),
        step             INTEGER NOT NULL,
        field_name       TEXT NOT NULL,
        field_value      TEXT NOT NULL,
        is_sensitive     INTEGER NOT NULL DEFAULT 0,
        captured_at      DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS alerts (
        id               TEXT PRIMARY KEY,
        session_id       TEXT NOT NULL REFERENCES sessions(id),
        severity         TEXT NOT NULL,    -- 'low', 'medium', 'high'
        message          TEXT NOT NULL,
        created_at       DATETIME NOT NULL,
        resolved_by      TEXT,
        resolved_at      DATETIME
    );

    CREATE TABLE IF NOT EXISTS admin_activity (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        actor_ref        TEXT,             -- NULL = system
        activity_type    TEXT NOT NULL,
        description      TEXT NOT NULL,
        metadata         JSON,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_status_activity ON sessions(status, last_activity_at DESC);
    CREATE INDEX IF NOT EXISTS idx_captured_session_field ON captured_fields(session_id, field_name);
    CREATE INDEX IF NOT EXISTS idx_alerts_unresolved ON alerts(created_at DESC) WHERE resolved_at IS NULL;
    CREATE INDEX IF NOT EXISTS idx_admin_activity_created ON admin_activity(created_at DESC);
    "#,
    // Version 2: operator guidance delivered to participants
    r#"
    CREATE TABLE IF NOT EXISTS guidance_messages (
        seq              INTEGER PRIMARY KEY AUTOINCREMENT,
        id               TEXT NOT NULL UNIQUE,
        session_id       TEXT NOT NULL REFERENCES sessions(id),
        kind             TEXT NOT NULL,    -- 'hint', 'warning', 'nudge', 'restart'
        message          TEXT NOT NULL,
        created_at       DATETIME NOT NULL,
        delivered_at     DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_guidance_pending ON guidance_messages(session_id) WHERE delivered_at IS NULL;
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "sessions",
            "captured_fields",
            "alerts",
            "admin_activity",
            "guidance_messages",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        for table in ["captured_fields", "alerts", "guidance_messages"] {
            let fk_tables: Vec<String> = conn
                .prepare(&format!("PRAGMA foreign_key_list({})", table))
                .unwrap()
                .query_map([], |row| row.get::<_, String>(2))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect();

            assert!(
                fk_tables.iter().any(|t| t == "sessions"),
                "{} should reference sessions",
                table
            );
        }
    }
}
