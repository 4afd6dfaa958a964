//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so this is safe
//! to re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session_log (
    session_id      TEXT PRIMARY KEY NOT NULL,
    entity_id       TEXT NOT NULL,
    project_id      TEXT NOT NULL,
    mode            TEXT NOT NULL CHECK(mode IN ('plan','build')),
    model           TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS log_message (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL REFERENCES session_log(session_id),
    role            TEXT NOT NULL CHECK(role IN ('user','assistant')),
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_message_session ON log_message(session_id, id);
CREATE INDEX IF NOT EXISTS idx_session_log_project ON session_log(project_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
