//! Schema migrations compiled into the binary.
//!
//! Applied names are recorded in `_assess_migrations`; each migration runs
//! inside its own transaction together with its bookkeeping row, so a failed
//! migration leaves no trace and is retried on the next start.

use rusqlite::Connection;
use std::collections::HashSet;
use thiserror::Error;

macro_rules! migration {
    ($name:literal) => {
        ($name, include_str!(concat!("migrations/", $name, ".sql")))
    };
}

/// `(name, sql)` pairs in apply order. Append only.
const MIGRATIONS: &[(&str, &str)] = &[
    migration!("000_init"),
    migration!("001_users"),
    migration!("002_questions"),
    migration!("003_sessions"),
    migration!("004_responses"),
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to read applied migrations: {0}")]
    StateQuery(rusqlite::Error),
}

/// Brings the schema up to date. Returns how many migrations were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _assess_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    let mut stmt = conn.prepare("SELECT name FROM _assess_migrations")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}

fn apply(conn: &Connection, migrations: &[(&str, &str)]) -> Result<usize, MigrationError> {
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;
    let pending: Vec<_> = migrations
        .iter()
        .filter(|(name, _)| !done.contains(*name))
        .collect();

    for (name, sql) in &pending {
        tracing::info!(migration = *name, "applying migration");
        let failed = |source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(sql).map_err(failed)?;
        tx.execute("INSERT INTO _assess_migrations (name) VALUES (?1)", [name])
            .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM _assess_migrations", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_database_gets_every_migration_once() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), MIGRATIONS.len());
        assert_eq!(recorded(&conn), MIGRATIONS.len() as i64);

        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(recorded(&conn), MIGRATIONS.len() as i64);
    }

    #[test]
    fn schema_has_the_survey_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        for table in ["users", "questions", "sessions", "responses"] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {}", table);
        }
    }

    #[test]
    fn failed_migration_rolls_back_and_is_not_recorded() {
        let conn = Connection::open_in_memory().unwrap();
        let list = [
            ("900_ok", "CREATE TABLE ok_table (id INTEGER);"),
            ("901_broken", "CREATE TABLE half (id INTEGER); CREATE TABLE broken (;"),
        ];

        let err = apply(&conn, &list).unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { ref name, .. } if name == "901_broken"));

        let half: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(half, 0);
        assert_eq!(recorded(&conn), 1);
    }
}
