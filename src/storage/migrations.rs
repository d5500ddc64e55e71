//! Database migrations embedded at compile time.
//!
//! Each migration adds columns the client started writing after the base
//! schema shipped. A database opened with a migration limit lags the
//! client, which the schema-adaptive writer has to tolerate.

use rusqlite::{Connection, Result};
use tracing::{info, warn};

/// A single migration with version identifier and SQL content.
struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// All migrations in order.
///
/// The `schema_migrations` table tracks which have been applied.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_add_predicted_grade",
        sql: "ALTER TABLE students ADD COLUMN predicted_grade TEXT;",
    },
    Migration {
        version: "002_add_verification_requests",
        sql: "ALTER TABLE submissions ADD COLUMN verification_requested INTEGER NOT NULL DEFAULT 0;
              ALTER TABLE submissions ADD COLUMN verification_requested_at INTEGER;",
    },
    Migration {
        version: "003_add_internal_verification",
        sql: "ALTER TABLE submissions ADD COLUMN iv_status TEXT;
              ALTER TABLE submissions ADD COLUMN iv_feedback TEXT;",
    },
];

/// Number of known migrations.
#[must_use]
pub const fn migration_count() -> usize {
    MIGRATIONS.len()
}

/// Run pending migrations, the first `limit` of them when given.
///
/// Already-applied migrations are skipped. This is idempotent and safe
/// to call on every database open.
///
/// # Errors
///
/// Returns an error if a migration fails to apply. Duplicate-column
/// errors are logged and the migration is marked complete.
pub fn run_migrations(conn: &Connection, limit: Option<usize>) -> Result<()> {
    let applied: std::collections::HashSet<String> = conn
        .prepare("SELECT version FROM schema_migrations")?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let limit = limit.unwrap_or(MIGRATIONS.len());
    for migration in MIGRATIONS.iter().take(limit) {
        if applied.contains(migration.version) {
            continue;
        }

        info!(version = migration.version, "Applying migration");

        if let Err(e) = conn.execute_batch(migration.sql) {
            if e.to_string().contains("duplicate column name") {
                warn!(
                    version = migration.version,
                    "Migration partially applied (columns exist), marking complete"
                );
            } else {
                return Err(e);
            }
        }

        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().timestamp_millis()],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{SCHEMA_SQL, column_exists};

    fn setup_db(conn: &Connection) {
        conn.execute_batch(SCHEMA_SQL).expect("Base schema should apply");
    }

    fn applied_count(conn: &Connection) -> i32 {
        conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_run_migrations_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);
        run_migrations(&conn, None).expect("Migrations should apply to fresh database");
        assert_eq!(applied_count(&conn), 3);
        assert!(column_exists(&conn, "submissions", "iv_status").unwrap());
    }

    #[test]
    fn test_run_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);
        run_migrations(&conn, None).expect("First run should succeed");
        run_migrations(&conn, None).expect("Second run should succeed (idempotent)");
        assert_eq!(applied_count(&conn), 3);
    }

    #[test]
    fn test_limit_leaves_schema_behind() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);
        run_migrations(&conn, Some(1)).unwrap();
        assert!(column_exists(&conn, "students", "predicted_grade").unwrap());
        assert!(!column_exists(&conn, "submissions", "verification_requested").unwrap());

        run_migrations(&conn, None).unwrap();
        assert!(column_exists(&conn, "submissions", "iv_feedback").unwrap());
    }
}
