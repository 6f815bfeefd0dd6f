use std::collections::HashSet;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{ReelError, Result, is_interrupted};
use super::schema::{self, Migration};

pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30);

// VM instructions between deadline checks.
const PROGRESS_STEPS: i32 = 1_000;

const RECORD_MIGRATION: &str = "INSERT INTO migrations (name) VALUES (?1)";

const SELECT_APPLIED: &str = "SELECT name FROM migrations";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct Migrator {
    units: &'static [Migration],
    unit_timeout: Duration,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::with_units(schema::MIGRATIONS)
    }

    pub fn with_units(units: &'static [Migration]) -> Self {
        Self {
            units,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }

    pub fn unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn run(&self, conn: &mut Connection) -> Result<MigrationReport> {
        conn.execute_batch(schema::CREATE_MIGRATIONS_TABLE)
            .map_err(|e| failed("migrations", schema::CREATE_MIGRATIONS_TABLE, e.to_string()))?;

        let applied = applied_names(conn)
            .map_err(|e| failed("migrations", SELECT_APPLIED, e.to_string()))?;
        let mut report = MigrationReport::default();

        for unit in self.units {
            if applied.contains(unit.name) {
                debug!(migration = unit.name, "already applied");
                continue;
            }
            info!(migration = unit.name, "applying migration");
            self.apply(conn, unit)?;
            report.applied.push(unit.name);
        }

        Ok(report)
    }

    fn apply(&self, conn: &mut Connection, unit: &Migration) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.unit_timeout;

        let tx = conn
            .transaction()
            .map_err(|e| failed(unit.name, "BEGIN", e.to_string()))?;
        tx.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= deadline));

        let mut failure = None;
        for statement in unit.statements {
            if let Err(e) = tx.execute_batch(statement) {
                failure = Some((*statement, e));
                break;
            }
        }
        if failure.is_none() {
            if let Err(e) = tx.execute(RECORD_MIGRATION, [unit.name]) {
                failure = Some((RECORD_MIGRATION, e));
            }
        }

        // The rollback on drop must not be interrupted by the same deadline.
        tx.progress_handler(0, None::<fn() -> bool>);

        match failure {
            None => {
                tx.commit()
                    .map_err(|e| failed(unit.name, "COMMIT", e.to_string()))?;
                info!(
                    migration = unit.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "migration applied"
                );
                Ok(())
            }
            Some((statement, e)) => {
                drop(tx);
                let reason = if is_interrupted(&e) {
                    format!("timed out after {:?}", self.unit_timeout)
                } else {
                    e.to_string()
                };
                Err(failed(unit.name, statement, reason))
            }
        }
    }
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(SELECT_APPLIED)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(names)
}

fn failed(name: &str, statement: &str, reason: String) -> ReelError {
    ReelError::MigrationFailed {
        name: name.to_string(),
        statement: statement.trim().to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    fn recorded(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("SELECT name FROM migrations ORDER BY id").unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_run_on_empty_schema_creates_tables() {
        let mut conn = fresh();
        let report = Migrator::new().run(&mut conn).unwrap();
        assert_eq!(report.applied, vec!["01_create_tables", "02_create_indexes"]);
        for table in ["videos", "tags", "video_tags", "sent_videos", "migrations"] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
        assert_eq!(recorded(&conn), vec!["01_create_tables", "02_create_indexes"]);
    }

    #[test]
    fn test_second_run_is_noop() {
        let mut conn = fresh();
        Migrator::new().run(&mut conn).unwrap();
        let before: i64 = conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))
            .unwrap();

        let report = Migrator::new().run(&mut conn).unwrap();
        assert!(report.is_noop());

        let after: i64 = conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))
            .unwrap();
        assert_eq!(before, after);
        assert_eq!(recorded(&conn).len(), schema::MIGRATIONS.len());
    }

    #[test]
    fn test_recorded_units_are_never_reapplied() {
        let mut conn = fresh();
        conn.execute_batch(schema::CREATE_MIGRATIONS_TABLE).unwrap();
        for unit in schema::MIGRATIONS {
            conn.execute(RECORD_MIGRATION, [unit.name]).unwrap();
        }

        let report = Migrator::new().run(&mut conn).unwrap();
        assert!(report.is_noop());
        assert!(!table_exists(&conn, "videos"));
    }

    #[test]
    fn test_unreadable_bookkeeping_is_fatal() {
        let mut conn = fresh();
        conn.execute_batch("CREATE TABLE migrations (id INTEGER PRIMARY KEY)").unwrap();

        let err = Migrator::new().run(&mut conn).unwrap_err();
        assert!(!err.is_recoverable());
        match err {
            ReelError::MigrationFailed { name, statement, .. } => {
                assert_eq!(name, "migrations");
                assert_eq!(statement, SELECT_APPLIED);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!table_exists(&conn, "videos"));
    }

    static BROKEN: &[Migration] = &[
        Migration {
            name: "01_ok",
            statements: &["CREATE TABLE IF NOT EXISTS first (x INTEGER)"],
        },
        Migration {
            name: "02_broken",
            statements: &[
                "CREATE TABLE IF NOT EXISTS half_done (x INTEGER)",
                "CREATE TABLEX nonsense",
            ],
        },
        Migration {
            name: "03_never",
            statements: &["CREATE TABLE IF NOT EXISTS never (x INTEGER)"],
        },
    ];

    #[test]
    fn test_failed_unit_rolls_back_and_stops() {
        let mut conn = fresh();
        let err = Migrator::with_units(BROKEN).run(&mut conn).unwrap_err();
        match err {
            ReelError::MigrationFailed { name, statement, .. } => {
                assert_eq!(name, "02_broken");
                assert_eq!(statement, "CREATE TABLEX nonsense");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(table_exists(&conn, "first"));
        assert!(!table_exists(&conn, "half_done"));
        assert!(!table_exists(&conn, "never"));
        assert_eq!(recorded(&conn), vec!["01_ok"]);
    }

    static SLOW: &[Migration] = &[Migration {
        name: "01_slow",
        statements: &["CREATE TABLE slow AS
            WITH RECURSIVE counter(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM counter WHERE x < 100000000)
            SELECT x FROM counter"],
    }];

    #[test]
    fn test_unit_timeout_fails_the_unit() {
        let mut conn = fresh();
        let err = Migrator::with_units(SLOW)
            .unit_timeout(Duration::from_millis(20))
            .run(&mut conn)
            .unwrap_err();
        match err {
            ReelError::MigrationFailed { name, reason, .. } => {
                assert_eq!(name, "01_slow");
                assert!(reason.contains("timed out"), "reason was {reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!table_exists(&conn, "slow"));
        assert!(recorded(&conn).is_empty());
    }

    #[test]
    fn test_handler_cleared_after_unit() {
        let mut conn = fresh();
        Migrator::new()
            .unit_timeout(Duration::from_millis(50))
            .run(&mut conn)
            .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let count: i64 = conn
            .query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000)
                 SELECT COUNT(*) FROM c",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 50000);
    }
}
