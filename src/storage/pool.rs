use std::ops::{Deref, DerefMut};
use std::thread;
use std::time::{Duration, Instant};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::config::{DbLocation, StoreConfig};
use crate::errors::Result;
use super::migrate::Migrator;
use super::sqlite::SqliteStorage;

pub type SqlitePool = Pool<SqliteConnectionManager>;

const PROGRESS_STEPS: i32 = 1_000;

// Deadline is disarmed when the connection goes back to the pool.
pub struct StoreConn {
    inner: PooledConnection<SqliteConnectionManager>,
    armed: bool,
}

impl StoreConn {
    pub(crate) fn checkout(pool: &SqlitePool, deadline: Option<Duration>) -> Result<Self> {
        let inner = pool.get()?;
        let armed = match deadline {
            Some(limit) => {
                let until = Instant::now() + limit;
                inner.progress_handler(PROGRESS_STEPS, Some(move || Instant::now() >= until));
                true
            }
            None => false,
        };
        Ok(Self { inner, armed })
    }
}

impl Deref for StoreConn {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.inner
    }
}

impl DerefMut for StoreConn {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.inner
    }
}

impl Drop for StoreConn {
    fn drop(&mut self) {
        if self.armed {
            self.inner.progress_handler(0, None::<fn() -> bool>);
        }
    }
}

fn manager(config: &StoreConfig) -> SqliteConnectionManager {
    let busy = config.busy_timeout;
    let wal = matches!(config.location, DbLocation::File(_));
    let base = match &config.location {
        DbLocation::File(path) => SqliteConnectionManager::file(path),
        DbLocation::Memory => SqliteConnectionManager::memory(),
    };
    base.with_init(move |conn| {
        conn.busy_timeout(busy)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        if wal {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        }
        Ok(())
    })
}

fn build_pool(config: &StoreConfig) -> Result<SqlitePool> {
    let builder = SqlitePool::builder().connection_timeout(config.connect_timeout);
    let builder = match config.location {
        // Every `:memory:` connection is its own database, so keep exactly one
        // alive for the lifetime of the pool.
        DbLocation::Memory => builder
            .max_size(1)
            .min_idle(Some(1))
            .max_lifetime(None)
            .idle_timeout(None),
        DbLocation::File(_) => builder
            .max_size(config.pool.max_open)
            .min_idle(Some(config.pool.min_idle.min(config.pool.max_open)))
            .max_lifetime(Some(config.pool.max_lifetime)),
    };
    let pool = builder.build(manager(config))?;
    pool.get()?.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(pool)
}

pub fn connect(config: &StoreConfig) -> Result<SqlitePool> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match build_pool(config) {
            Ok(pool) => {
                info!(location = %config.location, "connected to store");
                return Ok(pool);
            }
            Err(e) if attempt < attempts => {
                warn!(attempt, attempts, error = %e, "store connection failed, retrying");
                thread::sleep(config.retry_delay);
                attempt += 1;
            }
            Err(e) => {
                warn!(attempts, error = %e, "giving up on store connection");
                return Err(e);
            }
        }
    }
}

pub fn open(config: &StoreConfig) -> Result<SqliteStorage> {
    let pool = connect(config)?;
    {
        let mut conn = pool.get()?;
        let report = Migrator::new()
            .unit_timeout(config.migration_timeout)
            .run(&mut conn)?;
        if report.is_noop() {
            info!("schema is up to date");
        } else {
            info!(applied = report.applied.len(), "schema migrated");
        }
    }
    Ok(SqliteStorage::new(pool, config))
}
