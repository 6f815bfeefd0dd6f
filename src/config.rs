use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{ReelError, Result};
use crate::storage::migrate::DEFAULT_UNIT_TIMEOUT;
use crate::storage::models::RandomSelection;

pub struct AppPaths {
    pub base_dir: PathBuf,
    pub db_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ReelError::InvalidInput("could not determine home directory".to_string())
        })?;
        Ok(Self::from_base(home.join(".reelkeep")))
    }

    pub fn from_base(base: PathBuf) -> Self {
        Self {
            db_path: base.join("reelkeep.db"),
            base_dir: base,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

impl fmt::Display for DbLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbLocation::File(path) => write!(f, "{}", path.display()),
            DbLocation::Memory => f.write_str(":memory:"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_open: u32,
    pub min_idle: u32,
    pub max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 10,
            min_idle: 5,
            max_lifetime: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: DbLocation,
    pub pool: PoolSettings,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub busy_timeout: Duration,
    pub statement_timeout: Option<Duration>,
    pub migration_timeout: Duration,
    pub selection: RandomSelection,
}

impl StoreConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            pool: PoolSettings::default(),
            connect_attempts: 3,
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            busy_timeout: Duration::from_secs(5),
            statement_timeout: None,
            migration_timeout: DEFAULT_UNIT_TIMEOUT,
            selection: RandomSelection::default(),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            ..Self::file(PathBuf::new())
        }
    }

    pub fn from_env(default_path: PathBuf) -> Result<Self> {
        Self::from_lookup(default_path, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(default_path: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let location = match lookup("REEL_DB_PATH") {
            Some(p) if p == ":memory:" => DbLocation::Memory,
            Some(p) if !p.trim().is_empty() => DbLocation::File(PathBuf::from(p)),
            _ => DbLocation::File(default_path),
        };
        let mut config = Self {
            location,
            ..Self::in_memory()
        };

        if let Some(v) = parse_var(&lookup, "REEL_DB_MAX_CONNECTIONS")? {
            config.pool.max_open = v;
        }
        if let Some(v) = parse_var(&lookup, "REEL_DB_MIN_IDLE")? {
            config.pool.min_idle = v;
        }
        if let Some(v) = parse_var(&lookup, "REEL_DB_MAX_LIFETIME_SECS")? {
            config.pool.max_lifetime = Duration::from_secs(v);
        }
        if let Some(v) = parse_var(&lookup, "REEL_DB_CONNECT_ATTEMPTS")? {
            config.connect_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "REEL_DB_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "REEL_DB_STATEMENT_TIMEOUT_MS")? {
            config.statement_timeout = (v > 0).then(|| Duration::from_millis(v));
        }
        if let Some(raw) = lookup("REEL_RANDOM_SELECTION") {
            config.selection = RandomSelection::parse(&raw).ok_or_else(|| {
                ReelError::InvalidInput(format!(
                    "REEL_RANDOM_SELECTION must be `store` or `client`, got {raw:?}"
                ))
            })?;
        }

        if config.pool.max_open == 0 {
            return Err(ReelError::InvalidInput(
                "REEL_DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ReelError::InvalidInput(format!("{key} is not a valid number: {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_from_base() {
        let paths = AppPaths::from_base(PathBuf::from("/tmp/test-reel"));
        assert_eq!(paths.base_dir, PathBuf::from("/tmp/test-reel"));
        assert_eq!(paths.db_path, PathBuf::from("/tmp/test-reel/reelkeep.db"));
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::file("/tmp/reel.db");
        assert_eq!(config.pool.max_open, 10);
        assert_eq!(config.pool.min_idle, 5);
        assert_eq!(config.pool.max_lifetime, Duration::from_secs(300));
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.migration_timeout, Duration::from_secs(30));
        assert_eq!(config.selection, RandomSelection::Store);
        assert!(config.statement_timeout.is_none());
    }

    #[test]
    fn test_env_without_overrides_uses_default_path() {
        let config = StoreConfig::from_lookup(PathBuf::from("/data/reel.db"), lookup(&[])).unwrap();
        assert_eq!(config.location, DbLocation::File(PathBuf::from("/data/reel.db")));
        assert_eq!(config.pool, PoolSettings::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = StoreConfig::from_lookup(
            PathBuf::from("/data/reel.db"),
            lookup(&[
                ("REEL_DB_PATH", "/srv/videos.db"),
                ("REEL_DB_MAX_CONNECTIONS", "4"),
                ("REEL_DB_MIN_IDLE", "2"),
                ("REEL_DB_MAX_LIFETIME_SECS", "60"),
                ("REEL_DB_STATEMENT_TIMEOUT_MS", "1500"),
                ("REEL_RANDOM_SELECTION", "client"),
            ]),
        )
        .unwrap();
        assert_eq!(config.location, DbLocation::File(PathBuf::from("/srv/videos.db")));
        assert_eq!(config.pool.max_open, 4);
        assert_eq!(config.pool.min_idle, 2);
        assert_eq!(config.pool.max_lifetime, Duration::from_secs(60));
        assert_eq!(config.statement_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.selection, RandomSelection::Client);
    }

    #[test]
    fn test_env_memory_location() {
        let config = StoreConfig::from_lookup(
            PathBuf::from("/data/reel.db"),
            lookup(&[("REEL_DB_PATH", ":memory:")]),
        )
        .unwrap();
        assert_eq!(config.location, DbLocation::Memory);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let err = StoreConfig::from_lookup(
            PathBuf::from("/data/reel.db"),
            lookup(&[("REEL_DB_MAX_CONNECTIONS", "lots")]),
        )
        .unwrap_err();
        assert!(matches!(err, ReelError::InvalidInput(_)));

        let err = StoreConfig::from_lookup(
            PathBuf::from("/data/reel.db"),
            lookup(&[("REEL_RANDOM_SELECTION", "dice")]),
        )
        .unwrap_err();
        assert!(matches!(err, ReelError::InvalidInput(_)));
    }

    #[test]
    fn test_zero_statement_timeout_disables_deadline() {
        let config = StoreConfig::from_lookup(
            PathBuf::from("/data/reel.db"),
            lookup(&[("REEL_DB_STATEMENT_TIMEOUT_MS", "0")]),
        )
        .unwrap();
        assert!(config.statement_timeout.is_none());
    }
}
