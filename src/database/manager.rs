//! Connection manager for the legacy Oracle pools.
//!
//! One explicit value owned by the application root, keyed by alias. Pooled
//! registrations go through r2d2; standalone registrations open a fresh
//! connection per acquire. A connection poisoned by an execution error is
//! dropped on check-in (`has_broken`) instead of returning to the pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info, warn};

/// Error code reported when an alias is unknown or the pool cannot hand
/// out a connection. Matches the legacy bridge's catch-all code.
pub const ACQUIRE_ERROR_CODE: &str = "E9999";

/// Connection settings for one alias.
#[derive(Debug, Clone)]
pub struct OracleConnectConfig {
    pub alias: String,
    pub user: String,
    pub password: String,
    pub connect_string: String,
    /// Pooled registration when true; connect-per-acquire otherwise.
    pub pooled: bool,
    pub pool_max: u32,
    pub connect_timeout_secs: u64,
}

impl OracleConnectConfig {
    pub fn pooled(
        alias: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        connect_string: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            user: user.into(),
            password: password.into(),
            connect_string: connect_string.into(),
            pooled: true,
            pool_max: 8,
            connect_timeout_secs: 30,
        }
    }
}

/// An Oracle connection plus its poison flag.
pub struct PooledOracle {
    conn: oracle::Connection,
    poisoned: AtomicBool,
}

impl PooledOracle {
    fn connect(config: &OracleConnectConfig) -> std::result::Result<Self, oracle::Error> {
        let conn =
            oracle::Connection::connect(&config.user, &config.password, &config.connect_string)?;
        Ok(Self {
            conn,
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn raw(&self) -> &oracle::Connection {
        &self.conn
    }

    /// Mark the connection as unusable; the pool will discard it on
    /// check-in.
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }
}

/// r2d2 glue for [`PooledOracle`].
#[derive(Debug)]
pub struct OracleConnectionSource {
    config: OracleConnectConfig,
}

impl r2d2::ManageConnection for OracleConnectionSource {
    type Connection = PooledOracle;
    type Error = oracle::Error;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        PooledOracle::connect(&self.config)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.conn.ping()
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_poisoned()
    }
}

/// A connection handed out by [`ConnectionManager::acquire`]. Pooled
/// connections check back in on drop; standalone connections close on drop.
pub enum Acquired {
    Pooled(r2d2::PooledConnection<OracleConnectionSource>),
    Standalone(PooledOracle),
}

impl std::fmt::Debug for Acquired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled(_) => f.write_str("Acquired::Pooled"),
            Self::Standalone(_) => f.write_str("Acquired::Standalone"),
        }
    }
}

impl Acquired {
    pub fn oracle(&self) -> &PooledOracle {
        match self {
            Self::Pooled(conn) => conn,
            Self::Standalone(conn) => conn,
        }
    }
}

/// Alias-keyed registry of Oracle connection sources.
///
/// Lifecycle: `init(configs)` once at startup, `acquire` per statement,
/// `shutdown()` on process exit.
pub struct ConnectionManager {
    pools: HashMap<String, r2d2::Pool<OracleConnectionSource>>,
    standalone: HashMap<String, OracleConnectConfig>,
}

impl ConnectionManager {
    pub fn init(configs: Vec<OracleConnectConfig>) -> crate::error::Result<Self> {
        let mut pools = HashMap::new();
        let mut standalone = HashMap::new();

        for config in configs {
            let alias = config.alias.clone();
            if pools.contains_key(&alias) || standalone.contains_key(&alias) {
                return Err(crate::error::BridgeError::Configuration(format!(
                    "duplicated pool alias or database name '{alias}'"
                )));
            }
            if config.pooled {
                info!(alias = %alias, "initializing connection pool");
                let pool = r2d2::Pool::builder()
                    .max_size(config.pool_max)
                    .min_idle(Some(0))
                    .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
                    .build_unchecked(OracleConnectionSource { config });
                pools.insert(alias.clone(), pool);
                info!(alias = %alias, "initialized connection pool");
            } else {
                info!(alias = %alias, "registered standalone connection");
                standalone.insert(alias, config);
            }
        }

        Ok(Self { pools, standalone })
    }

    /// Hand out one connection for the alias. Acquisition failure is
    /// reported as `(error_code, message)` so executors can surface the
    /// uniform outcome without touching SQL.
    pub fn acquire(&self, alias: &str) -> std::result::Result<Acquired, (String, String)> {
        if let Some(pool) = self.pools.get(alias) {
            return pool.get().map(Acquired::Pooled).map_err(|e| {
                warn!(alias, error = %e, "connection pool acquire failed");
                (ACQUIRE_ERROR_CODE.to_string(), e.to_string())
            });
        }
        if let Some(config) = self.standalone.get(alias) {
            return PooledOracle::connect(config)
                .map(Acquired::Standalone)
                .map_err(|e| {
                    warn!(alias, error = %e, "standalone connect failed");
                    (ACQUIRE_ERROR_CODE.to_string(), e.to_string())
                });
        }
        error!(alias, "unknown pool alias");
        Err((
            ACQUIRE_ERROR_CODE.to_string(),
            "wrong poolAlias or database name, check configs".to_string(),
        ))
    }

    /// Close all pools. In-flight connections finish their statements and
    /// are dropped on check-in.
    pub fn shutdown(&self) {
        for alias in self.pools.keys() {
            info!(alias = %alias, "closing connection pool");
        }
        // r2d2 pools release their idle connections when the manager drops.
    }

    pub fn aliases(&self) -> Vec<String> {
        self.pools
            .keys()
            .chain(self.standalone.keys())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_alias_reports_uniform_code() {
        let manager = ConnectionManager::init(vec![]).unwrap();
        let err = manager.acquire("NOPE").unwrap_err();
        assert_eq!(err.0, ACQUIRE_ERROR_CODE);
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let config = OracleConnectConfig::pooled("ERP", "u", "p", "db");
        let result = ConnectionManager::init(vec![config.clone(), config]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lazy_pool_registers_alias() {
        // build_unchecked defers connecting, so registration succeeds even
        // with no reachable database.
        let manager =
            ConnectionManager::init(vec![OracleConnectConfig::pooled("ERP", "u", "p", "db")])
                .unwrap();
        assert_eq!(manager.aliases(), vec!["ERP".to_string()]);
    }
}
