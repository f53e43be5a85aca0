//! Worker and pool configuration.
//!
//! Both types are plain serde structs so any front-end can load them; the
//! builder setters mirror the field names.

use std::time::Duration;

use pgmux_core::{Error, QueryTransaction, Result, Statement};
use serde::{Deserialize, Serialize};

/// Role of a connection pool within a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRole {
    /// Read/write pool, preferred for dispatch
    Primary,
    /// Failover / read replica pool
    Secondary,
}

impl PoolRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            PoolRole::Primary => "primary",
            PoolRole::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 5432)
    pub port: u16,
    /// Database name
    pub database: String,
    pub user: String,
    pub password: String,
    /// Number of connections, fixed for the pool's lifetime
    pub pool_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            pool_size: 1,
        }
    }
}

impl PoolConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>, pool_size: usize) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            pool_size,
            ..Default::default()
        }
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Connection string handed to the driver.
    pub fn conninfo(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.database, self.user, self.password
        )
    }

    /// Password-free identification used in logs.
    pub fn log_info(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// A statement prepared on every connection after it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedStatementConfig {
    pub name: String,
    pub query: String,
    /// Parameter type names; empty lets the server infer them
    #[serde(default)]
    pub param_types: Vec<String>,
}

impl PreparedStatementConfig {
    pub fn new(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            param_types: Vec::new(),
        }
    }

    pub fn param_types(mut self, types: Vec<String>) -> Self {
        self.param_types = types;
        self
    }
}

/// Worker tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Retry primary failures on the secondary pool
    pub failover_to_secondary: bool,
    /// Retry failed transactions
    pub retry_enabled: bool,
    /// Run connections in pipeline mode
    pub pipelining_enabled: bool,
    /// Time a dispatched transaction may run before it is cancelled
    pub transaction_wait_timeout_ms: u64,
    /// Minimum delay before a failed transaction is retried
    pub retry_interval_ms: u64,
    /// Delay before a failed connection is reconnected
    pub reconnect_interval_ms: u64,
    /// Maximum statements merged into one dispatch
    pub batch_size: usize,
    /// Maximum time a partial batch waits for more work
    pub batch_timeout_ms: u64,
    /// Maximum queued statements, 0 for unbounded
    pub queue_capacity: usize,
    pub search_paths: Vec<String>,
    /// Error codes that force a reconnect; empty means every error does
    pub reconnect_trigger_errors: Vec<String>,
    pub prepared_statements: Vec<PreparedStatementConfig>,
    /// Statements run on every connection after it connects
    pub init_queries: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            failover_to_secondary: false,
            retry_enabled: false,
            pipelining_enabled: false,
            transaction_wait_timeout_ms: 5_000,
            retry_interval_ms: 10_000,
            reconnect_interval_ms: 3_000,
            batch_size: 1,
            batch_timeout_ms: 100,
            queue_capacity: 0,
            search_paths: Vec::new(),
            reconnect_trigger_errors: Vec::new(),
            prepared_statements: Vec::new(),
            init_queries: Vec::new(),
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable failover to the secondary pool.
    pub fn failover_to_secondary(mut self, enabled: bool) -> Self {
        self.failover_to_secondary = enabled;
        self
    }

    /// Enable/disable retries.
    pub fn retry_enabled(mut self, enabled: bool) -> Self {
        self.retry_enabled = enabled;
        self
    }

    /// Enable/disable pipelining.
    pub fn pipelining_enabled(mut self, enabled: bool) -> Self {
        self.pipelining_enabled = enabled;
        self
    }

    /// Set the transaction wait timeout.
    pub fn transaction_wait_timeout(mut self, ms: u64) -> Self {
        self.transaction_wait_timeout_ms = ms;
        self
    }

    /// Set the retry interval.
    pub fn retry_interval(mut self, ms: u64) -> Self {
        self.retry_interval_ms = ms;
        self
    }

    /// Set the reconnect interval.
    pub fn reconnect_interval(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    /// Set the batch size.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Set the batch timeout.
    pub fn batch_timeout(mut self, ms: u64) -> Self {
        self.batch_timeout_ms = ms;
        self
    }

    /// Set the queue capacity.
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn search_paths(mut self, paths: Vec<String>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn reconnect_trigger_errors(mut self, codes: Vec<String>) -> Self {
        self.reconnect_trigger_errors = codes;
        self
    }

    pub fn prepared_statement(mut self, prepared: PreparedStatementConfig) -> Self {
        self.prepared_statements.push(prepared);
        self
    }

    pub fn init_query(mut self, sql: impl Into<String>) -> Self {
        self.init_queries.push(sql.into());
        self
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_wait_timeout_ms)
    }

    pub fn retry_interval_duration(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn batch_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Is any error-recovery policy active?
    pub fn recovers_errors(&self) -> bool {
        self.retry_enabled || self.failover_to_secondary
    }

    /// Does `code` force a reconnect of the connection that reported it?
    pub fn triggers_reconnect(&self, code: &str) -> bool {
        self.reconnect_trigger_errors.is_empty()
            || self.reconnect_trigger_errors.iter().any(|c| c == code)
    }

    /// Check tunables for values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be at least 1"));
        }
        if self.transaction_wait_timeout_ms == 0 {
            return Err(Error::config("transaction_wait_timeout_ms must be positive"));
        }
        if let Some(p) = self.prepared_statements.iter().find(|p| p.name.is_empty()) {
            return Err(Error::config(format!(
                "prepared statement without a name: {}",
                p.query
            )));
        }
        Ok(())
    }

    /// Statements every connection runs once after connecting: prepared
    /// statements, the search path, then init queries. `None` when empty.
    pub fn admin_transaction(&self) -> Option<QueryTransaction> {
        let mut tx = QueryTransaction::plain();
        for prepared in &self.prepared_statements {
            tx.push(Statement::Prepare {
                name: prepared.name.clone(),
                sql: prepared.query.clone(),
                param_types: prepared.param_types.clone(),
            });
        }
        if !self.search_paths.is_empty() {
            tx.push(Statement::sql(format!(
                "SET search_path TO {}",
                self.search_paths.join(",")
            )));
        }
        for sql in &self.init_queries {
            tx.push(Statement::sql(sql.clone()));
        }
        if tx.is_empty() { None } else { Some(tx) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgmux_core::Transaction;

    #[test]
    fn test_pool_config_strings() {
        let config = PoolConfig::new("db1", "billing", 4)
            .port(5433)
            .user("app")
            .password("secret");

        assert_eq!(
            config.conninfo(),
            "host=db1 port=5433 dbname=billing user=app password=secret"
        );
        assert_eq!(config.log_info(), "db1:5433/billing");
        assert!(!config.log_info().contains("secret"));
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::new()
            .retry_enabled(true)
            .failover_to_secondary(true)
            .batch_size(5)
            .batch_timeout(100)
            .queue_capacity(50);

        assert!(config.recovers_errors());
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.batch_timeout_duration(), Duration::from_millis(100));
        assert_eq!(config.queue_capacity, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        assert!(WorkerConfig::new().batch_size(0).validate().is_err());
        assert!(
            WorkerConfig::new()
                .transaction_wait_timeout(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_reconnect_triggers() {
        let any = WorkerConfig::new();
        assert!(any.triggers_reconnect("23505"));

        let listed = WorkerConfig::new().reconnect_trigger_errors(vec!["57P01".into()]);
        assert!(listed.triggers_reconnect("57P01"));
        assert!(!listed.triggers_reconnect("23505"));
    }

    #[test]
    fn test_admin_transaction_order() {
        assert!(WorkerConfig::new().admin_transaction().is_none());

        let config = WorkerConfig::new()
            .prepared_statement(PreparedStatementConfig::new("get_user", "SELECT * FROM users WHERE id = $1"))
            .search_paths(vec!["billing".into(), "public".into()])
            .init_query("SET statement_timeout = 1000");

        let tx = config.admin_transaction().expect("admin set");
        assert_eq!(tx.size(), 3);
        assert!(matches!(tx.statements()[0], Statement::Prepare { .. }));
        assert_eq!(tx.statements()[1].text(), "SET search_path TO billing,public");
        assert_eq!(tx.statements()[2].text(), "SET statement_timeout = 1000");
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"retry_enabled": true, "batch_size": 3}"#).unwrap();
        assert!(config.retry_enabled);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.transaction_wait_timeout_ms, 5_000);
    }
}
