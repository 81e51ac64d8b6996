//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;
use crate::physical::IsolationLevel;

/// Configuration for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of checked-out connections (local and transaction-bound
    /// together). `0` disables pooling: every check-in physically closes.
    pub max_pool_size: u32,

    /// Idle connections eviction will not go below.
    pub min_pool_size: u32,

    /// How long a checkout waits for capacity. `None` waits indefinitely,
    /// `Some(Duration::ZERO)` fails immediately.
    pub max_wait: Option<Duration>,

    /// Idle time before a pooled connection is evicted.
    pub timeout: Duration,

    /// Reject checkouts made outside a global transaction.
    pub suppress_local_tx: bool,

    /// Read-only flag applied to every checked-out connection.
    pub read_only: bool,

    /// Isolation level applied to every checked-out connection; `None` keeps
    /// the driver default.
    pub transaction_isolation: Option<IsolationLevel>,

    /// Statement used to validate pooled connections before reuse.
    pub validation_query: Option<String>,

    /// Pooled connections younger than this are reused without validation.
    pub validation_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 10,
            min_pool_size: 0,
            max_wait: None,
            timeout: Duration::from_secs(600),
            suppress_local_tx: false,
            read_only: false,
            transaction_isolation: None,
            validation_query: None,
            validation_interval: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;key=value` property string.
    ///
    /// Recognized keys (case-insensitive): `maxPoolSize`, `minPoolSize`,
    /// `maxWait` (ms), `timeout` (s), `suppressLocalTx`, `allowLocalTx`,
    /// `readOnly`, `transactionIsolationLevel`, `validationQuery`,
    /// `validationInterval` (ms).
    ///
    /// ```text
    /// maxPoolSize=20;minPoolSize=2;maxWait=5000;validationQuery=SELECT 1;
    /// ```
    pub fn from_properties(properties: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in properties.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "maxpoolsize" => {
                    config.max_pool_size = u32::try_from(parse_i64(&key, value)?.max(0))
                        .map_err(|_| PoolError::Config(format!("maxPoolSize out of range: {value}")))?;
                }
                "minpoolsize" => {
                    config.min_pool_size = u32::try_from(parse_i64(&key, value)?.max(0))
                        .map_err(|_| PoolError::Config(format!("minPoolSize out of range: {value}")))?;
                }
                "maxwait" => {
                    let millis = parse_i64(&key, value)?;
                    config.max_wait = u64::try_from(millis).ok().map(Duration::from_millis);
                }
                "timeout" => {
                    let secs = u64::try_from(parse_i64(&key, value)?)
                        .map_err(|_| PoolError::Config(format!("invalid timeout: {value}")))?;
                    config.timeout = Duration::from_secs(secs);
                }
                "suppresslocaltx" => config.suppress_local_tx = parse_bool(value),
                "allowlocaltx" => config.suppress_local_tx = !parse_bool(value),
                "readonly" => config.read_only = parse_bool(value),
                "transactionisolationlevel" => {
                    config.transaction_isolation = if value.is_empty() || value == "-1" {
                        None
                    } else {
                        Some(value.parse().map_err(PoolError::Config)?)
                    };
                }
                "validationquery" => {
                    config.validation_query = (!value.is_empty()).then(|| value.to_string());
                }
                "validationinterval" => {
                    let millis = u64::try_from(parse_i64(&key, value)?).map_err(|_| {
                        PoolError::Config(format!("invalid validationInterval: {value}"))
                    })?;
                    config.validation_interval = Duration::from_millis(millis);
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = key, value = value, "ignoring unknown pool option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_pool_size > 0 && self.min_pool_size > self.max_pool_size {
            return Err(PoolError::Config(format!(
                "minPoolSize ({}) exceeds maxPoolSize ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        if self.validation_query.as_deref().is_some_and(str::is_empty) {
            return Err(PoolError::Config(
                "validation query must not be empty; use None to disable validation".into(),
            ));
        }
        Ok(())
    }

    /// Whether connections are recycled through the free list.
    #[must_use]
    pub fn pooling_enabled(&self) -> bool {
        self.max_pool_size > 0
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the eviction floor.
    #[must_use]
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the checkout wait budget (`None` = unlimited).
    #[must_use]
    pub fn max_wait(mut self, wait: Option<Duration>) -> Self {
        self.max_wait = wait;
        self
    }

    /// Set the idle eviction timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reject checkouts outside a global transaction.
    #[must_use]
    pub fn suppress_local_tx(mut self, suppress: bool) -> Self {
        self.suppress_local_tx = suppress;
        self
    }

    /// Apply a read-only flag on checkout.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Apply an isolation level on checkout.
    #[must_use]
    pub fn transaction_isolation(mut self, level: Option<IsolationLevel>) -> Self {
        self.transaction_isolation = level;
        self
    }

    /// Validate pooled connections with this statement before reuse.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.validation_query = (!query.is_empty()).then_some(query);
        self
    }

    /// Set the freshness window that skips validation.
    #[must_use]
    pub fn validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }
}

fn parse_i64(key: &str, value: &str) -> Result<i64, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.min_pool_size, 0);
        assert_eq!(config.max_wait, None);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert!(config.pooling_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_properties_parsing() {
        let config = PoolConfig::from_properties(
            "maxPoolSize=20; minPoolSize=2; maxWait=1500; timeout=30; readOnly=true; \
             transactionIsolationLevel=SERIALIZABLE; validationQuery=SELECT 1; \
             validationInterval=250",
        )
        .unwrap();

        assert_eq!(config.max_pool_size, 20);
        assert_eq!(config.min_pool_size, 2);
        assert_eq!(config.max_wait, Some(Duration::from_millis(1500)));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.read_only);
        assert_eq!(
            config.transaction_isolation,
            Some(IsolationLevel::Serializable)
        );
        assert_eq!(config.validation_query.as_deref(), Some("SELECT 1"));
        assert_eq!(config.validation_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_properties_sentinels() {
        let config = PoolConfig::from_properties(
            "maxPoolSize=-1;maxWait=-1;transactionIsolationLevel=-1;validationQuery=",
        )
        .unwrap();

        assert_eq!(config.max_pool_size, 0);
        assert!(!config.pooling_enabled());
        assert_eq!(config.max_wait, None);
        assert_eq!(config.transaction_isolation, None);
        assert_eq!(config.validation_query, None);

        let config = PoolConfig::from_properties("maxWait=0").unwrap();
        assert_eq!(config.max_wait, Some(Duration::ZERO));
    }

    #[test]
    fn test_properties_local_tx_flags() {
        assert!(
            PoolConfig::from_properties("allowLocalTx=false")
                .unwrap()
                .suppress_local_tx
        );
        assert!(
            PoolConfig::from_properties("suppressLocalTx=yes")
                .unwrap()
                .suppress_local_tx
        );
    }

    #[test]
    fn test_properties_errors() {
        assert!(PoolConfig::from_properties("maxPoolSize").is_err());
        assert!(PoolConfig::from_properties("maxPoolSize=ten").is_err());
        assert!(PoolConfig::from_properties("timeout=-5").is_err());
        assert!(PoolConfig::from_properties("transactionIsolationLevel=chaos").is_err());
        assert!(PoolConfig::from_properties("maxPoolSize=2;minPoolSize=3").is_err());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = PoolConfig::from_properties("maxPoolSize=3;flavor=vanilla").unwrap();
        assert_eq!(config.max_pool_size, 3);
    }

    #[test]
    fn test_min_may_exceed_max_when_pooling_disabled() {
        let config = PoolConfig::new().max_pool_size(0).min_pool_size(5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fluent() {
        let config = PoolConfig::new()
            .max_pool_size(1)
            .max_wait(Some(Duration::ZERO))
            .validation_query("")
            .suppress_local_tx(true);
        assert_eq!(config.max_pool_size, 1);
        assert_eq!(config.max_wait, Some(Duration::ZERO));
        assert_eq!(config.validation_query, None);
        assert!(config.suppress_local_tx);
    }
}
