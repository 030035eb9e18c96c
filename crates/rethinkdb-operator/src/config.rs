use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {var}: expected a number of seconds")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

/// Operator settings read from the environment.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Only watch this namespace; all namespaces when unset
    pub namespace: Option<String>,
    /// Server image repository, the cluster version is used as tag
    pub image: String,
    /// Image of the init container that writes the server configuration
    pub init_image: String,
    pub cluster_domain: String,
    pub resync: Duration,
    pub error_backoff: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            image: "rethinkdb".into(),
            init_image: "busybox:latest".into(),
            cluster_domain: "cluster.local".into(),
            resync: Duration::from_secs(300),
            error_backoff: Duration::from_secs(30),
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let seconds = |var: &'static str, default: Duration| match non_empty(var) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError { var, value: v }),
            None => Ok(default),
        };
        Ok(Self {
            namespace: non_empty("WATCH_NAMESPACE"),
            image: non_empty("RETHINKDB_IMAGE").unwrap_or(defaults.image),
            init_image: non_empty("RETHINKDB_INIT_IMAGE").unwrap_or(defaults.init_image),
            cluster_domain: non_empty("CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
            resync: seconds("RESYNC_SECONDS", defaults.resync)?,
            error_backoff: seconds("ERROR_REQUEUE_SECONDS", defaults.error_backoff)?,
        })
    }
}
