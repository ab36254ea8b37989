//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the managed workloads live in (the operator's own namespace)
    pub namespace: String,
    /// Requeue interval after a successful pass (seconds)
    pub reconcile_interval_secs: u64,
    /// Fibonacci backoff starting value (milliseconds)
    /// Initial delay before retrying after an error
    pub backoff_start_ms: u64,
    /// Fibonacci backoff maximum value (milliseconds)
    /// Maximum delay between retries
    pub backoff_max_ms: u64,
    /// Overall bound on waiting for owned resources to disappear during teardown (seconds)
    pub teardown_timeout_secs: u64,
    /// Interval between owned-resource enumerations during teardown (milliseconds)
    pub teardown_poll_interval_ms: u64,
    /// Watch stream restart delay after errors or stream end (seconds)
    pub watch_restart_delay_secs: u64,
    /// Port for `/metrics`, `/healthz` and `/readyz`
    pub metrics_port: u16,
    /// Reconcile a ServiceMonitor for the operator metrics endpoint
    /// Requires the monitoring.coreos.com CRDs
    pub enable_service_monitor: bool,
    /// Optional YAML file replacing the default watched system resources
    pub watcher_config_path: Option<String>,
    /// Workload images
    pub images: ImageSet,
}

/// Container images for each workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub app_server: String,
    pub core: String,
    pub postgres: String,
    pub console: String,
}

impl Default for ImageSet {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            app_server: DEFAULT_APP_SERVER_IMAGE.to_string(),
            core: DEFAULT_CORE_IMAGE.to_string(),
            postgres: DEFAULT_POSTGRES_IMAGE.to_string(),
            console: DEFAULT_CONSOLE_IMAGE.to_string(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            teardown_timeout_secs: DEFAULT_TEARDOWN_TIMEOUT_SECS,
            teardown_poll_interval_ms: DEFAULT_TEARDOWN_POLL_INTERVAL_MS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            enable_service_monitor: false,
            watcher_config_path: None,
            images: ImageSet::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            namespace: env_var_or_default_str("POD_NAMESPACE", DEFAULT_NAMESPACE),
            reconcile_interval_secs: env_var_or_default(
                "RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            teardown_timeout_secs: env_var_or_default(
                "TEARDOWN_TIMEOUT_SECS",
                DEFAULT_TEARDOWN_TIMEOUT_SECS,
            ),
            teardown_poll_interval_ms: env_var_or_default(
                "TEARDOWN_POLL_INTERVAL_MS",
                DEFAULT_TEARDOWN_POLL_INTERVAL_MS,
            ),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            enable_service_monitor: env_var_or_default_bool("ENABLE_SERVICE_MONITOR", false),
            watcher_config_path: std::env::var("WATCHER_CONFIG_PATH")
                .ok()
                .filter(|p| !p.is_empty()),
            images: ImageSet {
                app_server: env_var_or_default_str("APP_SERVER_IMAGE", DEFAULT_APP_SERVER_IMAGE),
                core: env_var_or_default_str("CORE_IMAGE", DEFAULT_CORE_IMAGE),
                postgres: env_var_or_default_str("POSTGRES_IMAGE", DEFAULT_POSTGRES_IMAGE),
                console: env_var_or_default_str("CONSOLE_IMAGE", DEFAULT_CONSOLE_IMAGE),
            },
        }
    }

    /// Get requeue duration after a successful pass
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get teardown timeout duration
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }

    /// Get teardown poll interval duration
    pub fn teardown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.teardown_poll_interval_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.namespace, "octopilot-assistant");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(600));
        assert_eq!(config.teardown_timeout(), Duration::from_secs(180));
        assert_eq!(config.teardown_poll_interval(), Duration::from_secs(5));
        assert!(!config.enable_service_monitor);
        assert!(config.watcher_config_path.is_none());
    }

    #[test]
    fn test_parse_bool_variants() {
        for truthy in ["true", "TRUE", "1", "yes", "On"] {
            assert!(parse_bool(truthy), "{truthy} should parse as true");
        }
        for falsy in ["false", "0", "no", "", "enabled"] {
            assert!(!parse_bool(falsy), "{falsy} should parse as false");
        }
    }

    #[test]
    fn test_unparseable_number_falls_back_to_default() {
        // Unique key so parallel tests never observe it
        std::env::set_var("ASSISTANT_OPERATOR_TEST_BAD_NUMBER", "ten");
        assert_eq!(
            env_var_or_default("ASSISTANT_OPERATOR_TEST_BAD_NUMBER", 42u64),
            42
        );
        std::env::remove_var("ASSISTANT_OPERATOR_TEST_BAD_NUMBER");
    }
}
