//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Name of the only `AssistantConfig` the operator acts on
pub const SINGLETON_NAME: &str = "cluster";

/// Finalizer placed on the `AssistantConfig` before any owned resource is created
pub const FINALIZER: &str = "assistant.octopilot.io/finalizer";

/// Annotation correlating an external Secret/ConfigMap with the `AssistantConfig` it feeds
pub const WATCHER_ANNOTATION: &str = "assistant.octopilot.io/watcher";

/// Pod template annotation bumped to roll a Deployment
pub const FORCE_RELOAD_ANNOTATION: &str = "assistant.octopilot.io/force-reload";

/// Pod template annotation carrying the digest of the mounted configuration
pub const CONFIG_HASH_ANNOTATION: &str = "assistant.octopilot.io/config-hash";

/// Field manager / `app.kubernetes.io/managed-by` value
pub const MANAGER_NAME: &str = "assistant-operator";

/// Alias resolved to whichever API backend is active
pub const ACTIVE_BACKEND_ALIAS: &str = "ACTIVE_BACKEND";

/// Default namespace for all workloads
pub const DEFAULT_NAMESPACE: &str = "octopilot-assistant";

/// Workload Deployment names
pub const APP_SERVER_DEPLOYMENT: &str = "assistant-app-server";
pub const CORE_DEPLOYMENT: &str = "assistant-core";
pub const POSTGRES_DEPLOYMENT: &str = "assistant-postgres-server";
pub const CONSOLE_DEPLOYMENT: &str = "assistant-console-plugin";

/// Console plugin registration name (ConsolePlugin object and Console `spec.plugins` entry)
pub const CONSOLE_PLUGIN_NAME: &str = "assistant-console-plugin";

/// Name of the cluster Console operator configuration object
pub const CONSOLE_CONFIG_NAME: &str = "cluster";

/// Secret keys the engine validates on referenced objects
pub const CREDENTIALS_TOKEN_KEY: &str = "apitoken";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";

/// Ports
pub const API_SERVICE_PORT: i32 = 8443;
pub const POSTGRES_PORT: i32 = 5432;
pub const CONSOLE_SERVICE_PORT: i32 = 9443;

/// Postgres database and user created for the conversation cache
pub const POSTGRES_DATABASE: &str = "assistant";
pub const POSTGRES_USER: &str = "postgres";
pub const POSTGRES_PASSWORD_KEY: &str = "password";

/// Default workload images
pub const DEFAULT_APP_SERVER_IMAGE: &str = "quay.io/octopilot/assistant-app-server:latest";
pub const DEFAULT_CORE_IMAGE: &str = "quay.io/octopilot/assistant-core:latest";
pub const DEFAULT_POSTGRES_IMAGE: &str = "registry.redhat.io/rhel9/postgresql-16:latest";
pub const DEFAULT_CONSOLE_IMAGE: &str = "quay.io/octopilot/assistant-console-plugin:latest";

/// Default system resources watched by namespace+name
pub const PULL_SECRET_NAMESPACE: &str = "openshift-config";
pub const PULL_SECRET_NAME: &str = "pull-secret";
pub const ROOT_CA_CONFIGMAP: &str = "kube-root-ca.crt";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue interval after a successful pass (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 600;

/// Default Fibonacci backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 5_000;

/// Default Fibonacci backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 600_000;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default overall bound on waiting for owned resources to disappear (seconds)
pub const DEFAULT_TEARDOWN_TIMEOUT_SECS: u64 = 180;

/// Default interval between owned-resource enumerations during teardown (milliseconds)
pub const DEFAULT_TEARDOWN_POLL_INTERVAL_MS: u64 = 5_000;

/// Attempts made by the status writer before giving up on conflicts
pub const STATUS_UPDATE_ATTEMPTS: u32 = 5;

/// Pause between conflicting status writes (milliseconds)
pub const STATUS_CONFLICT_RETRY_MS: u64 = 10;

/// Upper bound on persisted pod diagnostics
pub const MAX_DIAGNOSTICS: usize = 50;
