use super::deserialize_opt_duration;
use crate::descriptor::{builtin, ResourceDescriptor, BUILTIN_KINDS, ON_DEMAND_KINDS};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Teardown poll interval used by the manager.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long a service may take to accept connections.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Overrides the shared directory holding lock and state files.
pub const SHARED_DIR_ENV: &str = "SERVICE_FIXTURES_DIR";
pub const POLL_INTERVAL_ENV: &str = "SERVICE_FIXTURES_POLL_INTERVAL";
pub const STARTUP_TIMEOUT_ENV: &str = "SERVICE_FIXTURES_STARTUP_TIMEOUT";

/// Settings shared by every coordinator of one test run.
///
/// All workers of a run must agree on `shared_dir`, otherwise each of them
/// sees an empty directory and becomes a manager.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub shared_dir: PathBuf,
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shared_dir: std::env::temp_dir().join("service-fixtures"),
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(shared_dir: impl Into<PathBuf>) -> Self {
        Self {
            shared_dir: shared_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    /// Defaults overridden by `SERVICE_FIXTURES_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(SHARED_DIR_ENV).filter(|v| !v.is_empty()) {
            self.shared_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(POLL_INTERVAL_ENV) {
            let poll_interval = env_duration(POLL_INTERVAL_ENV, &value)?;
            if poll_interval.is_zero() {
                return Err(Error::Config(format!(
                    "{}='{}' must be greater than zero",
                    POLL_INTERVAL_ENV, value
                )));
            }
            self.poll_interval = poll_interval;
        }
        if let Some(value) = lookup(STARTUP_TIMEOUT_ENV) {
            self.startup_timeout = env_duration(STARTUP_TIMEOUT_ENV, &value)?;
        }
        Ok(self)
    }
}

fn env_duration(name: &str, value: &str) -> Result<Duration> {
    super::parse_duration_string(value).ok_or_else(|| {
        Error::Config(format!(
            "{}='{}' is not a duration (expected e.g. 250ms, 30s, 1m)",
            name, value
        ))
    })
}

/// Contents of `service-fixtures.yaml`.
///
/// ```yaml
/// settings:
///   shared_dir: /tmp/my-run
///   poll_interval: 100ms
///   startup_timeout: 1m
///
/// services:
///   postgres:
///     env_var: TEST_PG_DETAILS
///     command: postgres -D /tmp/pg -p {port}
///     extra:
///       username: postgres
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixturesConfig {
    #[serde(default)]
    pub settings: Settings,

    /// Extra or overriding descriptors, keyed by kind.
    #[serde(default)]
    pub services: BTreeMap<String, ResourceDescriptor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub shared_dir: Option<PathBuf>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub poll_interval: Option<Duration>,

    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub startup_timeout: Option<Duration>,
}

impl FixturesConfig {
    /// Coordinator settings: defaults, then the file's `settings`.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        if let Some(dir) = &self.settings.shared_dir {
            config.shared_dir = dir.clone();
        }
        if let Some(poll) = self.settings.poll_interval {
            config.poll_interval = poll;
        }
        if let Some(timeout) = self.settings.startup_timeout {
            config.startup_timeout = timeout;
        }
        config
    }

    /// Configured descriptor for `kind`, falling back to the built-ins.
    pub fn descriptor(&self, kind: &str) -> Option<ResourceDescriptor> {
        self.services.get(kind).cloned().or_else(|| builtin(kind))
    }

    /// Built-in kinds followed by any additional configured kinds.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = BUILTIN_KINDS
            .iter()
            .chain(ON_DEMAND_KINDS.iter())
            .map(|k| k.to_string())
            .collect();
        for kind in self.services.keys() {
            if !kinds.contains(kind) {
                kinds.push(kind.clone());
            }
        }
        kinds
    }
}
