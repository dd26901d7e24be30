use crate::env::{EnvSource, parse_bool};
use crate::namespace::DEFAULT_LABEL;
use backend_spec::ConfigError;
use std::time::Duration;

pub const NAMESPACE_LABEL_ENV: &str = "BACKUP_TEST_NAMESPACE_LABEL";
pub const DEADLINE_ENV: &str = "BACKUP_TEST_DEADLINE_SECS";
pub const TEARDOWN_GRACE_ENV: &str = "BACKUP_TEST_TEARDOWN_GRACE_SECS";
pub const BENCH_ITERATIONS_ENV: &str = "BACKUP_TEST_BENCH_ITERATIONS";
pub const MINIMAL_DATA_ENV: &str = "BACKUP_TEST_MINIMAL_DATA";

const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_secs(60);
const DEFAULT_BENCH_ITERATIONS: usize = 8;

/// Per-binding defaults for how hard the suite pushes the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tuning {
    /// Use small payloads and few objects.
    pub minimal_data: bool,
    /// Wait this long after removals before asserting absence.
    pub wait_for_delayed_removal: Duration,
}

/// Knobs shared by correctness and benchmark runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteSettings {
    pub namespace_label: String,
    /// Covers create and the body phase; teardown has its own grace period.
    pub deadline: Option<Duration>,
    pub teardown_grace: Duration,
    pub bench_iterations: usize,
    pub tuning: Tuning,
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self::with_tuning(Tuning::default())
    }
}

impl SuiteSettings {
    pub fn with_tuning(tuning: Tuning) -> Self {
        Self {
            namespace_label: DEFAULT_LABEL.to_string(),
            deadline: None,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
            bench_iterations: DEFAULT_BENCH_ITERATIONS,
            tuning,
        }
    }

    /// Layers environment overrides on top of the binding's tuning.
    pub fn from_env(env: &dyn EnvSource, tuning: Tuning) -> Result<Self, ConfigError> {
        let mut settings = Self::with_tuning(tuning);
        if let Some(label) = env.non_empty(NAMESPACE_LABEL_ENV) {
            settings.namespace_label = label;
        }
        if let Some(secs) = parse_secs(env, DEADLINE_ENV)? {
            settings.deadline = Some(secs);
        }
        if let Some(secs) = parse_secs(env, TEARDOWN_GRACE_ENV)? {
            settings.teardown_grace = secs;
        }
        if let Some(raw) = env.non_empty(BENCH_ITERATIONS_ENV) {
            let iterations = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ConfigError::invalid_value(BENCH_ITERATIONS_ENV, &raw, "expected a positive integer")
                })?;
            settings.bench_iterations = iterations;
        }
        if let Some(raw) = env.non_empty(MINIMAL_DATA_ENV) {
            settings.tuning.minimal_data = parse_bool(&raw).ok_or_else(|| {
                ConfigError::invalid_value(MINIMAL_DATA_ENV, &raw, "expected a boolean")
            })?;
        }
        Ok(settings)
    }
}

fn parse_secs(env: &dyn EnvSource, key: &str) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = env.non_empty(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::invalid_value(key, &raw, "must be at least one second")),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(_) => Err(ConfigError::invalid_value(key, &raw, "expected whole seconds")),
    }
}
