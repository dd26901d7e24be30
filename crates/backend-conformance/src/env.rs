use std::collections::BTreeMap;
use std::fmt;

/// Lists run names that must not be skipped, comma separated.
pub const DISALLOW_SKIP_ENV: &str = "BACKUP_TEST_DISALLOW_SKIP";
/// Truthy when network-touching tests are deliberately disabled.
pub const OFFLINE_ENV: &str = "BACKUP_TEST_OFFLINE";

/// Source of configuration variables.
pub trait EnvSource: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;

    /// Like [`EnvSource::var`] but treats blank values as unset.
    fn non_empty(&self, name: &str) -> Option<String> {
        self.var(name).filter(|value| !value.trim().is_empty())
    }
}

/// Reads the real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Synthetic environment for tests and embedding.
#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: BTreeMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Parse a truthy value in a tolerant way.
pub fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|pat| value.eq_ignore_ascii_case(pat))
    {
        Some(true)
    } else if ["0", "false", "no", "off"]
        .iter()
        .any(|pat| value.eq_ignore_ascii_case(pat))
    {
        Some(false)
    } else {
        None
    }
}

/// Outcome of the pre-flight environment check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skip { missing: String },
}

/// Ordered list of variables a run needs before it touches anything.
#[derive(Debug, Clone, Default)]
pub struct EnvGate {
    required: Vec<String>,
}

impl EnvGate {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Stops at the first variable that is unset or blank.
    pub fn check(&self, env: &dyn EnvSource) -> GateDecision {
        for name in &self.required {
            if env.non_empty(name).is_none() {
                return GateDecision::Skip {
                    missing: name.clone(),
                };
            }
        }
        GateDecision::Proceed
    }
}

/// Verdict of the process-wide policy, consulted only once a run skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// Not configured here; skipping is fine.
    Permitted,
    /// Network-touching tests are switched off on purpose.
    NetworkDisabled,
    /// This run is required to execute, so the skip is a failure.
    Disallowed,
}

impl fmt::Display for PolicyVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyVerdict::Permitted => "not configured",
            PolicyVerdict::NetworkDisabled => "network tests disabled",
            PolicyVerdict::Disallowed => "skip disallowed",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SkipPolicy {
    must_run: Vec<String>,
    offline: bool,
}

impl SkipPolicy {
    pub fn from_env(env: &dyn EnvSource) -> Self {
        let must_run = env
            .var(DISALLOW_SKIP_ENV)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let offline = env
            .var(OFFLINE_ENV)
            .and_then(|value| parse_bool(&value))
            .unwrap_or(false);
        Self { must_run, offline }
    }

    pub fn verdict(&self, run: &str) -> PolicyVerdict {
        if self.must_run.iter().any(|name| name == run) {
            PolicyVerdict::Disallowed
        } else if self.offline {
            PolicyVerdict::NetworkDisabled
        } else {
            PolicyVerdict::Permitted
        }
    }
}
