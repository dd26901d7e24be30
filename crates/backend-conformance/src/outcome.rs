use crate::bench::BenchReport;
use crate::bodies::TestReport;
use crate::env::PolicyVerdict;
use crate::namespace::Namespace;
use backend_spec::{BackendError, ConfigError};
use std::any::Any;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Lifecycle phase a run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Gate,
    Configure,
    Create,
    Body,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Gate => "gate",
            Phase::Configure => "configure",
            Phase::Create => "create",
            Phase::Body => "body",
            Phase::Teardown => "teardown",
        })
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("config already exists at {location}")]
    AlreadyExists { location: String },
    #[error("backend unreachable: {0}")]
    Connectivity(#[source] BackendError),
    #[error("teardown failed: {0}")]
    Teardown(#[source] BackendError),
    #[error("teardown did not finish within {grace:?}; namespace {namespace} abandoned")]
    TeardownAbandoned { namespace: String, grace: Duration },
    #[error("{0}")]
    Body(BodyFailures),
    #[error("benchmark {case} failed: {message}")]
    Benchmark { case: String, message: String },
    #[error("{run} may not be skipped ({reason})")]
    SkipDisallowed { run: String, reason: String },
    #[error("deadline exceeded during {phase}")]
    DeadlineExceeded { phase: Phase },
    #[error("{phase} panicked: {message}")]
    Panicked { phase: Phase, message: String },
}

/// Assertion failures collected from the correctness cases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyFailures {
    pub failures: Vec<(String, String)>,
}

impl BodyFailures {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BodyFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} case(s) failed", self.failures.len())?;
        for (case, message) in &self.failures {
            write!(f, "; {case}: {message}")?;
        }
        Ok(())
    }
}

/// Why a run did not execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipNotice {
    pub missing: String,
    pub verdict: PolicyVerdict,
}

impl fmt::Display for SkipNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "environment variable {} not set ({})",
            self.missing, self.verdict
        )
    }
}

#[derive(Debug)]
pub struct RunFailure {
    pub phase: Phase,
    pub error: HarnessError,
    /// Teardown problem reported next to an earlier failure.
    pub cleanup: Option<HarnessError>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed: {}", self.phase, self.error)?;
        if let Some(cleanup) = &self.cleanup {
            write!(f, " (also: {cleanup})")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum RunStatus {
    Passed,
    Skipped(SkipNotice),
    Failed(RunFailure),
}

impl RunStatus {
    pub fn is_passed(&self) -> bool {
        matches!(self, RunStatus::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunStatus::Skipped(_))
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunStatus::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// What happened to the run's namespace at the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// No handle was ever acquired.
    NotAttempted,
    Completed,
    /// The backend does not declare bulk delete; its namespace is left behind.
    Unsupported,
    Failed(String),
    Abandoned,
}

#[derive(Debug)]
pub enum RunReport {
    Tests(TestReport),
    Benchmarks(BenchReport),
}

/// Final result of one `run_tests` or `run_benchmarks` call.
#[derive(Debug)]
pub struct RunOutcome {
    pub run: String,
    pub namespace: Option<Namespace>,
    pub status: RunStatus,
    pub report: Option<RunReport>,
    pub teardown: TeardownOutcome,
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, RunStatus::Failed(_))
    }

    /// Skips are not failures.
    pub fn exit_code(&self) -> i32 {
        if self.is_failure() { 1 } else { 0 }
    }

    pub fn test_report(&self) -> Option<&TestReport> {
        match &self.report {
            Some(RunReport::Tests(report)) => Some(report),
            _ => None,
        }
    }

    pub fn bench_report(&self) -> Option<&BenchReport> {
        match &self.report {
            Some(RunReport::Benchmarks(report)) => Some(report),
            _ => None,
        }
    }

    /// Converts into a test result; skips print a notice and succeed.
    pub fn into_result(self) -> anyhow::Result<Option<RunReport>> {
        match self.status {
            RunStatus::Passed => Ok(self.report),
            RunStatus::Skipped(notice) => {
                eprintln!("{}: skipped, {notice}", self.run);
                Ok(None)
            }
            RunStatus::Failed(failure) => {
                anyhow::bail!("{}: {failure}", self.run)
            }
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
