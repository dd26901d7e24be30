//! Shared conformance harness for storage backends.
//!
//! A provider crate implements [`BackendBinding`] (config factory, create, open)
//! and hands it to [`Suite`], which gates on the environment, allocates a fresh
//! namespace, creates the backend, runs the correctness or benchmark bodies and
//! always tears the namespace down afterwards.

pub mod assertions;
pub mod bench;
pub mod binding;
pub mod bodies;
pub mod env;
pub mod fixtures;
mod lease;
pub mod namespace;
pub mod outcome;
pub mod settings;
mod suite;
pub mod telemetry;

pub use bench::{BenchMeasurement, BenchReport};
pub use binding::{BackendBinding, CreateFailure, create_backend, create_fresh, ensure_fresh};
pub use bodies::{CaseOutcome, CaseResult, TestCase, TestReport};
pub use env::{EnvGate, EnvSource, GateDecision, MapEnv, PolicyVerdict, ProcessEnv, SkipPolicy};
pub use namespace::{Namespace, NamespaceGenerator};
pub use outcome::{
    BodyFailures, HarnessError, Phase, RunFailure, RunOutcome, RunReport, RunStatus, SkipNotice,
    TeardownOutcome,
};
pub use settings::{SuiteSettings, Tuning};
pub use suite::Suite;
