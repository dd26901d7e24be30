use crate::bench;
use crate::binding::{BackendBinding, create_backend, ensure_fresh};
use crate::bodies::{CaseContext, run_cases};
use crate::env::{EnvGate, EnvSource, GateDecision, PolicyVerdict, ProcessEnv, SkipPolicy};
use crate::lease::BackendLease;
use crate::namespace::{Namespace, NamespaceGenerator};
use crate::outcome::{
    HarnessError, Phase, RunFailure, RunOutcome, RunReport, RunStatus, SkipNotice,
    TeardownOutcome, panic_message,
};
use crate::settings::SuiteSettings;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, debug, field, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Tests,
    Benchmarks,
}

impl Mode {
    fn label(self) -> &'static str {
        match self {
            Mode::Tests => "tests",
            Mode::Benchmarks => "benchmarks",
        }
    }
}

/// Runs the shared correctness or benchmark bodies against one binding.
pub struct Suite<B: BackendBinding> {
    binding: B,
    env: Arc<dyn EnvSource>,
    settings: Option<SuiteSettings>,
}

impl<B: BackendBinding> Suite<B> {
    pub fn new(binding: B) -> Self {
        Self {
            binding,
            env: Arc::new(ProcessEnv),
            settings: None,
        }
    }

    /// Replaces the process environment as configuration source.
    pub fn with_env(mut self, env: impl EnvSource + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Uses fixed settings instead of reading them from the environment.
    pub fn with_settings(mut self, settings: SuiteSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    fn run_name(&self, mode: Mode) -> String {
        format!("{}::{}", self.binding.name(), mode.label())
    }

    pub async fn run_tests(&self) -> RunOutcome {
        self.run(Mode::Tests).await
    }

    pub async fn run_benchmarks(&self) -> RunOutcome {
        self.run(Mode::Benchmarks).await
    }

    async fn run(&self, mode: Mode) -> RunOutcome {
        let run = self.run_name(mode);
        let span = info_span!("run", run = %run, namespace = field::Empty);
        let outcome = self.drive(mode, run).instrument(span).await;
        match &outcome.status {
            RunStatus::Passed => info!(run = %outcome.run, "run passed"),
            RunStatus::Skipped(notice) => info!(run = %outcome.run, %notice, "run skipped"),
            RunStatus::Failed(failure) => warn!(run = %outcome.run, %failure, "run failed"),
        }
        outcome
    }

    async fn drive(&self, mode: Mode, run: String) -> RunOutcome {
        let env = &*self.env;

        // INIT -> GATE_CHECKED
        let gate = EnvGate::new(self.binding.required_vars().iter().copied());
        if let GateDecision::Skip { missing } = gate.check(env) {
            return self.skipped(run, missing);
        }
        debug!("environment gate passed");

        // GATE_CHECKED -> CONFIGURED
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => match SuiteSettings::from_env(env, self.binding.tuning()) {
                Ok(settings) => settings,
                Err(err) => return failed(run, None, Phase::Configure, err.into()),
            },
        };
        let namespace = NamespaceGenerator::new(&settings.namespace_label).next();
        tracing::Span::current().record("namespace", field::display(&namespace));
        let config = match self.binding.new_config(env, &namespace) {
            Ok(config) => config,
            Err(err) => return failed(run, Some(namespace), Phase::Configure, err.into()),
        };
        debug!(?config, "configuration built");

        // CONFIGURED -> CREATED
        let deadline = settings.deadline.map(|limit| Instant::now() + limit);
        let backend = match within(
            deadline,
            Phase::Create,
            create_backend(&self.binding, &config),
        )
        .await
        {
            Ok(Ok(backend)) => backend,
            Ok(Err(err)) | Err(err) => return failed(run, Some(namespace), Phase::Create, err),
        };
        debug!(location = %backend.location(), "backend created");
        // Leased before the marker check so a deadline here still tears it down.
        let lease = BackendLease::new(backend, namespace.clone(), settings.teardown_grace);
        let fresh = within(deadline, Phase::Create, ensure_fresh(lease.backend())).await;
        if let Err(error) = fresh.and_then(|checked| checked) {
            let (teardown, cleanup) = match error {
                HarnessError::AlreadyExists { .. } => (lease.close_only().await, None),
                _ => lease.release().await,
            };
            return RunOutcome {
                run,
                namespace: Some(namespace),
                status: RunStatus::Failed(RunFailure {
                    phase: Phase::Create,
                    error,
                    cleanup,
                }),
                report: None,
                teardown,
            };
        }

        // CREATED -> BODY_EXECUTING
        let body = within(
            deadline,
            Phase::Body,
            self.execute(mode, &lease, &config, &settings),
        );
        let (report, body_error) = match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok((report, error))) => (Some(report), error),
            Ok(Err(err)) => (None, Some(err)),
            Err(payload) => (
                None,
                Some(HarnessError::Panicked {
                    phase: Phase::Body,
                    message: panic_message(payload),
                }),
            ),
        };
        debug!(failed = body_error.is_some(), "body finished");

        // BODY_EXECUTING -> TORN_DOWN
        let (teardown, cleanup) = lease.release().await;

        // TORN_DOWN -> DONE
        let status = match (body_error, cleanup) {
            (Some(error), cleanup) => RunStatus::Failed(RunFailure {
                phase: Phase::Body,
                error,
                cleanup,
            }),
            (None, Some(error)) => RunStatus::Failed(RunFailure {
                phase: Phase::Teardown,
                error,
                cleanup: None,
            }),
            (None, None) => RunStatus::Passed,
        };
        RunOutcome {
            run,
            namespace: Some(namespace),
            status,
            report,
            teardown,
        }
    }

    async fn execute(
        &self,
        mode: Mode,
        lease: &BackendLease,
        config: &B::Config,
        settings: &SuiteSettings,
    ) -> (RunReport, Option<HarnessError>) {
        match mode {
            Mode::Tests => {
                let ctx = CaseContext {
                    binding: &self.binding,
                    config,
                    backend: lease.backend(),
                    tuning: settings.tuning,
                };
                let report = run_cases(&ctx).await;
                let failures = report.failures();
                let error = (!failures.is_empty()).then_some(HarnessError::Body(failures));
                (RunReport::Tests(report), error)
            }
            Mode::Benchmarks => {
                let (report, error) = bench::run_benchmarks(lease.backend(), settings).await;
                (RunReport::Benchmarks(report), error)
            }
        }
    }

    /// The gate skipped; the policy decides whether that is acceptable.
    fn skipped(&self, run: String, missing: String) -> RunOutcome {
        let verdict = SkipPolicy::from_env(&*self.env).verdict(&run);
        if verdict == PolicyVerdict::Disallowed {
            let error = HarnessError::SkipDisallowed {
                reason: format!("environment variable {missing} not set"),
                run: run.clone(),
            };
            return failed(run, None, Phase::Gate, error);
        }
        RunOutcome {
            run,
            namespace: None,
            status: RunStatus::Skipped(SkipNotice { missing, verdict }),
            report: None,
            teardown: TeardownOutcome::NotAttempted,
        }
    }
}

fn failed(
    run: String,
    namespace: Option<Namespace>,
    phase: Phase,
    error: HarnessError,
) -> RunOutcome {
    RunOutcome {
        run,
        namespace,
        status: RunStatus::Failed(RunFailure {
            phase,
            error,
            cleanup: None,
        }),
        report: None,
        teardown: TeardownOutcome::NotAttempted,
    }
}

async fn within<F: Future>(
    deadline: Option<Instant>,
    phase: Phase,
    fut: F,
) -> Result<F::Output, HarnessError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| HarnessError::DeadlineExceeded { phase }),
        None => Ok(fut.await),
    }
}
