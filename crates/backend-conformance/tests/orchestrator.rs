use anyhow::Result;
use async_trait::async_trait;
use backend_conformance::{
    BackendBinding, CaseOutcome, EnvSource, HarnessError, MapEnv, Namespace, Phase,
    PolicyVerdict, RunStatus, Suite, SuiteSettings, TeardownOutcome, TestCase, Tuning,
};
use backend_mem::{MemBackend, MemStore};
use backend_spec::{
    Backend, BackendError, BackendResult, Capabilities, ConfigError, FileInfo, FileType, Handle,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Healthy,
    MarkerPresent,
    FreshnessCheckHangs,
    CreateAlreadyExists,
    CreateUnreachable,
    CreateHangs,
    ConfigRejected,
    SaveHangs,
    ListPanics,
    TeardownFails,
    TeardownHangs,
    NoBulkDelete,
}

#[derive(Default)]
struct Tally {
    creates: AtomicUsize,
    bulk_deletes: AtomicUsize,
    /// Creation index of every handle closed, in order.
    closed: Mutex<Vec<usize>>,
}

impl Tally {
    fn closes_of(&self, index: usize) -> usize {
        self.closed.lock().iter().filter(|i| **i == index).count()
    }
}

/// Memory backend with injectable failures.
struct ScriptedBinding {
    store: MemStore,
    fault: Fault,
    tally: Arc<Tally>,
    required: &'static [&'static str],
}

impl ScriptedBinding {
    fn new(fault: Fault) -> Self {
        Self {
            store: MemStore::new(),
            fault,
            tally: Arc::default(),
            required: &[],
        }
    }

    fn requiring(mut self, vars: &'static [&'static str]) -> Self {
        self.required = vars;
        self
    }
}

#[derive(Debug, Clone)]
struct ScriptedConfig {
    namespace: String,
}

#[async_trait]
impl BackendBinding for ScriptedBinding {
    type Config = ScriptedConfig;

    fn name(&self) -> &str {
        "scripted"
    }

    fn required_vars(&self) -> &[&'static str] {
        self.required
    }

    fn tuning(&self) -> Tuning {
        Tuning {
            minimal_data: true,
            ..Tuning::default()
        }
    }

    fn new_config(
        &self,
        _env: &dyn EnvSource,
        namespace: &Namespace,
    ) -> Result<ScriptedConfig, ConfigError> {
        if self.fault == Fault::ConfigRejected {
            return Err(ConfigError::malformed("scripted:", "rejected by script"));
        }
        Ok(ScriptedConfig {
            namespace: namespace.to_string(),
        })
    }

    async fn create(&self, config: &ScriptedConfig) -> BackendResult<Box<dyn Backend>> {
        let index = self.tally.creates.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::CreateAlreadyExists => {
                return Err(BackendError::already_exists(config.namespace.clone()));
            }
            Fault::CreateUnreachable => {
                return Err(BackendError::Connectivity("connection refused".into()));
            }
            Fault::CreateHangs => std::future::pending::<()>().await,
            _ => {}
        }
        let inner = MemBackend::new(self.store.clone(), config.namespace.clone());
        match self.fault {
            Fault::MarkerPresent => inner.save(&Handle::config(), b"stale").await?,
            Fault::FreshnessCheckHangs => {
                inner
                    .save(&Handle::new(FileType::Lock, "create-lock"), b"lock")
                    .await?
            }
            _ => {}
        }
        Ok(Box::new(ScriptedBackend {
            inner,
            fault: self.fault,
            tally: Arc::clone(&self.tally),
            index,
        }))
    }

    async fn open(&self, config: &ScriptedConfig) -> BackendResult<Box<dyn Backend>> {
        Ok(Box::new(MemBackend::new(
            self.store.clone(),
            config.namespace.clone(),
        )))
    }
}

struct ScriptedBackend {
    inner: MemBackend,
    fault: Fault,
    tally: Arc<Tally>,
    index: usize,
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn location(&self) -> String {
        self.inner.location()
    }

    fn capabilities(&self) -> Capabilities {
        match self.fault {
            Fault::NoBulkDelete => Capabilities::default(),
            _ => self.inner.capabilities(),
        }
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        if self.fault == Fault::FreshnessCheckHangs {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.test(handle).await
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        if self.fault == Fault::SaveHangs {
            std::future::pending::<()>().await;
        }
        self.inner.save(handle, data).await
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        self.inner.load(handle, length, offset).await
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        self.inner.stat(handle).await
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        self.inner.remove(handle).await
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        if self.fault == Fault::ListPanics {
            panic!("scripted list failure");
        }
        self.inner.list(kind).await
    }

    async fn delete_all(&self) -> BackendResult<()> {
        self.tally.bulk_deletes.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::TeardownFails => Err(BackendError::PermissionDenied("scripted".into())),
            Fault::TeardownHangs => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                self.inner.delete_all().await
            }
            _ => self.inner.delete_all().await,
        }
    }

    async fn close(&self) -> BackendResult<()> {
        self.tally.closed.lock().push(self.index);
        Ok(())
    }
}

fn settings() -> SuiteSettings {
    SuiteSettings {
        bench_iterations: 1,
        teardown_grace: Duration::from_secs(5),
        ..SuiteSettings::with_tuning(Tuning {
            minimal_data: true,
            ..Tuning::default()
        })
    }
}

fn suite(binding: ScriptedBinding) -> Suite<ScriptedBinding> {
    Suite::new(binding)
        .with_env(MapEnv::new())
        .with_settings(settings())
}

#[tokio::test]
async fn passing_run_tears_down_exactly_once() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::Healthy));
    let outcome = suite.run_tests().await;

    assert!(outcome.status.is_passed(), "{:?}", outcome.status);
    assert_eq!(outcome.teardown, TeardownOutcome::Completed);
    assert!(outcome.namespace.is_some());
    let report = outcome.test_report().expect("test report");
    assert_eq!(report.passed(), TestCase::ALL.len());

    let tally = &suite.binding().tally;
    assert_eq!(tally.closes_of(0), 1);
    assert!(suite.binding().store.is_empty());
    Ok(())
}

#[tokio::test]
async fn failing_body_still_tears_down() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::ListPanics));
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Body);
    match &failure.error {
        HarnessError::Body(failures) => {
            assert!(failures.failures.iter().any(|(case, _)| case == "list"));
            assert!(failures.failures.iter().all(|(case, _)| case != "load"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(failure.cleanup.is_none());
    assert_eq!(outcome.teardown, TeardownOutcome::Completed);
    assert_eq!(suite.binding().tally.closes_of(0), 1);
    assert!(suite.binding().store.is_empty());
    Ok(())
}

#[tokio::test]
async fn stale_marker_fails_create_and_leaves_the_namespace_alone() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::MarkerPresent));
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Create);
    assert!(matches!(failure.error, HarnessError::AlreadyExists { .. }));
    assert!(failure.error.to_string().contains("already exists"));
    assert!(failure.cleanup.is_none());
    assert!(outcome.report.is_none());
    assert_eq!(outcome.teardown, TeardownOutcome::NotAttempted);

    let tally = &suite.binding().tally;
    assert_eq!(tally.bulk_deletes.load(Ordering::SeqCst), 0);
    assert_eq!(tally.closes_of(0), 1);
    assert_eq!(suite.binding().store.len(), 1);
    let namespace = outcome.namespace.as_ref().expect("namespace");
    let survivor = MemBackend::new(suite.binding().store.clone(), namespace.to_string());
    assert_eq!(
        survivor.load(&Handle::config(), 0, 0).await?,
        b"stale".to_vec()
    );
    Ok(())
}

#[tokio::test]
async fn hung_freshness_check_tears_down_what_create_wrote() -> Result<()> {
    let suite = Suite::new(ScriptedBinding::new(Fault::FreshnessCheckHangs))
        .with_env(MapEnv::new())
        .with_settings(SuiteSettings {
            deadline: Some(Duration::from_millis(100)),
            ..settings()
        });
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Create);
    assert!(matches!(
        failure.error,
        HarnessError::DeadlineExceeded {
            phase: Phase::Create
        }
    ));
    assert!(failure.cleanup.is_none());
    assert_eq!(outcome.teardown, TeardownOutcome::Completed);
    let tally = &suite.binding().tally;
    assert_eq!(tally.bulk_deletes.load(Ordering::SeqCst), 1);
    assert_eq!(tally.closes_of(0), 1);
    assert!(suite.binding().store.is_empty());
    Ok(())
}

#[tokio::test]
async fn backend_native_already_exists_is_reported_as_such() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::CreateAlreadyExists));
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Create);
    let namespace = outcome.namespace.as_ref().expect("namespace").to_string();
    match &failure.error {
        HarnessError::AlreadyExists { location } => assert_eq!(*location, namespace),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(
        failure.error.to_string(),
        format!("config already exists at {namespace}")
    );
    assert_eq!(outcome.teardown, TeardownOutcome::NotAttempted);
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_fails_create_without_teardown() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::CreateUnreachable));
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Create);
    assert!(matches!(
        failure.error,
        HarnessError::Connectivity(BackendError::Connectivity(_))
    ));
    assert_eq!(outcome.teardown, TeardownOutcome::NotAttempted);
    assert!(suite.binding().tally.closed.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn config_errors_stop_before_create() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::ConfigRejected));
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Configure);
    assert!(matches!(failure.error, HarnessError::Config(_)));
    assert_eq!(suite.binding().tally.creates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_suite_settings_fail_configuration() -> Result<()> {
    let suite = Suite::new(ScriptedBinding::new(Fault::Healthy))
        .with_env(MapEnv::new().with("BACKUP_TEST_BENCH_ITERATIONS", "0"));
    let outcome = suite.run_benchmarks().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Configure);
    assert!(outcome.namespace.is_none());
    assert_eq!(suite.binding().tally.creates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn failing_teardown_fails_an_otherwise_passing_run() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::TeardownFails));
    let outcome = suite.run_benchmarks().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Teardown);
    assert!(matches!(failure.error, HarnessError::Teardown(_)));
    assert!(matches!(outcome.teardown, TeardownOutcome::Failed(_)));
    assert!(outcome.bench_report().is_some());
    assert_eq!(suite.binding().tally.closes_of(0), 1);
    Ok(())
}

#[tokio::test]
async fn slow_teardown_is_abandoned_after_grace() -> Result<()> {
    let suite = Suite::new(ScriptedBinding::new(Fault::TeardownHangs))
        .with_env(MapEnv::new())
        .with_settings(SuiteSettings {
            teardown_grace: Duration::from_millis(100),
            ..settings()
        });
    let outcome = suite.run_benchmarks().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Teardown);
    assert!(matches!(
        failure.error,
        HarnessError::TeardownAbandoned { .. }
    ));
    assert_eq!(outcome.teardown, TeardownOutcome::Abandoned);
    Ok(())
}

#[tokio::test]
async fn create_is_bounded_by_the_deadline() -> Result<()> {
    let suite = Suite::new(ScriptedBinding::new(Fault::CreateHangs))
        .with_env(MapEnv::new())
        .with_settings(SuiteSettings {
            deadline: Some(Duration::from_millis(100)),
            ..settings()
        });
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Create);
    assert!(matches!(
        failure.error,
        HarnessError::DeadlineExceeded {
            phase: Phase::Create
        }
    ));
    assert_eq!(outcome.teardown, TeardownOutcome::NotAttempted);
    Ok(())
}

#[tokio::test]
async fn body_deadline_still_tears_down() -> Result<()> {
    let suite = Suite::new(ScriptedBinding::new(Fault::SaveHangs))
        .with_env(MapEnv::new())
        .with_settings(SuiteSettings {
            deadline: Some(Duration::from_millis(200)),
            ..settings()
        });
    let outcome = suite.run_tests().await;

    let failure = outcome.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Body);
    assert!(matches!(
        failure.error,
        HarnessError::DeadlineExceeded { phase: Phase::Body }
    ));
    assert_eq!(outcome.teardown, TeardownOutcome::Completed);
    assert_eq!(suite.binding().tally.closes_of(0), 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_run_tears_down_in_the_background() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::SaveHangs));
    let cancelled = tokio::time::timeout(Duration::from_millis(100), suite.run_tests()).await;
    assert!(cancelled.is_err());

    let tally = &suite.binding().tally;
    for _ in 0..100 {
        if tally.closes_of(0) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(tally.bulk_deletes.load(Ordering::SeqCst), 1);
    assert_eq!(tally.closes_of(0), 1);
    Ok(())
}

#[tokio::test]
async fn missing_variable_skips_without_touching_the_backend() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::Healthy).requiring(&["SCRIPTED_ENDPOINT"]));
    let outcome = suite.run_tests().await;

    match &outcome.status {
        RunStatus::Skipped(notice) => {
            assert_eq!(notice.missing, "SCRIPTED_ENDPOINT");
            assert_eq!(notice.verdict, PolicyVerdict::Permitted);
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(outcome.namespace.is_none());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(suite.binding().tally.creates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn disallowed_skip_is_a_gate_failure() -> Result<()> {
    let env = MapEnv::new().with("BACKUP_TEST_DISALLOW_SKIP", "scripted::benchmarks");
    let binding = ScriptedBinding::new(Fault::Healthy).requiring(&["SCRIPTED_ENDPOINT"]);
    let suite = Suite::new(binding).with_env(env).with_settings(settings());

    let tests = suite.run_tests().await;
    assert!(tests.status.is_skipped());

    let benchmarks = suite.run_benchmarks().await;
    let failure = benchmarks.status.failure().expect("run must fail");
    assert_eq!(failure.phase, Phase::Gate);
    assert!(matches!(
        &failure.error,
        HarnessError::SkipDisallowed { run, .. } if run == "scripted::benchmarks"
    ));
    assert_eq!(suite.binding().tally.creates.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn backend_without_bulk_delete_passes_but_keeps_its_namespace() -> Result<()> {
    let suite = suite(ScriptedBinding::new(Fault::NoBulkDelete));
    let outcome = suite.run_tests().await;

    assert!(outcome.status.is_passed(), "{:?}", outcome.status);
    assert_eq!(outcome.teardown, TeardownOutcome::Unsupported);
    let report = outcome.test_report().expect("test report");
    assert!(matches!(
        report.outcome_of(TestCase::Delete),
        Some(CaseOutcome::Skipped(_))
    ));
    let tally = &suite.binding().tally;
    assert_eq!(tally.bulk_deletes.load(Ordering::SeqCst), 0);
    assert_eq!(tally.closes_of(0), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_use_disjoint_namespaces() -> Result<()> {
    let store = MemStore::new();
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let mut binding = ScriptedBinding::new(Fault::Healthy);
        binding.store = store.clone();
        let suite = suite(binding);
        tasks.push(tokio::spawn(async move { suite.run_tests().await }));
    }

    let mut namespaces = HashSet::new();
    for task in tasks {
        let outcome = task.await?;
        assert!(outcome.status.is_passed(), "{:?}", outcome.status);
        assert_eq!(outcome.teardown, TeardownOutcome::Completed);
        let namespace = outcome.namespace.expect("namespace allocated");
        assert!(namespaces.insert(namespace.to_string()));
    }
    assert_eq!(namespaces.len(), 32);
    assert!(store.is_empty());
    Ok(())
}
