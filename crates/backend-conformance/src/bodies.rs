//! Backend-agnostic correctness cases.
//!
//! Every case runs against the handle the orchestrator created. Objects a case
//! saves are recorded in its [`Scratch`] and removed once the case ends, so a
//! failing case cannot leak objects into the next one.

use crate::assertions::{
    assert_absent, assert_listing, assert_load_eq, assert_present, expect_invalid_handle,
    expect_not_found,
};
use crate::binding::{BackendBinding, CreateFailure, create_fresh};
use crate::fixtures::{payload_len, random_bytes, random_len, random_name, random_window};
use crate::outcome::{BodyFailures, HarnessError, panic_message};
use crate::settings::Tuning;
use anyhow::{Context, Result};
use backend_spec::{Backend, BackendError, FileType, Handle};
use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything a case may touch.
pub struct CaseContext<'a, B: BackendBinding> {
    pub binding: &'a B,
    pub config: &'a B::Config,
    pub backend: &'a dyn Backend,
    pub tuning: Tuning,
}

impl<B: BackendBinding> CaseContext<'_, B> {
    fn wait(&self) -> Duration {
        self.tuning.wait_for_delayed_removal
    }

    fn minimal(&self) -> bool {
        self.tuning.minimal_data
    }
}

/// Objects saved by a single case.
#[derive(Default)]
pub struct Scratch {
    saved: Vec<Handle>,
}

impl Scratch {
    async fn save(&mut self, backend: &dyn Backend, handle: &Handle, data: &[u8]) -> Result<()> {
        backend
            .save(handle, data)
            .await
            .with_context(|| format!("save failed for {handle} ({} bytes)", data.len()))?;
        self.saved.push(handle.clone());
        Ok(())
    }

    async fn clear(self, backend: &dyn Backend) {
        for handle in self.saved {
            if let Err(err) = backend.remove(&handle).await {
                debug!(%handle, %err, "scratch cleanup failed");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    CreateWithConfig,
    Location,
    Config,
    Load,
    List,
    Save,
    Reopen,
    Backend,
    /// Runs last: empties the whole namespace.
    Delete,
}

impl TestCase {
    pub const ALL: [TestCase; 9] = [
        TestCase::CreateWithConfig,
        TestCase::Location,
        TestCase::Config,
        TestCase::Load,
        TestCase::List,
        TestCase::Save,
        TestCase::Reopen,
        TestCase::Backend,
        TestCase::Delete,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestCase::CreateWithConfig => "create_with_config",
            TestCase::Location => "location",
            TestCase::Config => "config",
            TestCase::Load => "load",
            TestCase::List => "list",
            TestCase::Save => "save",
            TestCase::Reopen => "reopen",
            TestCase::Backend => "backend",
            TestCase::Delete => "delete",
        }
    }

    async fn run<B: BackendBinding>(
        self,
        ctx: &CaseContext<'_, B>,
        scratch: &mut Scratch,
    ) -> Result<()> {
        match self {
            TestCase::CreateWithConfig => create_with_config(ctx, scratch).await,
            TestCase::Location => location(ctx),
            TestCase::Config => config(ctx, scratch).await,
            TestCase::Load => load(ctx, scratch).await,
            TestCase::List => list(ctx, scratch).await,
            TestCase::Save => save(ctx, scratch).await,
            TestCase::Reopen => reopen(ctx, scratch).await,
            TestCase::Backend => backend_roundtrip(ctx, scratch).await,
            TestCase::Delete => delete(ctx, scratch).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed(String),
    Skipped(&'static str),
}

#[derive(Debug, Clone)]
pub struct CaseResult {
    pub case: TestCase,
    pub outcome: CaseOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct TestReport {
    pub cases: Vec<CaseResult>,
}

impl TestReport {
    pub fn failures(&self) -> BodyFailures {
        BodyFailures {
            failures: self
                .cases
                .iter()
                .filter_map(|result| match &result.outcome {
                    CaseOutcome::Failed(message) => {
                        Some((result.case.name().to_string(), message.clone()))
                    }
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn outcome_of(&self, case: TestCase) -> Option<&CaseOutcome> {
        self.cases
            .iter()
            .find(|result| result.case == case)
            .map(|result| &result.outcome)
    }

    pub fn passed(&self) -> usize {
        self.cases
            .iter()
            .filter(|result| result.outcome == CaseOutcome::Passed)
            .count()
    }
}

/// Runs every case in order; a failing case does not stop the others.
pub async fn run_cases<B: BackendBinding>(ctx: &CaseContext<'_, B>) -> TestReport {
    let bulk_delete = ctx.backend.capabilities().bulk_delete;
    let mut report = TestReport::default();

    for case in TestCase::ALL {
        let started = Instant::now();
        if case == TestCase::Delete && !bulk_delete {
            debug!(case = case.name(), "backend has no bulk delete");
            report.cases.push(CaseResult {
                case,
                outcome: CaseOutcome::Skipped("bulk delete not supported"),
                elapsed: started.elapsed(),
            });
            continue;
        }

        let mut scratch = Scratch::default();
        let result = AssertUnwindSafe(case.run(ctx, &mut scratch))
            .catch_unwind()
            .await;
        scratch.clear(ctx.backend).await;

        let outcome = match result {
            Ok(Ok(())) => CaseOutcome::Passed,
            Ok(Err(err)) => CaseOutcome::Failed(format!("{err:#}")),
            Err(payload) => CaseOutcome::Failed(format!("panicked: {}", panic_message(payload))),
        };
        let elapsed = started.elapsed();
        match &outcome {
            CaseOutcome::Failed(message) => {
                warn!(case = case.name(), ?elapsed, %message, "case failed")
            }
            _ => info!(case = case.name(), ?elapsed, "case passed"),
        }
        report.cases.push(CaseResult {
            case,
            outcome,
            elapsed,
        });
    }

    report
}

async fn create_with_config<B: BackendBinding>(
    ctx: &CaseContext<'_, B>,
    scratch: &mut Scratch,
) -> Result<()> {
    let backend = ctx.backend;
    let marker = Handle::config();
    scratch.save(backend, &marker, b"test config").await?;
    assert_present(backend, &marker).await?;

    match create_fresh(ctx.binding, ctx.config).await {
        Ok(second) => {
            let _ = second.close().await;
            anyhow::bail!("create succeeded although a config marker exists");
        }
        Err(CreateFailure { error, leftover }) => {
            if let Some(leftover) = leftover {
                let _ = leftover.close().await;
            }
            if !matches!(error, HarnessError::AlreadyExists { .. }) {
                anyhow::bail!("expected already exists, got {error}");
            }
        }
    }

    backend
        .remove(&marker)
        .await
        .context("removing config marker")?;
    assert_absent(backend, &marker, ctx.wait()).await
}

fn location<B: BackendBinding>(ctx: &CaseContext<'_, B>) -> Result<()> {
    if ctx.backend.location().trim().is_empty() {
        anyhow::bail!("location is empty");
    }
    Ok(())
}

async fn config<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;
    let marker = Handle::config();

    expect_not_found(backend.load(&marker, 0, 0).await, "load of missing config")?;
    expect_not_found(backend.stat(&marker).await, "stat of missing config")?;

    let data = random_bytes(random_len(4096));
    scratch.save(backend, &marker, &data).await?;
    assert_load_eq(backend, &marker, 0, 0, &data).await?;
    assert_load_eq(backend, &marker, 1, 0, &data[..1]).await?;

    let info = backend.stat(&marker).await.context("stat config")?;
    if info.size != data.len() as u64 {
        anyhow::bail!("config size {} != {}", info.size, data.len());
    }

    backend.remove(&marker).await.context("removing config")?;
    assert_absent(backend, &marker, ctx.wait()).await
}

async fn load<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;

    expect_invalid_handle(
        backend.load(&Handle::new(FileType::Data, ""), 0, 0).await,
        "load with empty name",
    )?;
    let missing = Handle::new(FileType::Data, random_name());
    expect_not_found(backend.load(&missing, 0, 0).await, "load of missing object")?;

    let size = random_len(payload_len(ctx.minimal()));
    let data = random_bytes(size);
    let handle = Handle::new(FileType::Data, random_name());
    scratch.save(backend, &handle, &data).await?;

    assert_load_eq(backend, &handle, 0, 0, &data).await?;

    let rounds = if ctx.minimal() { 10 } else { 50 };
    for _ in 0..rounds {
        let (offset, length) = random_window(size);
        let start = offset as usize;
        let expected = if length == 0 {
            &data[start..]
        } else {
            &data[start..start + length]
        };
        assert_load_eq(backend, &handle, length, offset, expected).await?;
    }

    // A window running past the end is cut short.
    let tail = size - 1;
    assert_load_eq(backend, &handle, 16, tail as u64, &data[tail..]).await?;

    match backend.load(&handle, 1, size as u64 + 1).await {
        Err(BackendError::InvalidRange { .. }) => {}
        Err(err) => anyhow::bail!("offset past end: expected invalid range, got {err}"),
        Ok(got) => anyhow::bail!("offset past end returned {} bytes", got.len()),
    }

    backend.remove(&handle).await.context("removing object")?;
    Ok(())
}

async fn list<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;
    let count = if ctx.minimal() { 5 } else { 20 };

    let mut handles = Vec::with_capacity(count);
    let mut expected = BTreeSet::new();
    for _ in 0..count {
        let data = random_bytes(random_len(1024));
        let handle = Handle::new(FileType::Data, random_name());
        scratch.save(backend, &handle, &data).await?;
        expected.insert((handle.name.clone(), data.len() as u64));
        handles.push(handle);
    }
    assert_listing(backend, FileType::Data, &expected).await?;

    for handle in &handles {
        backend
            .remove(handle)
            .await
            .with_context(|| format!("removing {handle}"))?;
    }
    if !ctx.wait().is_zero() {
        tokio::time::sleep(ctx.wait()).await;
    }
    assert_listing(backend, FileType::Data, &BTreeSet::new()).await
}

async fn save<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;

    expect_invalid_handle(
        backend.save(&Handle::new(FileType::Data, ""), b"x").await,
        "save with empty name",
    )?;

    let sizes = [0, 1, 4095, random_len(payload_len(ctx.minimal()))];
    for size in sizes {
        let data = random_bytes(size);
        let handle = Handle::new(FileType::Data, random_name());
        scratch.save(backend, &handle, &data).await?;

        let info = backend
            .stat(&handle)
            .await
            .with_context(|| format!("stat {handle}"))?;
        if info.size != size as u64 {
            anyhow::bail!("stat of {handle}: size {} != {size}", info.size);
        }
        assert_load_eq(backend, &handle, 0, 0, &data).await?;

        backend
            .remove(&handle)
            .await
            .with_context(|| format!("removing {handle}"))?;
    }
    Ok(())
}

async fn reopen<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;
    let data = random_bytes(random_len(4096));
    let handle = Handle::new(FileType::Snapshot, random_name());
    scratch.save(backend, &handle, &data).await?;

    let reopened = ctx
        .binding
        .open(ctx.config)
        .await
        .context("open of an existing namespace")?;
    let observed = async {
        assert_present(&*reopened, &handle).await?;
        assert_load_eq(&*reopened, &handle, 0, 0, &data).await
    }
    .await;
    reopened.close().await.context("closing reopened handle")?;
    observed.context("reopened handle")?;

    // The first handle is unaffected by the second session.
    assert_load_eq(backend, &handle, 0, 0, &data).await
}

async fn backend_roundtrip<B: BackendBinding>(
    ctx: &CaseContext<'_, B>,
    scratch: &mut Scratch,
) -> Result<()> {
    let backend = ctx.backend;
    for kind in FileType::NAMED {
        let data = random_bytes(random_len(2048));
        let handle = Handle::new(kind, random_name());

        assert_absent(backend, &handle, Duration::ZERO).await?;
        scratch.save(backend, &handle, &data).await?;
        assert_present(backend, &handle).await?;

        let info = backend
            .stat(&handle)
            .await
            .with_context(|| format!("stat {handle}"))?;
        if info.size != data.len() as u64 {
            anyhow::bail!("stat of {handle}: size {} != {}", info.size, data.len());
        }

        let listed = backend
            .list(kind)
            .await
            .with_context(|| format!("list {kind}"))?;
        if !listed.iter().any(|item| item.name == handle.name) {
            anyhow::bail!("list of {kind} is missing {}", handle.name);
        }

        backend
            .remove(&handle)
            .await
            .with_context(|| format!("removing {handle}"))?;
        assert_absent(backend, &handle, ctx.wait()).await?;
        backend
            .remove(&handle)
            .await
            .with_context(|| format!("second removal of {handle}"))?;
    }
    Ok(())
}

async fn delete<B: BackendBinding>(ctx: &CaseContext<'_, B>, scratch: &mut Scratch) -> Result<()> {
    let backend = ctx.backend;
    scratch.save(backend, &Handle::config(), b"config").await?;
    for kind in FileType::NAMED {
        let handle = Handle::new(kind, random_name());
        scratch
            .save(backend, &handle, &random_bytes(random_len(512)))
            .await?;
    }

    backend.delete_all().await.context("bulk delete")?;
    if !ctx.wait().is_zero() {
        tokio::time::sleep(ctx.wait()).await;
    }

    for kind in FileType::NAMED {
        assert_listing(backend, kind, &BTreeSet::new()).await?;
    }
    assert_absent(backend, &Handle::config(), Duration::ZERO).await?;

    backend
        .delete_all()
        .await
        .context("bulk delete of an empty namespace")
}
