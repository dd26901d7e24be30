use anyhow::{Context, Result};
use backend_spec::{Backend, BackendError, BackendResult, FileType, Handle};
use std::collections::BTreeSet;
use std::time::Duration;

pub async fn assert_present(backend: &dyn Backend, handle: &Handle) -> Result<()> {
    let found = backend
        .test(handle)
        .await
        .with_context(|| format!("test failed for {handle}"))?;
    if !found {
        anyhow::bail!("expected {handle} to exist");
    }
    Ok(())
}

/// Checks absence, first giving eventually consistent backends `wait` to catch up.
pub async fn assert_absent(backend: &dyn Backend, handle: &Handle, wait: Duration) -> Result<()> {
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
    let found = backend
        .test(handle)
        .await
        .with_context(|| format!("test failed for {handle}"))?;
    if found {
        anyhow::bail!("expected {handle} to be gone");
    }
    Ok(())
}

pub async fn assert_load_eq(
    backend: &dyn Backend,
    handle: &Handle,
    length: usize,
    offset: u64,
    expected: &[u8],
) -> Result<()> {
    let actual = backend
        .load(handle, length, offset)
        .await
        .with_context(|| format!("load failed for {handle} (length {length}, offset {offset})"))?;
    if actual != expected {
        anyhow::bail!(
            "content mismatch for {handle} at offset {offset}: got {} bytes, want {}",
            actual.len(),
            expected.len()
        );
    }
    Ok(())
}

/// The listing of `kind` must contain exactly `expected` (name, size) pairs.
pub async fn assert_listing(
    backend: &dyn Backend,
    kind: FileType,
    expected: &BTreeSet<(String, u64)>,
) -> Result<()> {
    let listed: BTreeSet<(String, u64)> = backend
        .list(kind)
        .await
        .with_context(|| format!("list failed for {kind}"))?
        .into_iter()
        .map(|info| (info.name, info.size))
        .collect();
    if &listed != expected {
        let missing: Vec<_> = expected.difference(&listed).map(|(n, _)| n).collect();
        let extra: Vec<_> = listed.difference(expected).map(|(n, _)| n).collect();
        anyhow::bail!("listing of {kind} differs: missing {missing:?}, unexpected {extra:?}");
    }
    Ok(())
}

pub fn expect_not_found<T>(result: BackendResult<T>, what: &str) -> Result<()> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => anyhow::bail!("{what}: expected not found, got {err}"),
        Ok(_) => anyhow::bail!("{what}: expected not found, call succeeded"),
    }
}

pub fn expect_invalid_handle<T>(result: BackendResult<T>, what: &str) -> Result<()> {
    match result {
        Err(BackendError::InvalidHandle(_)) => Ok(()),
        Err(err) => anyhow::bail!("{what}: expected invalid handle, got {err}"),
        Ok(_) => anyhow::bail!("{what}: expected invalid handle, call succeeded"),
    }
}
