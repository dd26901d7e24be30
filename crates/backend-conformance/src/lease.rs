use crate::namespace::Namespace;
use crate::outcome::{HarnessError, TeardownOutcome};
use backend_spec::{Backend, BackendResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Holds a run's backend handle and guarantees its namespace is torn down.
///
/// The normal path is [`BackendLease::release`]. If the lease is dropped
/// without being released (the run future was cancelled), teardown is spawned
/// on the current runtime as a best-effort fallback.
pub(crate) struct BackendLease {
    backend: Arc<dyn Backend>,
    bulk_delete: bool,
    namespace: Namespace,
    grace: Duration,
    released: bool,
}

impl BackendLease {
    pub(crate) fn new(backend: Box<dyn Backend>, namespace: Namespace, grace: Duration) -> Self {
        let bulk_delete = backend.capabilities().bulk_delete;
        if !bulk_delete {
            warn!(%namespace, "backend does not support bulk delete; namespace will be left behind");
        }
        Self {
            backend: Arc::from(backend),
            bulk_delete,
            namespace,
            grace,
            released: false,
        }
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    /// Tears the namespace down within the grace period.
    pub(crate) async fn release(mut self) -> (TeardownOutcome, Option<HarnessError>) {
        self.released = true;
        let pending = teardown(&*self.backend, self.bulk_delete);

        match tokio::time::timeout(self.grace, pending).await {
            Ok(Ok(outcome)) => {
                info!(namespace = %self.namespace, ?outcome, "teardown finished");
                (outcome, None)
            }
            Ok(Err(err)) => {
                warn!(namespace = %self.namespace, %err, "teardown failed");
                (
                    TeardownOutcome::Failed(err.to_string()),
                    Some(HarnessError::Teardown(err)),
                )
            }
            Err(_) => {
                warn!(
                    namespace = %self.namespace,
                    grace = ?self.grace,
                    "teardown exceeded grace period; abandoning namespace"
                );
                (
                    TeardownOutcome::Abandoned,
                    Some(HarnessError::TeardownAbandoned {
                        namespace: self.namespace.to_string(),
                        grace: self.grace,
                    }),
                )
            }
        }
    }

    /// Closes the handle and leaves the namespace untouched.
    ///
    /// Used when the namespace turned out to hold data this run did not create.
    pub(crate) async fn close_only(mut self) -> TeardownOutcome {
        self.released = true;
        match tokio::time::timeout(self.grace, self.backend.close()).await {
            Ok(Ok(())) => {
                info!(namespace = %self.namespace, "namespace not ours; closed without teardown")
            }
            Ok(Err(err)) => debug!(namespace = %self.namespace, %err, "close failed"),
            Err(_) => debug!(namespace = %self.namespace, "close exceeded grace period"),
        }
        TeardownOutcome::NotAttempted
    }
}

async fn teardown(backend: &dyn Backend, bulk_delete: bool) -> BackendResult<TeardownOutcome> {
    let outcome = if bulk_delete {
        backend
            .delete_all()
            .await
            .map(|()| TeardownOutcome::Completed)
    } else {
        Ok(TeardownOutcome::Unsupported)
    };
    // The handle is closed whether or not the delete went through.
    if let Err(err) = backend.close().await {
        debug!(%err, "close after teardown failed");
    }
    outcome
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let namespace = self.namespace.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%namespace, "run cancelled outside a runtime; namespace abandoned");
            return;
        };
        warn!(%namespace, "run cancelled; tearing down in the background");
        let backend = Arc::clone(&self.backend);
        let bulk_delete = self.bulk_delete;
        let grace = self.grace;
        runtime.spawn(async move {
            match tokio::time::timeout(grace, teardown(&*backend, bulk_delete)).await {
                Ok(Ok(_)) => debug!(%namespace, "background teardown finished"),
                Ok(Err(err)) => warn!(%namespace, %err, "background teardown failed"),
                Err(_) => warn!(%namespace, "background teardown abandoned"),
            }
        });
    }
}
