use crate::env::EnvSource;
use crate::namespace::Namespace;
use crate::outcome::HarnessError;
use crate::settings::Tuning;
use async_trait::async_trait;
use backend_spec::{Backend, BackendError, BackendResult, ConfigError, Handle};
use std::fmt;
use tracing::debug;

/// Glue that lets the shared suite drive one concrete backend.
#[async_trait]
pub trait BackendBinding: Send + Sync {
    type Config: Clone + fmt::Debug + Send + Sync + 'static;

    /// Short name used in run names, e.g. `gs`.
    fn name(&self) -> &str;

    /// Variables that must be set before the run touches anything, in check order.
    fn required_vars(&self) -> &[&'static str] {
        &[]
    }

    fn tuning(&self) -> Tuning {
        Tuning::default()
    }

    /// Builds a configuration for a fresh temporary backend living in `namespace`.
    fn new_config(
        &self,
        env: &dyn EnvSource,
        namespace: &Namespace,
    ) -> Result<Self::Config, ConfigError>;

    /// Initializes a new backend instance.
    async fn create(&self, config: &Self::Config) -> BackendResult<Box<dyn Backend>>;

    /// Attaches to a previously created instance without initializing anything.
    async fn open(&self, config: &Self::Config) -> BackendResult<Box<dyn Backend>>;
}

/// A create that failed after a handle was already established.
pub struct CreateFailure {
    pub error: HarnessError,
    pub leftover: Option<Box<dyn Backend>>,
}

impl fmt::Debug for CreateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateFailure")
            .field("error", &self.error)
            .field("leftover", &self.leftover.as_ref().map(|be| be.location()))
            .finish()
    }
}

/// Initializes a backend, mapping a native collision to [`HarnessError::AlreadyExists`].
pub async fn create_backend<B>(
    binding: &B,
    config: &B::Config,
) -> Result<Box<dyn Backend>, HarnessError>
where
    B: BackendBinding + ?Sized,
{
    binding.create(config).await.map_err(|err| match err {
        BackendError::AlreadyExists { what } => HarnessError::AlreadyExists { location: what },
        other => HarnessError::Connectivity(other),
    })
}

/// Fails with [`HarnessError::AlreadyExists`] if the config marker is present.
pub async fn ensure_fresh(backend: &dyn Backend) -> Result<(), HarnessError> {
    match backend.test(&Handle::config()).await {
        Ok(false) => {
            debug!(location = %backend.location(), "namespace is fresh");
            Ok(())
        }
        Ok(true) => Err(HarnessError::AlreadyExists {
            location: backend.location(),
        }),
        Err(err) => Err(HarnessError::Connectivity(err)),
    }
}

/// Creates a backend and verifies that no config marker exists in its namespace.
pub async fn create_fresh<B>(
    binding: &B,
    config: &B::Config,
) -> Result<Box<dyn Backend>, CreateFailure>
where
    B: BackendBinding + ?Sized,
{
    let backend = create_backend(binding, config)
        .await
        .map_err(|error| CreateFailure {
            error,
            leftover: None,
        })?;
    match ensure_fresh(&*backend).await {
        Ok(()) => Ok(backend),
        Err(error) => Err(CreateFailure {
            error,
            leftover: Some(backend),
        }),
    }
}
