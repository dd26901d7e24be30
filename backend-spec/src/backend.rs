use crate::capabilities::Capabilities;
use crate::error::{BackendError, BackendResult};
use crate::handle::{FileInfo, FileType, Handle};
use async_trait::async_trait;
use std::sync::Arc;

/// Storage interface implemented by every transport backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable location of the namespace, e.g. `gs:bucket:/prefix`.
    fn location(&self) -> String;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Reports whether the object exists. Never mutates state.
    async fn test(&self, handle: &Handle) -> BackendResult<bool>;

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()>;

    /// Reads `length` bytes starting at `offset`; `length == 0` reads to the end.
    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>>;

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo>;

    /// Removes a single object. Absent objects are not an error.
    async fn remove(&self, handle: &Handle) -> BackendResult<()>;

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>>;

    /// Removes every object in the namespace. Only meaningful when
    /// [`Capabilities::bulk_delete`] is declared.
    async fn delete_all(&self) -> BackendResult<()> {
        Err(BackendError::Unsupported("bulk delete"))
    }

    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T> Backend for Arc<T>
where
    T: Backend + ?Sized,
{
    fn location(&self) -> String {
        (**self).location()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        (**self).test(handle).await
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        (**self).save(handle, data).await
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        (**self).load(handle, length, offset).await
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        (**self).stat(handle).await
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        (**self).remove(handle).await
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        (**self).list(kind).await
    }

    async fn delete_all(&self) -> BackendResult<()> {
        (**self).delete_all().await
    }

    async fn close(&self) -> BackendResult<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<T> Backend for Box<T>
where
    T: Backend + ?Sized,
{
    fn location(&self) -> String {
        (**self).location()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        (**self).test(handle).await
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        (**self).save(handle, data).await
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        (**self).load(handle, length, offset).await
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        (**self).stat(handle).await
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        (**self).remove(handle).await
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        (**self).list(kind).await
    }

    async fn delete_all(&self) -> BackendResult<()> {
        (**self).delete_all().await
    }

    async fn close(&self) -> BackendResult<()> {
        (**self).close().await
    }
}
