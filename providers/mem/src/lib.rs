//! In-memory backend.
//!
//! All handles created from the same [`MemStore`] see the same objects, so a
//! backend opened after another one was closed still observes what was written.

use async_trait::async_trait;
use backend_spec::layout::{kind_prefix, name_from_key, object_path, window};
use backend_spec::{Backend, BackendError, BackendResult, Capabilities, FileInfo, FileType, Handle};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Object storage shared between backend handles.
#[derive(Clone, Default)]
pub struct MemStore {
    objects: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of objects across all namespaces.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Keys of every object below `prefix/`.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let root = format!("{}/", prefix.trim_end_matches('/'));
        self.objects
            .read()
            .range(root.clone()..)
            .take_while(|(key, _)| key.starts_with(&root))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// A handle onto one namespace of a [`MemStore`].
#[derive(Clone)]
pub struct MemBackend {
    store: MemStore,
    prefix: String,
}

impl MemBackend {
    pub fn new(store: MemStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, handle: &Handle) -> BackendResult<String> {
        object_path(&self.prefix, handle)
    }
}

#[async_trait]
impl Backend for MemBackend {
    fn location(&self) -> String {
        format!("mem:{}", self.prefix)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_bulk_delete()
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        let key = self.key(handle)?;
        Ok(self.store.objects.read().contains_key(&key))
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        let key = self.key(handle)?;
        self.store.objects.write().insert(key, data.to_vec());
        Ok(())
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        let key = self.key(handle)?;
        let objects = self.store.objects.read();
        let data = objects
            .get(&key)
            .ok_or_else(|| BackendError::not_found(handle.to_string()))?;
        window(handle, data, length, offset)
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        let key = self.key(handle)?;
        let objects = self.store.objects.read();
        let data = objects
            .get(&key)
            .ok_or_else(|| BackendError::not_found(handle.to_string()))?;
        Ok(FileInfo::new(handle.name.clone(), data.len() as u64))
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        let key = self.key(handle)?;
        self.store.objects.write().remove(&key);
        Ok(())
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        let prefix = kind_prefix(&self.prefix, kind);
        let objects = self.store.objects.read();
        let listed = match kind {
            FileType::Config => objects
                .get(&prefix)
                .map(|data| vec![FileInfo::new("", data.len() as u64)])
                .unwrap_or_default(),
            _ => objects
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, data)| FileInfo::new(name_from_key(kind, key), data.len() as u64))
                .collect(),
        };
        Ok(listed)
    }

    async fn delete_all(&self) -> BackendResult<()> {
        let keys = self.store.keys_under(&self.prefix);
        let mut objects = self.store.objects.write();
        for key in keys {
            objects.remove(&key);
        }
        Ok(())
    }
}
