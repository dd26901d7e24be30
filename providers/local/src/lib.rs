//! Backend storing objects as files below a root directory.

use async_trait::async_trait;
use backend_spec::layout::{dir_name, relative_path};
use backend_spec::{
    Backend, BackendError, BackendResult, Capabilities, ConfigError, FileInfo, FileType, Handle,
};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

const SCHEME: &str = "local:";
const TEMP_SUFFIX: &str = ".tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: PathBuf,
}

impl LocalConfig {
    /// Accepts `local:/some/path` or a bare path.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let raw = input.strip_prefix(SCHEME).unwrap_or(input).trim();
        if raw.is_empty() {
            return Err(ConfigError::malformed(input, "path is empty"));
        }
        Ok(Self {
            path: PathBuf::from(raw),
        })
    }

    /// Same backend location, one directory deeper.
    pub fn join(&self, child: &str) -> Self {
        Self {
            path: self.path.join(child),
        }
    }
}

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Initializes the directory tree. Fails if a config marker already exists.
    pub async fn create(config: &LocalConfig) -> BackendResult<Self> {
        let backend = Self {
            root: config.path.clone(),
        };
        let marker = backend.path(&Handle::config())?;
        if fs::try_exists(&marker).await? {
            return Err(BackendError::already_exists(marker.display().to_string()));
        }
        for kind in FileType::NAMED {
            fs::create_dir_all(backend.root.join(dir_name(kind))).await?;
        }
        debug!(root = %backend.root.display(), "local backend created");
        Ok(backend)
    }

    /// Attaches to a root directory. A missing root reads as an empty namespace.
    pub async fn open(config: &LocalConfig) -> BackendResult<Self> {
        match fs::metadata(&config.path).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(BackendError::Io(format!(
                    "{} is not a directory",
                    config.path.display()
                )));
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(root = %config.path.display(), "opening absent root as empty");
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Self {
            root: config.path.clone(),
        })
    }

    fn path(&self, handle: &Handle) -> BackendResult<PathBuf> {
        Ok(self.root.join(relative_path(handle)?))
    }
}

fn not_found_as(handle: &Handle) -> impl FnOnce(std::io::Error) -> BackendError + '_ {
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            BackendError::not_found(handle.to_string())
        } else {
            err.into()
        }
    }
}

async fn list_dir(dir: &Path, out: &mut Vec<FileInfo>) -> BackendResult<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TEMP_SUFFIX) {
            continue;
        }
        out.push(FileInfo::new(name, meta.len()));
    }
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    fn location(&self) -> String {
        format!("{SCHEME}{}", self.root.display())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default().with_bulk_delete()
    }

    async fn test(&self, handle: &Handle) -> BackendResult<bool> {
        let path = self.path(handle)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn save(&self, handle: &Handle, data: &[u8]) -> BackendResult<()> {
        let path = self.path(handle)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut temp = path.clone().into_os_string();
        temp.push(format!("-{}-{seq}{TEMP_SUFFIX}", std::process::id()));
        let temp = PathBuf::from(temp);

        fs::write(&temp, data).await?;
        if let Err(err) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn load(&self, handle: &Handle, length: usize, offset: u64) -> BackendResult<Vec<u8>> {
        let path = self.path(handle)?;
        let mut file = fs::File::open(&path).await.map_err(not_found_as(handle))?;
        let size = file.metadata().await?.len();
        if offset > size {
            return Err(BackendError::InvalidRange {
                what: handle.to_string(),
                offset,
                size,
            });
        }
        let remaining = size - offset;
        let wanted = if length == 0 {
            remaining
        } else {
            remaining.min(length as u64)
        };

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(wanted as usize);
        file.take(wanted).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn stat(&self, handle: &Handle) -> BackendResult<FileInfo> {
        let path = self.path(handle)?;
        let meta = fs::metadata(&path).await.map_err(not_found_as(handle))?;
        Ok(FileInfo::new(handle.name.clone(), meta.len()))
    }

    async fn remove(&self, handle: &Handle) -> BackendResult<()> {
        let path = self.path(handle)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, kind: FileType) -> BackendResult<Vec<FileInfo>> {
        let mut listed = Vec::new();
        match kind {
            FileType::Config => {
                let path = self.path(&Handle::config())?;
                if let Ok(meta) = fs::metadata(&path).await
                    && meta.is_file()
                {
                    listed.push(FileInfo::new("", meta.len()));
                }
            }
            FileType::Data => {
                let dir = self.root.join(dir_name(kind));
                let mut shards = match fs::read_dir(&dir).await {
                    Ok(shards) => shards,
                    Err(err) if err.kind() == ErrorKind::NotFound => return Ok(listed),
                    Err(err) => return Err(err.into()),
                };
                while let Some(shard) = shards.next_entry().await? {
                    if shard.file_type().await?.is_dir() {
                        list_dir(&shard.path(), &mut listed).await?;
                    }
                }
            }
            kind => list_dir(&self.root.join(dir_name(kind)), &mut listed).await?,
        }
        Ok(listed)
    }

    async fn delete_all(&self) -> BackendResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
