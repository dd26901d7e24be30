use crate::error::{BackendError, BackendResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of object stored by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Config,
    Data,
    Key,
    Lock,
    Snapshot,
    Index,
}

impl FileType {
    /// Every kind that is addressed by name (everything but the config marker).
    pub const NAMED: [FileType; 5] = [
        FileType::Data,
        FileType::Key,
        FileType::Lock,
        FileType::Snapshot,
        FileType::Index,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Config => "config",
            FileType::Data => "data",
            FileType::Key => "key",
            FileType::Lock => "lock",
            FileType::Snapshot => "snapshot",
            FileType::Index => "index",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a single object inside a backend namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub kind: FileType,
    pub name: String,
}

impl Handle {
    pub fn new(kind: FileType, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// The repository configuration marker.
    pub fn config() -> Self {
        Self::new(FileType::Config, "")
    }

    pub fn is_config(&self) -> bool {
        self.kind == FileType::Config
    }

    /// Checks that the handle can address an object.
    pub fn validate(&self) -> BackendResult<()> {
        if self.is_config() {
            return Ok(());
        }
        if self.name.is_empty() {
            return Err(BackendError::InvalidHandle(format!(
                "{} handle requires a name",
                self.kind
            )));
        }
        if self.name.contains('/') || self.name == "." || self.name == ".." {
            return Err(BackendError::InvalidHandle(format!(
                "invalid {} name: {}",
                self.kind, self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_config() {
            f.write_str("<config>")
        } else {
            write!(f, "<{}/{}>", self.kind, self.name)
        }
    }
}

/// Name and size of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}
