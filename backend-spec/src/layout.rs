//! Object naming shared by every provider.
//!
//! ```text
//! {prefix}/config
//! {prefix}/data/{name[..2]}/{name}
//! {prefix}/keys/{name}
//! {prefix}/locks/{name}
//! {prefix}/snapshots/{name}
//! {prefix}/index/{name}
//! ```

use crate::error::{BackendError, BackendResult};
use crate::handle::{FileType, Handle};

const CONFIG_NAME: &str = "config";

/// Directory (relative to the namespace root) holding objects of `kind`.
pub fn dir_name(kind: FileType) -> &'static str {
    match kind {
        FileType::Config => "",
        FileType::Data => "data",
        FileType::Key => "keys",
        FileType::Lock => "locks",
        FileType::Snapshot => "snapshots",
        FileType::Index => "index",
    }
}

/// Path of the object relative to the namespace root, validated.
pub fn relative_path(handle: &Handle) -> BackendResult<String> {
    handle.validate()?;
    let path = match handle.kind {
        FileType::Config => CONFIG_NAME.to_string(),
        FileType::Data => {
            let shard: String = handle.name.chars().take(2).collect();
            format!("{}/{shard}/{}", dir_name(FileType::Data), handle.name)
        }
        kind => format!("{}/{}", dir_name(kind), handle.name),
    };
    Ok(path)
}

/// Full object key under `prefix`. An empty prefix yields the relative path.
pub fn object_path(prefix: &str, handle: &Handle) -> BackendResult<String> {
    let relative = relative_path(handle)?;
    Ok(join(prefix, &relative))
}

/// Listing prefix for `kind` under `prefix`, always ending in `/`.
pub fn kind_prefix(prefix: &str, kind: FileType) -> String {
    match kind {
        FileType::Config => join(prefix, CONFIG_NAME),
        kind => format!("{}/", join(prefix, dir_name(kind))),
    }
}

/// Recovers the object name from a full key produced by [`object_path`].
pub fn name_from_key(kind: FileType, key: &str) -> String {
    match kind {
        FileType::Config => String::new(),
        _ => key.rsplit('/').next().unwrap_or(key).to_string(),
    }
}

fn join(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}

/// Cuts the `(length, offset)` window out of a complete object.
///
/// `length == 0` reads to the end; a window running past the end is truncated.
pub fn window(what: &Handle, data: &[u8], length: usize, offset: u64) -> BackendResult<Vec<u8>> {
    let size = data.len() as u64;
    if offset > size {
        return Err(BackendError::InvalidRange {
            what: what.to_string(),
            offset,
            size,
        });
    }
    let start = offset as usize;
    let end = if length == 0 {
        data.len()
    } else {
        start.saturating_add(length).min(data.len())
    };
    Ok(data[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_objects_are_sharded_by_name() {
        let handle = Handle::new(FileType::Data, "abcdef");
        assert_eq!(
            object_path("test-1", &handle).unwrap(),
            "test-1/data/ab/abcdef"
        );
        assert_eq!(name_from_key(FileType::Data, "test-1/data/ab/abcdef"), "abcdef");
    }

    #[test]
    fn config_lives_at_the_root() {
        assert_eq!(object_path("p/", &Handle::config()).unwrap(), "p/config");
        assert_eq!(object_path("", &Handle::config()).unwrap(), "config");
        assert_eq!(kind_prefix("p", FileType::Snapshot), "p/snapshots/");
    }

    #[test]
    fn window_truncates_and_rejects_past_end() {
        let handle = Handle::new(FileType::Data, "ab");
        let data = b"0123456789";
        assert_eq!(window(&handle, data, 0, 0).unwrap(), data.to_vec());
        assert_eq!(window(&handle, data, 3, 2).unwrap(), b"234".to_vec());
        assert_eq!(window(&handle, data, 100, 8).unwrap(), b"89".to_vec());
        assert!(window(&handle, data, 0, 10).unwrap().is_empty());
        assert!(matches!(
            window(&handle, data, 1, 11),
            Err(BackendError::InvalidRange { offset: 11, size: 10, .. })
        ));
    }
}
