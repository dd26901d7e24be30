//! Uniform storage backend contract.
//!
//! Every transport (memory, local disk, object stores) implements [`Backend`];
//! the conformance harness only ever talks to this trait.

pub mod backend;
pub mod capabilities;
pub mod error;
pub mod handle;
pub mod layout;

pub use backend::Backend;
pub use capabilities::Capabilities;
pub use error::{BackendError, BackendResult, ConfigError};
pub use handle::{FileInfo, FileType, Handle};
