use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_LABEL: &str = "test";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Prefix that scopes every object a single run creates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces collision-free namespaces without a shared allocator.
///
/// Tokens look like `{label}-{unix_nanos}-{pid}-{seq}-{random}`. The process-wide
/// sequence separates tokens minted within the same clock tick; pid and the
/// random suffix separate concurrently running processes.
#[derive(Debug, Clone)]
pub struct NamespaceGenerator {
    label: String,
}

impl Default for NamespaceGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL)
    }
}

impl NamespaceGenerator {
    pub fn new(label: impl Into<String>) -> Self {
        let label = sanitize(&label.into());
        Self { label }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn next(&self) -> Namespace {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.compose(nanos, std::process::id(), seq)
    }

    fn compose(&self, nanos: u128, pid: u32, seq: u64) -> Namespace {
        let salt: u32 = rand::rng().random();
        Namespace(format!("{}-{nanos}-{pid}-{seq}-{salt:08x}", self.label))
    }
}

/// Keeps labels safe for bucket prefixes and directory names.
fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            'a'..='z' | '0'..='9' | '-' | '_' | '.' => out.push(ch),
            'A'..='Z' => out.push(ch.to_ascii_lowercase()),
            _ => out.push('-'),
        }
    }
    if out.is_empty() {
        DEFAULT_LABEL.into()
    } else {
        out
    }
}
