use backend_spec::{BackendError, BackendResult, ConfigError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const SCHEME: &str = "gs:";
pub const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_CONNECTIONS: usize = 5;

/// Connection settings for one prefix inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsConfig {
    pub project_id: String,
    /// File holding a bearer token, either raw or as `{"access_token": ...}`.
    pub credentials: PathBuf,
    pub bucket: String,
    pub prefix: String,
    pub endpoint: Url,
    /// Upper bound on concurrent requests during bulk deletes.
    pub connections: usize,
}

impl GsConfig {
    /// Builds a configuration from a `gs:bucket:/prefix` descriptor.
    pub fn new(
        project_id: impl Into<String>,
        credentials: impl Into<PathBuf>,
        descriptor: &str,
    ) -> Result<Self, ConfigError> {
        let (bucket, prefix) = parse_descriptor(descriptor)?;
        Ok(Self {
            project_id: project_id.into(),
            credentials: credentials.into(),
            bucket,
            prefix,
            endpoint: parse_endpoint(DEFAULT_ENDPOINT)?,
            connections: DEFAULT_CONNECTIONS,
        })
    }

    /// Same bucket, different prefix.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Points the client at another JSON API endpoint, e.g. a local emulator.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        self.endpoint = parse_endpoint(endpoint)?;
        Ok(self)
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    pub fn location(&self) -> String {
        format!("{SCHEME}{}:/{}", self.bucket, self.prefix)
    }
}

fn parse_descriptor(input: &str) -> Result<(String, String), ConfigError> {
    let rest = input
        .strip_prefix(SCHEME)
        .ok_or_else(|| ConfigError::malformed(input, "expected gs:bucket:/prefix"))?;
    let (bucket, prefix) = rest
        .split_once(':')
        .ok_or_else(|| ConfigError::malformed(input, "missing ':' after the bucket name"))?;
    if bucket.is_empty() {
        return Err(ConfigError::malformed(input, "bucket name is empty"));
    }
    let valid = bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(ConfigError::malformed(
            input,
            "bucket name contains invalid characters",
        ));
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(endpoint)
        .map_err(|err| ConfigError::invalid_value("endpoint", endpoint, err.to_string()))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid_value(
            "endpoint",
            endpoint,
            "expected an http or https URL",
        ));
    }
    Ok(url)
}

#[derive(Deserialize)]
struct TokenDocument {
    access_token: String,
}

/// Extracts the bearer token from the contents of a credentials file.
pub fn parse_token(contents: &str) -> Result<String, String> {
    let trimmed = contents.trim();
    let token = if trimmed.starts_with('{') {
        serde_json::from_str::<TokenDocument>(trimmed)
            .map_err(|err| format!("invalid credentials document: {err}"))?
            .access_token
    } else {
        trimmed.to_string()
    };
    let token = token.trim();
    if token.is_empty() {
        return Err("no access token present".into());
    }
    if token.contains(char::is_whitespace) {
        return Err("access token contains whitespace".into());
    }
    Ok(token.to_string())
}

pub(crate) async fn load_token(path: &Path) -> BackendResult<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| BackendError::Credential(format!("{}: {err}", path.display())))?;
    parse_token(&contents)
        .map_err(|reason| BackendError::Credential(format!("{}: {reason}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(descriptor: &str) -> Result<GsConfig, ConfigError> {
        GsConfig::new("proj", "/tmp/token", descriptor)
    }

    #[test]
    fn parses_bucket_and_prefix() {
        let cfg = config("gs:backups:/nightly/repo/").unwrap();
        assert_eq!(cfg.bucket, "backups");
        assert_eq!(cfg.prefix, "nightly/repo");
        assert_eq!(cfg.endpoint.as_str(), "https://storage.googleapis.com/");
        assert_eq!(cfg.location(), "gs:backups:/nightly/repo");

        let root = config("gs:backups:").unwrap();
        assert_eq!(root.prefix, "");
    }

    #[test]
    fn rejects_malformed_descriptors() {
        for input in ["s3:bucket:/x", "gs:bucket", "gs::/x", "gs:Bad Bucket:/x"] {
            assert!(
                matches!(config(input), Err(ConfigError::Malformed { .. })),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn namespace_replaces_prefix() {
        let cfg = config("gs:backups:/shared").unwrap().with_prefix("/test-1-2/");
        assert_eq!(cfg.prefix, "test-1-2");
        assert_eq!(cfg.location(), "gs:backups:/test-1-2");
    }

    #[test]
    fn endpoint_must_be_http() {
        let cfg = config("gs:b:/p")
            .unwrap()
            .with_endpoint("http://127.0.0.1:4443/")
            .unwrap();
        assert_eq!(cfg.endpoint.port(), Some(4443));

        for bad in ["not a url", "mailto:ops@example.com", "ftp://host/"] {
            assert!(matches!(
                config("gs:b:/p").unwrap().with_endpoint(bad),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn token_file_formats() {
        assert_eq!(parse_token("ya29.abc\n").unwrap(), "ya29.abc");
        assert_eq!(
            parse_token(r#"{"access_token": "ya29.def", "expires_in": 3599}"#).unwrap(),
            "ya29.def"
        );
        assert!(parse_token("   ").is_err());
        assert!(parse_token(r#"{"token_type": "Bearer"}"#).is_err());
        assert!(parse_token("two words").is_err());
    }

    #[tokio::test]
    async fn missing_credentials_file_is_a_credential_error() {
        let err = load_token(Path::new("/nonexistent/credentials.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Credential(_)));
    }
}
