//! Session credential boundary
//!
//! The review API only answers requests carrying cookies from a real browser
//! session. Obtaining them is interactive and happens outside this crate;
//! providers here only read an already captured cookie set.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

/// Environment variable read by [`EnvCredentialProvider`]
pub const COOKIE_ENV_VAR: &str = "HARVEST_COOKIE";

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No session cookie available: {0}")]
    Missing(String),

    #[error("Failed to read cookie file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cookie file {path} is not a cookie string or cookie list: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

/// Opaque session credential threaded into every request
#[derive(Clone)]
pub struct Credential {
    cookie_header: String,
    user_agent: Option<String>,
    acquired_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(cookie_header: impl Into<String>) -> Self {
        Self {
            cookie_header: cookie_header.into(),
            user_agent: None,
            acquired_at: Utc::now(),
        }
    }

    /// User agent of the browser the cookies were captured in
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub fn cookie_header(&self) -> &str {
        &self.cookie_header
    }

    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Number of `name=value` pairs in the cookie header
    #[must_use]
    pub fn cookie_count(&self) -> usize {
        self.cookie_header
            .split(';')
            .filter(|pair| pair.contains('='))
            .count()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("cookies", &format_args!("<{} redacted>", self.cookie_count()))
            .field("user_agent", &self.user_agent)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

/// Supplies the session credential once per run
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, CredentialError>;
}

/// Credential given up front, e.g. from `--cookie`
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    #[must_use]
    pub const fn new(credential: Credential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        Ok(self.credential.clone())
    }
}

/// Reads the cookie header from [`COOKIE_ENV_VAR`]
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        match std::env::var(COOKIE_ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => Ok(Credential::new(value.trim())),
            _ => Err(CredentialError::Missing(format!("{COOKIE_ENV_VAR} is not set"))),
        }
    }
}

/// Reads a cookie file exported from the browser session. Accepts either a
/// raw `name=value; name2=value2` header or a JSON array of cookie objects.
#[derive(Debug, Clone)]
pub struct CookieFileProvider {
    path: PathBuf,
}

#[derive(Deserialize)]
struct ExportedCookie {
    name: String,
    value: String,
}

impl CookieFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(&self, content: &str) -> Result<String, CredentialError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(CredentialError::Missing(format!("{} is empty", self.path.display())));
        }

        if trimmed.starts_with('[') {
            let cookies: Vec<ExportedCookie> =
                serde_json::from_str(trimmed).map_err(|e| CredentialError::Malformed {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })?;
            if cookies.is_empty() {
                return Err(CredentialError::Missing(format!("{} lists no cookies", self.path.display())));
            }
            return Ok(cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "));
        }

        if !trimmed.contains('=') {
            return Err(CredentialError::Malformed {
                path: self.path.clone(),
                reason: "expected name=value pairs".to_string(),
            });
        }
        Ok(trimmed.lines().map(str::trim).collect::<Vec<_>>().join(" "))
    }
}

#[async_trait]
impl CredentialProvider for CookieFileProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CredentialError::Io {
                path: self.path.clone(),
                source,
            })?;
        let credential = Credential::new(self.parse(&content)?);
        info!(cookies = credential.cookie_count(), path = %self.path.display(), "🍪 loaded session cookies");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_cookies() {
        let credential = Credential::new("session=secret-value; other=x");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("secret-value"));
        assert!(rendered.contains("<2 redacted>"));
    }

    #[tokio::test]
    async fn reads_browser_exported_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, r#"[{"name":"a","value":"1","domain":".example"},{"name":"b","value":"2"}]"#).unwrap();

        let credential = CookieFileProvider::new(&path).acquire().await.unwrap();
        assert_eq!(credential.cookie_header(), "a=1; b=2");
    }

    #[tokio::test]
    async fn reads_raw_cookie_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "a=1; b=2\n").unwrap();

        let credential = CookieFileProvider::new(&path).acquire().await.unwrap();
        assert_eq!(credential.cookie_header(), "a=1; b=2");
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, "not a cookie").unwrap();

        let err = CookieFileProvider::new(&path).acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::Malformed { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = CookieFileProvider::new("/definitely/not/here.txt").acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::Io { .. }));
    }
}
