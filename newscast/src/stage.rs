//! Primary/fallback execution shared by summarization, synthesis and delivery.
//!
//! A stage tries its primary path once. On failure the failure is logged and
//! the fallback runs once. Which branch produced the value is always returned
//! so callers can report it; only a failure of both paths escapes as an error.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, warn};

/// Failure classes reported by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// Dependency not configured (missing credentials, disabled, no input)
    Unavailable,
    Timeout,
    Http,
    InvalidResponse,
    Io,
    Internal,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::Http => "http",
            Self::InvalidResponse => "invalid_response",
            Self::Io => "io",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

pub type StageResult<T> = std::result::Result<T, StageError>;

impl StageError {
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Unavailable, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::InvalidResponse, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Internal, message)
    }

    /// Classify an error chain coming out of `anyhow`-based client code.
    ///
    /// Request URLs are stripped from reqwest errors: they can carry
    /// credentials (bot tokens in the path, API keys in the query).
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut context = Vec::new();
        for cause in err.chain() {
            if cause.is::<tokio::time::error::Elapsed>() {
                return Self::new(StageErrorKind::Timeout, format!("{:#}", err));
            }
            if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
                return Self::from_reqwest(&context, e);
            }
            if cause.is::<std::io::Error>() {
                return Self::new(StageErrorKind::Io, format!("{:#}", err));
            }
            if cause.is::<serde_json::Error>() {
                return Self::new(StageErrorKind::InvalidResponse, format!("{:#}", err));
            }
            context.push(cause.to_string());
        }
        Self::new(StageErrorKind::Internal, format!("{:#}", err))
    }

    /// reqwest's `Display` already includes its sources, so the chain stops here.
    fn from_reqwest(context: &[String], e: &reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            StageErrorKind::Timeout
        } else if e.is_decode() {
            StageErrorKind::InvalidResponse
        } else {
            StageErrorKind::Http
        };

        let mut text = e.to_string();
        if let Some(url) = e.url() {
            text = text.replace(&format!(" for url ({})", url.as_str()), "");
            text = text.replace(url.as_str(), "<redacted>");
        }

        let mut parts = context.to_vec();
        parts.push(text);
        Self::new(kind, parts.join(": "))
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        Self::from_reqwest(&[], &err.without_url())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(StageErrorKind::Io, err.to_string())
    }
}

/// Which path produced a stage's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    Primary,
    Fallback,
}

/// Value produced by a stage plus the branch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub branch: Branch,
    /// Why the primary path was abandoned, when it was
    pub primary_error: Option<StageError>,
}

impl<T> Resolved<T> {
    pub fn used_fallback(&self) -> bool {
        self.branch == Branch::Fallback
    }
}

/// Run `primary`; on failure run `fallback`. No retries beyond these two attempts.
///
/// `fallback` is only constructed when needed. If it also fails, the returned
/// error carries the fallback's kind and both messages.
pub async fn with_fallback<T, P, F, Fut>(stage: &str, primary: P, fallback: F) -> StageResult<Resolved<T>>
where
    P: Future<Output = StageResult<T>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = StageResult<T>>,
{
    let primary_error = match primary.await {
        Ok(value) => {
            debug!(stage, "primary path succeeded");
            return Ok(Resolved {
                value,
                branch: Branch::Primary,
                primary_error: None,
            });
        }
        Err(e) => e,
    };

    warn!(stage, kind = %primary_error.kind, "primary path failed: {}, using fallback", primary_error.message);

    match fallback().await {
        Ok(value) => Ok(Resolved {
            value,
            branch: Branch::Fallback,
            primary_error: Some(primary_error),
        }),
        Err(fallback_error) => {
            warn!(stage, kind = %fallback_error.kind, "fallback path failed: {}", fallback_error.message);
            Err(StageError::new(
                fallback_error.kind,
                format!(
                    "{} failed: primary ({}), fallback ({})",
                    stage, primary_error, fallback_error
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let fallback_calls = AtomicUsize::new(0);
        let resolved = with_fallback("test", async { Ok::<_, StageError>(1) }, || {
            fallback_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(2) }
        })
        .await
        .unwrap();

        assert_eq!(resolved.value, 1);
        assert_eq!(resolved.branch, Branch::Primary);
        assert!(resolved.primary_error.is_none());
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn primary_failure_uses_fallback_and_keeps_reason() {
        let resolved = with_fallback(
            "test",
            async { Err::<i32, _>(StageError::new(StageErrorKind::Timeout, "slow")) },
            || async { Ok(2) },
        )
        .await
        .unwrap();

        assert_eq!(resolved.value, 2);
        assert!(resolved.used_fallback());
        assert_eq!(resolved.primary_error.map(|e| e.kind), Some(StageErrorKind::Timeout));
    }

    #[tokio::test]
    async fn both_failing_propagates_error() {
        let err = with_fallback(
            "speech",
            async { Err::<i32, _>(StageError::unavailable("no key")) },
            || async { Err(StageError::new(StageErrorKind::Io, "disk full")) },
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, StageErrorKind::Io);
        assert!(err.message.contains("no key"));
        assert!(err.message.contains("disk full"));
        assert!(err.message.starts_with("speech failed"));
    }

    #[test]
    fn classifies_timeouts_and_io() {
        let io = anyhow::Error::new(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
            .context("reading podcast");
        assert_eq!(StageError::from_anyhow(&io).kind, StageErrorKind::Io);

        let plain = anyhow::anyhow!("LLM API error 500");
        assert_eq!(StageError::from_anyhow(&plain).kind, StageErrorKind::Internal);
    }

    #[tokio::test]
    async fn reqwest_errors_drop_url_and_are_not_repeated() {
        let err = reqwest::Client::new()
            .post("http://127.0.0.1:1/botSECRET/sendMessage?key=KEY")
            .send()
            .await
            .unwrap_err();
        let wrapped = anyhow::Error::new(err).context("sending to Telegram");

        let classified = StageError::from_anyhow(&wrapped);
        assert_eq!(classified.kind, StageErrorKind::Http);
        assert!(classified.message.starts_with("sending to Telegram: error sending request"));
        assert_eq!(classified.message.matches("error sending request").count(), 1);
        assert!(!classified.message.contains("SECRET"), "{}", classified.message);
        assert!(!classified.message.contains("KEY"), "{}", classified.message);
    }

    #[tokio::test]
    async fn classifies_elapsed_as_timeout() {
        let elapsed = tokio::time::timeout(std::time::Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let err = anyhow::Error::new(elapsed).context("LLM request timed out");
        assert_eq!(StageError::from_anyhow(&err).kind, StageErrorKind::Timeout);
    }
}
