#![forbid(unsafe_code)]

//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or malformed credentials, unresolved folders, bad settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage list, download or move failure (including local I/O while
    /// writing a download).
    #[error("transfer failed: {context}")]
    Transfer {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("malformed description file: {0}")]
    Format(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error(
        "archiving stopped at {failed}; rolled back {} move(s){}",
        rolled_back.len(),
        rollback_suffix(rollback_failures)
    )]
    ArchiveIncomplete {
        failed: String,
        rolled_back: Vec<String>,
        rollback_failures: Vec<String>,
    },
}

fn rollback_suffix(failures: &[String]) -> String {
    if failures.is_empty() {
        String::new()
    } else {
        format!(", could not restore: {}", failures.join(", "))
    }
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transfer<E>(context: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        Self::Transfer {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }
}

/// Renders a ureq failure with the response body when the server sent one,
/// since Google APIs put the useful part of the error there.
pub(crate) fn describe_http_error(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let body = body.trim();
            if body.is_empty() {
                format!("HTTP {code}")
            } else {
                format!("HTTP {code}: {body}")
            }
        }
        ureq::Error::Transport(transport) => transport.to_string(),
    }
}
