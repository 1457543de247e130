//! Error types for SCM provider operations.

use thiserror::Error;

/// Errors that can occur when talking to a git hosting provider.
#[derive(Debug, Error)]
pub enum ScmError {
    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status
    #[error("{provider} API returned {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// Repository address could not be mapped to an organization and repository
    #[error("Invalid repository address '{0}'")]
    InvalidAddress(String),

    /// A provider needs a server URL that was not supplied or derivable
    #[error("Provider {0} requires a server URL")]
    MissingServer(&'static str),
}

impl ScmError {
    /// Returns the HTTP status carried by an API error, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            ScmError::Api { status, .. } => Some(*status),
            ScmError::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true for "not found" responses.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
