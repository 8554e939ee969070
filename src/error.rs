//! Error types returned by a [`RequestHandler`](crate::RequestHandler) and
//! by the upstream collaborators it drives.

use std::sync::Arc;

use thiserror::Error;

use crate::page::PageId;

/// Boxed error used to carry collaborator failures (transport, decoding)
/// without tying this crate to a particular HTTP stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The outcome of a failed [`resolve`](crate::RequestHandler::resolve).
///
/// One batch failure is handed to every request in the batch, so this type
/// is cheap to clone: the underlying cause lives behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The upstream authoritatively reported that this page does not exist.
    /// This is a terminal answer and is never retried.
    #[error("page {0} wasn't found")]
    NotFound(PageId),

    /// There is no page with this title. Also terminal.
    #[error("page {0:?} wasn't found")]
    TitleNotFound(String),

    /// The caller stopped waiting before a result was available.
    #[error("lookup cancelled by the caller")]
    Cancelled,

    /// The batch containing this request failed as a whole.
    #[error("upstream query failed")]
    Upstream(#[source] Arc<UpstreamError>),
}

impl Error {
    /// If this error was caused by a page not being found, return the id of
    /// the missing page.
    pub fn not_found(&self) -> Option<PageId> {
        match *self {
            Error::NotFound(id) => Some(id),
            _ => None,
        }
    }

    /// If this error was caused by a title lookup finding nothing, return
    /// the title that was asked for.
    pub fn missing_title(&self) -> Option<&str> {
        match self {
            Error::TitleNotFound(title) => Some(title),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<UpstreamError> for Error {
    fn from(err: UpstreamError) -> Self {
        Error::Upstream(Arc::new(err))
    }
}

/// A batch-level failure. Either the whole batch gets one of these, or no
/// request in it does.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request {query} failed")]
    Transport {
        query: String,
        #[source]
        source: BoxError,
    },

    #[error("HTTP {status} from {query}")]
    Status { query: String, status: u16 },

    #[error("could not decode the response to {query}")]
    Decode {
        query: String,
        #[source]
        source: BoxError,
    },

    #[error("gave up waiting for the rate limiter")]
    RateLimitCancelled,

    #[error("request handler was shut down")]
    Shutdown,

    #[error("batch deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        attempts: u32,
        #[source]
        last: Option<Box<UpstreamError>>,
    },
}

impl UpstreamError {
    pub fn transport(query: impl Into<String>, source: impl Into<BoxError>) -> Self {
        UpstreamError::Transport {
            query: query.into(),
            source: source.into(),
        }
    }

    pub fn decode(query: impl Into<String>, source: impl Into<BoxError>) -> Self {
        UpstreamError::Decode {
            query: query.into(),
            source: source.into(),
        }
    }

    /// Whether the executor may try the same batch again after this error.
    /// Cancellation of any kind is final: somebody explicitly gave up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transport { .. }
                | UpstreamError::Status { .. }
                | UpstreamError::Decode { .. }
        )
    }
}

/// Invalid handler configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("invalid value {value:?} for {var}")]
    InvalidVar { var: String, value: String },
}
