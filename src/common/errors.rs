use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exception severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Common,
    Suspicious,
    Fault,
}

/// How the retry layer should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth repeating the same request.
    Transient,
    /// The item does not exist; surfaced as an empty result.
    NotFound,
    /// Repeating the request will not help.
    Fatal,
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no item found at {url}")]
    NotFound { url: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server error {status} from {url}")]
    ServerError { status: u16, url: String },

    #[error("page layout changed at {url}: {marker} missing")]
    ContentShapeChanged { marker: String, url: String },

    #[error("collection has {size} items, the limit is {limit}")]
    LimitExceeded { size: usize, limit: usize },

    #[error("upstream rejected the request to {url} with status {status}")]
    UpstreamRejected { status: u16, url: String },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("source is not configured: {0}")]
    Misconfigured(String),

    #[error("corrupt track data: {0}")]
    Decode(String),
}

impl SourceError {
    pub fn shape(marker: impl Into<String>, url: impl Into<String>) -> Self {
        Self::ContentShapeChanged {
            marker: marker.into(),
            url: url.into(),
        }
    }

    /// Maps an unexpected HTTP status to the matching error variant.
    pub fn from_status(status: reqwest::StatusCode, url: impl Into<String>) -> Self {
        let url = url.into();
        if status == reqwest::StatusCode::NOT_FOUND {
            Self::NotFound { url }
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::ServerError {
                status: status.as_u16(),
                url,
            }
        } else {
            Self::UpstreamRejected {
                status: status.as_u16(),
                url,
            }
        }
    }

    pub fn class(&self) -> FailureClass {
        classify(self)
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::NotFound { .. }
            | Self::LimitExceeded { .. }
            | Self::InvalidInput(_)
            | Self::Misconfigured(_) => Severity::Common,
            Self::ContentShapeChanged { .. } | Self::UpstreamRejected { .. } | Self::Json(_) => {
                Severity::Suspicious
            }
            Self::Network(_) | Self::Io(_) | Self::ServerError { .. } | Self::Decode(_) => {
                Severity::Fault
            }
        }
    }
}

/// The single place that decides whether a failure is retried.
pub fn classify(error: &SourceError) -> FailureClass {
    match error {
        SourceError::NotFound { .. } => FailureClass::NotFound,
        SourceError::ServerError { .. } => FailureClass::Transient,
        SourceError::Network(e) => {
            if e.is_decode() || e.is_builder() || e.is_redirect() {
                FailureClass::Fatal
            } else if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
                FailureClass::Transient
            } else {
                match e.status() {
                    Some(status) if status.is_server_error() => FailureClass::Transient,
                    Some(status) if status == reqwest::StatusCode::NOT_FOUND => {
                        FailureClass::NotFound
                    }
                    _ => FailureClass::Fatal,
                }
            }
        }
        SourceError::Io(e) => match e.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::Interrupted => FailureClass::Transient,
            _ => FailureClass::Fatal,
        },
        SourceError::ContentShapeChanged { .. }
        | SourceError::LimitExceeded { .. }
        | SourceError::UpstreamRejected { .. }
        | SourceError::Json(_)
        | SourceError::InvalidInput(_)
        | SourceError::Misconfigured(_)
        | SourceError::Decode(_) => FailureClass::Fatal,
    }
}

/// A failed resolve, tagged with the site that produced it.
#[derive(Debug, Error)]
#[error("{source_name} failed to load {identifier}: {error}")]
pub struct LoadFailure {
    pub source_name: String,
    pub identifier: String,
    #[source]
    pub error: SourceError,
}
