use thiserror::Error;

use crate::key::CacheKey;
use crate::validation::ValidationErrors;

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// A response the server produced but didn't like: non-2xx status or a `success: false` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API error{}: {}", .status.map(|s| format!(" {s}")).unwrap_or_default(), .message.as_deref().unwrap_or("<no message>"))]
pub struct ApiError {
    pub status:  Option<u16>,
    pub message: Option<String>,
    pub code:    Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status:  Some(status),
            message: Some(message.into()),
            code:    None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Failure of a single executor call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),
    /// No response was received at all.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// What to show to a human: the server's own words when it had any.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Api(ApiError {
                message: Some(message), ..
            }) if !message.is_empty() => message,
            _ => GENERIC_FAILURE,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api(err) => err.status,
            Self::Network(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// Rejected before submission.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A rollback replaced writes made by somebody else after the patch was applied.
    #[error("rollback overwrote interleaved changes of {}", .keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", "))]
    StaleRollbackConflict { keys: Vec<CacheKey> },
    #[error("a 'load more' request for {0} is already in flight")]
    LoadMoreInFlight(CacheKey),
    #[error("cannot decode {endpoint} response: {message}")]
    Decode { endpoint: &'static str, message: String },
    #[error("cannot encode {endpoint} request: {message}")]
    Encode { endpoint: &'static str, message: String },
    #[error("configuration error: {0}")]
    Config(String),
    /// The task carrying a mutation ended without producing a result.
    #[error("mutation interrupted: {0}")]
    Interrupted(String),
    #[error("query store has been dropped")]
    StoreGone,
}

impl From<ValidationErrors> for CacheError {
    fn from(err: ValidationErrors) -> Self {
        Self::Validation(err)
    }
}

impl From<ApiError> for CacheError {
    fn from(err: ApiError) -> Self {
        Self::Fetch(FetchError::Api(err))
    }
}

impl CacheError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Fetch(err) => err.user_message().to_string(),
            Self::Validation(err) => err.to_string(),
            _ => GENERIC_FAILURE.to_string(),
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
