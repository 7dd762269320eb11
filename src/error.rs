//! Error taxonomy for the SMART launch flow and the observation feed.
//!
//! Configuration errors (missing launch parameters, missing token endpoint)
//! are fatal for the current launch; transport errors are fatal for the
//! launch but feed-scoped for the feed; validation errors are local and
//! recoverable.

/// Errors produced by the launch controller and observation feed
#[derive(Debug, thiserror::Error)]
pub enum SmartError {
    #[error("Missing launch parameters: {0}")]
    MissingLaunchParams(&'static str),

    #[error("No token endpoint stored; cannot exchange authorization code")]
    MissingTokenEndpoint,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Token rejected by server")]
    Unauthorized,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Access denied to resource: {0}")]
    AccessDenied(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Another request is already in flight")]
    Busy,
}

impl SmartError {
    /// True for errors that end the current launch attempt outright, as
    /// opposed to feed-scoped errors the user can retry in place.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SmartError::MissingLaunchParams(_) | SmartError::MissingTokenEndpoint
        )
    }
}
