use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OAuth scope requested at authorization time. Grants the launch context
/// plus read/write access to the patient's observations.
pub const SMART_SCOPE: &str = "openid fhirUser launch patient/Patient.read \
patient/Observation.read patient/Observation.write";

/// Server page size for observation searches; also the client-side window
/// increment for load-more.
pub const PAGE_SIZE: usize = 5;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth client identifier registered with the EHR
    pub client_id: String,
    /// Redirect URI the authorization server sends the code back to
    pub redirect_uri: String,
    /// Observation page size (server `_count` and window increment)
    pub page_size: usize,
    /// Freshness window for the observation bundle cache
    pub cache_ttl: Duration,
    /// Delay before the post-create reconciliation fetch runs
    pub reconcile_delay: Duration,
    /// HTTP request timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "smart-vitals".to_string(),
            redirect_uri: "http://localhost:4000/".to_string(),
            page_size: PAGE_SIZE,
            cache_ttl: Duration::from_secs(30),
            reconcile_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Build a config from environment overrides, falling back to defaults.
    ///
    /// Recognized variables: `SMART_CLIENT_ID`, `SMART_REDIRECT_URI`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(client_id) = std::env::var("SMART_CLIENT_ID") {
            if !client_id.is_empty() {
                config.client_id = client_id;
            }
        }
        if let Ok(redirect_uri) = std::env::var("SMART_REDIRECT_URI") {
            if !redirect_uri.is_empty() {
                config.redirect_uri = redirect_uri;
            }
        }
        config
    }
}
