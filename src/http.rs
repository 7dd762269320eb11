//! Shared HTTP plumbing: client construction and response-to-error mapping.

use crate::error::SmartError;
use std::time::Duration;

/// Build the shared HTTP client with connect and request timeouts.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, SmartError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .map_err(|e| SmartError::Auth(format!("Failed to create HTTP client: {}", e)))
}

/// Validate that a base URL is a well-formed http(s) URL, trimming any
/// trailing slash.
pub(crate) fn clean_base_url(base_url: &str) -> Result<String, SmartError> {
    let cleaned = base_url.trim_end_matches('/');
    let parsed = url::Url::parse(cleaned)
        .map_err(|e| SmartError::Url(format!("Invalid URL '{}': {}", cleaned, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SmartError::Url(format!(
            "URL must use http or https scheme, got: {}",
            parsed.scheme()
        )));
    }

    Ok(cleaned.to_string())
}

/// Map an HTTP response to a typed body or the appropriate error.
pub(crate) async fn handle_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SmartError> {
    if response.status().is_success() {
        Ok(response.json().await?)
    } else {
        Err(map_error(response).await)
    }
}

/// Turn a non-success response into the matching [`SmartError`].
pub(crate) async fn map_error(response: reqwest::Response) -> SmartError {
    match response.status() {
        reqwest::StatusCode::UNAUTHORIZED => SmartError::Unauthorized,
        reqwest::StatusCode::FORBIDDEN => {
            let body = response.text().await.unwrap_or_default();
            SmartError::AccessDenied(body)
        }
        reqwest::StatusCode::NOT_FOUND => SmartError::NotFound("Resource not found".into()),
        reqwest::StatusCode::UNPROCESSABLE_ENTITY => {
            let body = response.text().await.unwrap_or_default();
            SmartError::Validation(body)
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            SmartError::Auth(format!("Unexpected response: {}", body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_base_url() {
        assert_eq!(
            clean_base_url("http://localhost:8103/").unwrap(),
            "http://localhost:8103"
        );
        assert_eq!(
            clean_base_url("https://fhir.example.org").unwrap(),
            "https://fhir.example.org"
        );
        assert!(clean_base_url("not-a-url").is_err());
        assert!(clean_base_url("ftp://fhir.example.org").is_err());
    }
}
