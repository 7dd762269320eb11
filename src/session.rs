//! Session types: the launched patient context and the persisted state
//! surrounding it.

use serde::{Deserialize, Serialize};

/// OAuth token response from the FHIR server's token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Launched patient id
    pub patient: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub need_patient_banner: bool,
}

/// The authenticated context for one SMART launch.
///
/// Either fully absent or fully populated (access token plus patient id);
/// never mutated in place, always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSession {
    /// FHIR base URL, also the OAuth `aud` value
    pub issuer: String,
    pub access_token: String,
    pub patient_id: String,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub id_token: Option<String>,
    pub needs_patient_banner: bool,
}

impl LaunchSession {
    pub fn from_token_response(issuer: &str, token: TokenResponse) -> Self {
        Self {
            issuer: issuer.to_string(),
            access_token: token.access_token,
            patient_id: token.patient,
            token_type: token.token_type,
            expires_in: token.expires_in,
            id_token: token.id_token,
            needs_patient_banner: token.need_patient_banner,
        }
    }
}

/// Everything the client persists across page loads.
///
/// `launch_key` is `"{issuer}:{launch}"` and drives takeover detection;
/// `issuer` and `token_endpoint` are recorded at discovery time so the code
/// exchange on the next load can find the token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    pub launch_key: Option<String>,
    pub issuer: Option<String>,
    pub token_endpoint: Option<String>,
    pub session: Option<LaunchSession>,
}

impl StoredState {
    /// True once a usable session (access token + patient) is present
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}
