//! SMART launch lifecycle: discovery, authorization redirect, code exchange
//! and session restoration.
//!
//! Every page load resolves through the same four-branch precedence:
//! takeover detection, session restoration, code exchange, fresh
//! authorization. The decision is computed by the pure [`plan`] function
//! over (stored state, URL parameters) so the precedence and the takeover
//! rule are testable without any I/O; [`LaunchController::resolve`] executes
//! the plan against the store and the network.

use crate::config::{ClientConfig, SMART_SCOPE};
use crate::error::SmartError;
use crate::http::{build_client, clean_base_url, handle_response};
use crate::session::{LaunchSession, StoredState, TokenResponse};
use crate::store::TokenStore;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use urlencoding::encode;

/// Query parameters the EHR or authorization server put on our URL
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchParams {
    pub iss: Option<String>,
    pub launch: Option<String>,
    pub code: Option<String>,
}

impl LaunchParams {
    /// Parse `iss`, `launch` and `code` out of a launch or callback URL.
    pub fn from_url(raw: &str) -> Result<Self, SmartError> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| SmartError::Url(format!("Invalid launch URL '{}': {}", raw, e)))?;

        let mut params = Self::default();
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "iss" => params.iss = Some(value.into_owned()),
                "launch" => params.launch = Some(value.into_owned()),
                "code" => params.code = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(params)
    }

    fn launch_key(&self) -> Option<String> {
        match (&self.iss, &self.launch) {
            (Some(iss), Some(launch)) => Some(format!("{}:{}", iss, launch)),
            _ => None,
        }
    }
}

/// Where the launch lifecycle currently stands
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    /// Discovery finished; the caller must navigate to this URL. The current
    /// load's controller sequence ends here.
    AwaitingRedirect { authorize_url: String },
    ExchangingCode,
    Active(LaunchSession),
    Error(String),
}

/// What `resolve` will do, decided purely from stored state and URL params
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Reuse the persisted session as-is
    Restore,
    /// Exchange the authorization code at the previously stored endpoint
    ExchangeCode { code: String, token_endpoint: String },
    /// Fetch the discovery document and redirect to the authorize endpoint
    Authorize { iss: String, launch: String },
    FailMissingLaunchParams,
    FailMissingTokenEndpoint,
}

/// Output of [`plan`]
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// True when a new `(iss, launch)` pair supersedes the stored one; the
    /// entire stored state is cleared before the action runs.
    pub clear_stale: bool,
    /// Launch key to persist before the action runs, so a repeated load with
    /// the same parameters does not re-trigger the takeover
    pub record_launch_key: Option<String>,
    pub action: Action,
}

/// Decide the launch action for one page load.
pub fn plan(stored: &StoredState, params: &LaunchParams) -> Plan {
    let incoming_key = params.launch_key();

    let clear_stale = matches!(
        (&incoming_key, &stored.launch_key),
        (Some(new_key), Some(old_key)) if new_key != old_key
    );

    // After a takeover the prior session and endpoints are gone
    let session_present = !clear_stale && stored.session.is_some();
    let token_endpoint = if clear_stale {
        None
    } else {
        stored.token_endpoint.clone()
    };

    let action = if session_present && params.code.is_none() {
        Action::Restore
    } else if let Some(code) = &params.code {
        match token_endpoint {
            Some(token_endpoint) => Action::ExchangeCode {
                code: code.clone(),
                token_endpoint,
            },
            None => Action::FailMissingTokenEndpoint,
        }
    } else if let (Some(iss), Some(launch)) = (&params.iss, &params.launch) {
        Action::Authorize {
            iss: iss.clone(),
            launch: launch.clone(),
        }
    } else {
        Action::FailMissingLaunchParams
    };

    Plan {
        clear_stale,
        record_launch_key: incoming_key,
        action,
    }
}

/// SMART discovery document (the fields we consume)
#[derive(Debug, Clone, Deserialize)]
struct SmartConfiguration {
    authorization_endpoint: String,
    token_endpoint: String,
}

/// Orchestrates the SMART launch flow and owns the resulting session
pub struct LaunchController {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn TokenStore>,
    state: Mutex<SessionState>,
    resolve_lock: tokio::sync::Mutex<()>,
}

impl LaunchController {
    pub fn new(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self, SmartError> {
        let http = build_client(config.request_timeout)?;
        Ok(Self {
            http,
            config,
            store,
            state: Mutex::new(SessionState::Unauthenticated),
            resolve_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Shared HTTP client, reused by the observation feed
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn current_state(&self) -> SessionState {
        self.state.lock().expect("state lock poisoned").clone()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Resolve the session for this load.
    ///
    /// Only one resolve may be in flight at a time; a concurrent call gets
    /// [`SmartError::Busy`]. Fatal errors also land in
    /// [`SessionState::Error`] for the presentation layer.
    pub async fn resolve(&self, params: &LaunchParams) -> Result<SessionState, SmartError> {
        let _guard = self
            .resolve_lock
            .try_lock()
            .map_err(|_| SmartError::Busy)?;

        match self.resolve_inner(params).await {
            Ok(state) => {
                self.set_state(state.clone());
                Ok(state)
            }
            Err(e) => {
                self.set_state(SessionState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn resolve_inner(&self, params: &LaunchParams) -> Result<SessionState, SmartError> {
        let mut stored = self.store.load();
        let plan = plan(&stored, params);

        if plan.clear_stale {
            info!("New launch supersedes the stored session; clearing state");
            self.store.clear()?;
            stored = StoredState::default();
        }

        if let Some(key) = &plan.record_launch_key {
            if stored.launch_key.as_deref() != Some(key.as_str()) {
                stored.launch_key = Some(key.clone());
                self.store.replace(stored.clone())?;
            }
        }

        match plan.action {
            Action::Restore => {
                let session = stored
                    .session
                    .clone()
                    .ok_or(SmartError::NotAuthenticated)?;
                info!(patient = %session.patient_id, "Restored persisted session");
                Ok(SessionState::Active(session))
            }
            Action::ExchangeCode {
                code,
                token_endpoint,
            } => self.exchange_code(stored, &code, &token_endpoint).await,
            Action::Authorize { iss, launch } => self.authorize(stored, &iss, &launch).await,
            Action::FailMissingLaunchParams => Err(SmartError::MissingLaunchParams(
                "iss and launch are required to start a launch",
            )),
            Action::FailMissingTokenEndpoint => Err(SmartError::MissingTokenEndpoint),
        }
    }

    /// Exchange an authorization code for a token and persist the session.
    async fn exchange_code(
        &self,
        stored: StoredState,
        code: &str,
        token_endpoint: &str,
    ) -> Result<SessionState, SmartError> {
        self.set_state(SessionState::ExchangingCode);
        debug!("Exchanging authorization code at {}", token_endpoint);

        let response = self
            .http
            .post(token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri),
                ("client_id", &self.config.client_id),
            ])
            .send()
            .await?;

        let token: TokenResponse = handle_response(response).await?;

        let issuer = stored
            .issuer
            .clone()
            .ok_or_else(|| SmartError::Auth("issuer was not recorded at discovery".into()))?;

        let session = LaunchSession::from_token_response(&issuer, token);
        info!(patient = %session.patient_id, "Code exchange complete");

        // Replace the whole persisted value, clearing any partial state
        self.store.replace(StoredState {
            launch_key: stored.launch_key,
            issuer: Some(issuer),
            token_endpoint: Some(token_endpoint.to_string()),
            session: Some(session.clone()),
        })?;

        Ok(SessionState::Active(session))
    }

    /// Fetch the discovery document and hand back the authorization URL.
    async fn authorize(
        &self,
        stored: StoredState,
        iss: &str,
        launch: &str,
    ) -> Result<SessionState, SmartError> {
        let issuer = clean_base_url(iss)?;
        let discovery_url = format!("{}/.well-known/smart-configuration", issuer);
        debug!("Fetching SMART configuration from {}", discovery_url);

        let response = self.http.get(&discovery_url).send().await?;
        let smart_config: SmartConfiguration = handle_response(response).await?;

        // Persist the endpoints now; the code exchange happens on the next
        // load, after the redirect comes back
        self.store.replace(StoredState {
            launch_key: stored.launch_key,
            issuer: Some(issuer.clone()),
            token_endpoint: Some(smart_config.token_endpoint),
            session: None,
        })?;

        let authorize_url = format!(
            "{}?client_id={}&redirect_uri={}&scope={}&response_type=code&aud={}&launch={}",
            smart_config.authorization_endpoint,
            encode(&self.config.client_id),
            encode(&self.config.redirect_uri),
            encode(SMART_SCOPE),
            encode(&issuer),
            encode(launch),
        );

        info!("Redirecting to authorization endpoint");
        Ok(SessionState::AwaitingRedirect { authorize_url })
    }

    /// Clear the session in memory and on disk.
    pub fn logout(&self) {
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear stored state: {}", e);
        }
        self.set_state(SessionState::Unauthenticated);
    }

    /// Probe the issuer's discovery document without authenticating.
    pub async fn check_server_connectivity(&self, iss: &str) -> bool {
        let issuer = match clean_base_url(iss) {
            Ok(issuer) => issuer,
            Err(_) => return false,
        };
        let url = format!("{}/.well-known/smart-configuration", issuer);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
