//! SMART-on-FHIR launch client with a vital-signs observation feed.
//!
//! [`LaunchController`] drives the OAuth2 authorization-code handshake
//! against a FHIR server (discovery, redirect, code exchange, session
//! restoration, takeover detection) and persists the resulting
//! [`LaunchSession`] through a [`TokenStore`]. Once a session is active,
//! [`ObservationFeed`] maintains a paginated, cached, optimistically
//! updatable view of the launched patient's vital signs.

pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod fhir;
mod http;
pub mod launch;
pub mod session;
pub mod store;

pub use config::ClientConfig;
pub use error::SmartError;
pub use feed::{FeedSnapshot, ObservationFeed};
pub use fhir::{ObservationEntry, ObservationValue, Patient};
pub use launch::{LaunchController, LaunchParams, SessionState};
pub use session::{LaunchSession, StoredState};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
