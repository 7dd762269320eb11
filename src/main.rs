use anyhow::{Context, Result};
use smart_vitals::{
    fhir, ClientConfig, FileTokenStore, LaunchController, LaunchParams, ObservationFeed,
    SessionState,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .context("usage: smart-vitals <launch-or-callback-url>")?;
    let params = LaunchParams::from_url(&url)?;

    let config = ClientConfig::from_env();
    let store = FileTokenStore::new().context("could not locate home directory")?;
    let controller = LaunchController::new(config.clone(), Arc::new(store))?;

    match controller.resolve(&params).await? {
        SessionState::AwaitingRedirect { authorize_url } => {
            println!("Open this URL in a browser to authorize, then re-run");
            println!("with the callback URL it redirects to:\n\n{}", authorize_url);
        }
        SessionState::Active(session) => {
            info!(patient = %session.patient_id, "Session active");

            if session.needs_patient_banner {
                let patient = fhir::fetch_patient(controller.http(), &session).await?;
                println!(
                    "Patient: {} (born {})",
                    patient.name,
                    patient.birth_date.as_deref().unwrap_or("unknown")
                );
            }

            let feed = ObservationFeed::new(controller.http().clone(), &session, &config)?;
            let snapshot = feed.fetch_initial(false).await?;
            for entry in &snapshot.displayed {
                println!(
                    "{:<28} {:<24} {}",
                    entry.effective_display(),
                    entry.display,
                    entry.value.display()
                );
            }
            if snapshot.has_more {
                println!("(more readings available)");
            }
        }
        other => println!("Launch did not complete: {:?}", other),
    }

    Ok(())
}
