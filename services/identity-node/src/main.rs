use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use iotid_core::{logging, Settings};
use iotid_identity::{open_store, AssertionDecoder, IdentityService};
use tokio::net::TcpListener;
use tracing::{info, warn};

mod handlers;
mod state;

use state::AppState;

/// IoT identity service: organization CAs, device credentials and enrollment.
#[derive(Debug, Parser)]
#[command(name = "iotid-node", version)]
struct Args {
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port, overrides the settings
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    if let Some(port) = args.port {
        settings.port = port;
    }
    logging::init_from_settings(&settings);

    let store = open_store(&settings).context("opening datastore")?;
    let decoder = AssertionDecoder::from_trusted_keys(&settings.trusted_keys)
        .context("loading trusted assertion keys")?;
    if decoder.trusted_key_count() == 0 {
        warn!("no trusted assertion keys configured; every enrollment will be rejected");
    }

    let service = IdentityService::from_settings(&settings, store);
    let state = Arc::new(AppState::new(service, decoder));
    let app = handlers::router(state);

    let bind_addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!(
        addr = %bind_addr,
        driver = ?settings.driver,
        issuance = ?settings.issuance,
        "identity service listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
