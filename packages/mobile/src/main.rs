use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use api::auth::FileSessionStorage;
use api::{AccessTokenSource, BackendConfig, GoTrueClient, RestStore, SessionTracker};
use store::MarketplaceConfig;
use tracing_subscriber::EnvFilter;
use ui::{AuthProvider, Route};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config(Path::new(MarketplaceConfig::filename()))?;
    let backend = BackendConfig::from_env().context("backend is not configured")?;
    let timeout = config.request_timeout();

    let identity = GoTrueClient::new(
        backend.clone(),
        Arc::new(FileSessionStorage::default_location()),
        timeout,
    )?;
    let session = Arc::new(SessionTracker::new(
        Arc::new(identity),
        timeout,
        &config.auth.reset_redirect,
    ));
    let tokens: Arc<dyn AccessTokenSource> = session.clone();
    let tables = Arc::new(RestStore::new(backend, &config, tokens)?);
    let auth = AuthProvider::new(session, tables.clone(), tables, &config);

    auth.start().await;

    // Launched from a password-reset email.
    if let Some(link) = std::env::args().nth(1) {
        let route = auth
            .handle_deep_link(&link)
            .await
            .with_context(|| format!("cannot open {link}"))?;
        tracing::info!("Opened reset link, showing {:?}", route);
    }

    let mut rx = auth.subscribe();
    let settle = rx.wait_for(|s| s.route() != Route::Loading);
    if tokio::time::timeout(timeout * 2, settle).await.is_err() {
        tracing::warn!("Still loading after {:?}", timeout * 2);
    }

    let state = auth.state();
    match &state.identity {
        Some(identity) => println!("{} -> {:?}", identity.display_name(), state.route()),
        None => println!("{:?}", state.route()),
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<MarketplaceConfig> {
    if !path.exists() {
        tracing::info!("No {}, using defaults", path.display());
        return Ok(MarketplaceConfig::default());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    MarketplaceConfig::from_toml(&text).with_context(|| format!("invalid {}", path.display()))
}
