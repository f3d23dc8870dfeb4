use lyxserver::ControlServer;
use lyxstore::{FirestoreStore, MemoryStore, RemoteStore, SongStore, StoreConfigExt};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ========== PHASE 1 : Configuration ==========

    let config = lyxconfig::get_config();
    let port = config.get_http_port();

    // ========== PHASE 2 : Magasin et synchronisation ==========

    let remote: Arc<dyn RemoteStore> =
        match (config.get_remote_project_id(), config.get_remote_api_key()) {
            (Some(project_id), Some(api_key)) => {
                info!("☁️ Connecting to remote project {}", project_id);
                FirestoreStore::connect(project_id, api_key)
            }
            _ => {
                warn!("⚠️ No remote project configured, running standalone");
                Arc::new(MemoryStore::new())
            }
        };

    let store = SongStore::new_configured(remote)?;
    store.initialize().await;
    info!("✅ {} songs in the local cache", store.songs().len());

    // ========== PHASE 3 : Canal de contrôle ==========

    info!("🌐 Starting control server...");
    let server = ControlServer::new_configured(store.clone());

    info!("✅ LyriX is ready!");
    info!("Press Ctrl+C to stop...");
    server.run(port).await?;

    // Laisse partir les écritures encore en file avant de quitter
    store.flush_commits().await;
    info!("Goodbye");
    Ok(())
}
