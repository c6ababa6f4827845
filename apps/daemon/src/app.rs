use std::path::Path;
use std::sync::Arc;

use nimbus_auth::{CredentialGate, JsonFileStore};
use nimbus_server::StorageServer;

use crate::config::Config;

/// Runs the server until it fails or Ctrl-C is pressed.
pub async fn run(config: Config, config_path: &Path) -> anyhow::Result<()> {
    let credentials = config.credentials_path(config_path);
    let store = JsonFileStore::open(&credentials)?;
    tracing::info!(path = %credentials.display(), "credential store ready");

    let gate = CredentialGate::new(Arc::new(store), config.kdf_params());
    let server = StorageServer::new(config.server_config(), gate);

    let runner = Arc::clone(&server);
    let mut serve = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        result = &mut serve => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
    }

    server.shutdown();
    serve.await??;
    Ok(())
}
