//! Storage server accept loop.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use nimbus_auth::CredentialGate;
use nimbus_protocol::constants::DEFAULT_PORT;
use nimbus_transfer::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection;

/// When a login's storage directory is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionPolicy {
    /// Before the password is checked, so any well-formed login gets one.
    #[default]
    Always,
    /// Only after a successful login.
    OnSuccess,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Parent of every account's storage root.
    pub storage_dir: PathBuf,
    pub provision: ProvisionPolicy,
    /// Chunk size for downloads; capped at the protocol maximum.
    pub chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            storage_dir: PathBuf::from("cloud_storage"),
            provision: ProvisionPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// State shared by every connection.
pub(crate) struct ServerContext {
    pub(crate) gate: CredentialGate,
    pub(crate) config: ServerConfig,
}

/// The storage server.
///
/// Connections are independent; they share only the credential gate and
/// the filesystem.
pub struct StorageServer {
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl StorageServer {
    pub fn new(config: ServerConfig, gate: CredentialGate) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ServerContext { gate, config }),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Returns the bound address once [`run`](Self::run) has bound the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let config = &self.ctx.config;
        let listener = {
            let mut bound = self.local_addr.lock().await;
            if bound.is_some() {
                return Err(ServerError::AlreadyRunning);
            }

            tokio::fs::create_dir_all(&config.storage_dir).await?;
            let listener = TcpListener::bind((config.bind_address, config.port)).await?;
            *bound = Some(listener.local_addr()?);
            listener
        };

        tracing::info!(
            addr = %listener.local_addr()?,
            storage = %config.storage_dir.display(),
            "storage server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let ctx = Arc::clone(&self.ctx);
                            let cancel = self.cancel.child_token();
                            tokio::spawn(connection::serve(stream, peer, ctx, cancel));
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}
