//! Per-connection session state machine.
//!
//! ```text
//! Unauthenticated --login ok--> Authenticated(FileOpsHandler)
//!        |                              |
//!        +----------- logout -----------+--> closed
//! ```
//!
//! Registration replies but leaves the session unauthenticated. Messages
//! that are not valid in the current state are logged and dropped.

use std::sync::Arc;

use nimbus_file_ops::validate_entry_name;
use nimbus_protocol::{AuthRequest, AuthResponse, Message};

use crate::connection::Sender;
use crate::files::FileOpsHandler;
use crate::server::{ProvisionPolicy, ServerContext};

/// What the read loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

enum State {
    Unauthenticated,
    Authenticated(FileOpsHandler),
}

pub(crate) struct Session {
    ctx: Arc<ServerContext>,
    sender: Sender,
    state: State,
}

impl Session {
    pub(crate) fn new(ctx: Arc<ServerContext>, sender: Sender) -> Self {
        Self {
            ctx,
            sender,
            state: State::Unauthenticated,
        }
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        matches!(self.state, State::Authenticated(_))
    }

    /// Processes one inbound message.
    pub(crate) async fn handle(&mut self, msg: Message) -> Flow {
        match msg {
            Message::LogoutRequest => {
                tracing::info!(authenticated = self.is_authenticated(), "logout requested");
                if self.sender.send(Message::LogoutRequest).await.is_err() {
                    tracing::debug!("connection gone before logout echo");
                }
                Flow::Close
            }
            Message::AuthRequest(req) => {
                if self.is_authenticated() {
                    tracing::warn!(login = %req.login, "auth request on authenticated session dropped");
                } else {
                    self.authenticate(req).await;
                }
                Flow::Continue
            }
            other => {
                match &mut self.state {
                    State::Authenticated(handler) => handler.dispatch(other).await,
                    State::Unauthenticated => {
                        tracing::warn!(kind = other.kind(), "message before authentication dropped");
                    }
                }
                Flow::Continue
            }
        }
    }

    async fn authenticate(&mut self, req: AuthRequest) {
        let AuthRequest {
            login,
            password,
            is_registration,
        } = req;

        if let Err(e) = validate_entry_name(&login) {
            tracing::warn!(%login, "rejecting malformed login: {e}");
            self.reply(AuthResponse::rejected()).await;
            return;
        }

        if is_registration {
            let gate = self.ctx.gate.clone();
            let user = login.clone();
            let ok = run_blocking(move || gate.register(&user, &password))
                .await
                .unwrap_or(false);
            tracing::info!(%login, success = ok, "registration attempt");
            self.reply(AuthResponse::registered(ok)).await;
            return;
        }

        let config = &self.ctx.config;
        let root = config.storage_dir.join(&login);
        if config.provision == ProvisionPolicy::Always {
            if let Err(e) = tokio::fs::create_dir_all(&root).await {
                tracing::warn!(root = %root.display(), "could not provision storage: {e}");
            }
        }

        let gate = self.ctx.gate.clone();
        let user = login.clone();
        let ok = run_blocking(move || gate.verify(&user, &password))
            .await
            .unwrap_or(false);
        if !ok {
            tracing::info!(%login, "login rejected");
            self.reply(AuthResponse::rejected()).await;
            return;
        }

        if config.provision == ProvisionPolicy::OnSuccess {
            if let Err(e) = tokio::fs::create_dir_all(&root).await {
                tracing::error!(root = %root.display(), "could not provision storage: {e}");
                self.reply(AuthResponse::rejected()).await;
                return;
            }
        }

        let root = match tokio::fs::canonicalize(&root).await {
            Ok(root) => root,
            Err(e) => {
                tracing::error!(root = %root.display(), "storage root unavailable: {e}");
                self.reply(AuthResponse::rejected()).await;
                return;
            }
        };

        tracing::info!(%login, root = %root.display(), "login accepted");
        self.reply(AuthResponse::logged_in(root.to_string_lossy()))
            .await;
        self.state = State::Authenticated(FileOpsHandler::new(
            root,
            self.sender.clone(),
            config.chunk_size,
        ));
    }

    async fn reply(&self, response: AuthResponse) {
        if self.sender.send(Message::AuthResponse(response)).await.is_err() {
            tracing::debug!("connection gone before auth reply");
        }
    }
}

/// Runs blocking work off the async runtime; `None` if the task panicked.
pub(crate) async fn run_blocking<T, F>(f: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("blocking task failed: {e}");
            None
        }
    }
}
