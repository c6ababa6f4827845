//! Connection pumps: one task writes queued frames, one reads and routes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nimbus_file_ops::resolve_in_root;
use nimbus_protocol::{AuthResponse, Message, ProtocolError, TransferChunk, read_frame, write_frame};
use nimbus_transfer::{Assembler, Received};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{ClientError, ClientEvent};

/// Calls waiting for a specific reply.
#[derive(Default)]
pub(crate) struct Pending {
    pub(crate) auth: Mutex<Option<oneshot::Sender<AuthResponse>>>,
    pub(crate) logout: Mutex<Option<oneshot::Sender<()>>>,
}

pub(crate) async fn write_pump<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    warn!(kind = msg.kind(), "write error: {e}");
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}

pub(crate) async fn read_pump<R>(
    mut reader: R,
    local_root: PathBuf,
    pending: Arc<Pending>,
    events: mpsc::UnboundedSender<ClientEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut assembler = Assembler::new();
    let mut logged_out = false;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        let msg = match frame {
            Ok(msg) => msg,
            Err(ProtocolError::ConnectionClosed) => {
                debug!("server closed the stream");
                break;
            }
            Err(e) => {
                warn!("read error: {e}");
                break;
            }
        };

        let event = match msg {
            Message::AuthResponse(resp) => match pending.auth.lock().await.take() {
                Some(tx) => {
                    let _ = tx.send(resp);
                    None
                }
                None => Some(ClientEvent::UnexpectedAuth(resp)),
            },
            Message::DirectoryListResponse(resp) => Some(ClientEvent::Listing(resp.entries)),
            Message::TransferChunk(chunk) => {
                let (returned, event) = receive(&local_root, assembler, chunk).await;
                assembler = returned;
                event
            }
            Message::LogoutRequest => {
                logged_out = true;
                if let Some(tx) = pending.logout.lock().await.take() {
                    let _ = tx.send(());
                }
                let _ = events.send(ClientEvent::LoggedOut);
                break;
            }
            other => {
                warn!(kind = other.kind(), "unexpected message from server");
                None
            }
        };

        if let Some(event) = event {
            if events.send(event).is_err() {
                debug!("event receiver gone");
            }
        }
    }

    // Waiters see a closed channel instead of hanging until their timeout.
    pending.auth.lock().await.take();
    pending.logout.lock().await.take();
    cancel.cancel();
    if !logged_out {
        let _ = events.send(ClientEvent::Disconnected);
    }
}

/// Applies one downloaded chunk off the runtime.
async fn receive(
    local_root: &Path,
    mut assembler: Assembler,
    chunk: TransferChunk,
) -> (Assembler, Option<ClientEvent>) {
    let root = local_root.to_path_buf();
    let relative_path = chunk.relative_path.clone();

    let joined = tokio::task::spawn_blocking(move || {
        let result = apply_chunk(&root, &mut assembler, chunk);
        (assembler, result)
    })
    .await;

    let (assembler, result) = match joined {
        Ok(pair) => pair,
        Err(e) => {
            warn!("assembly task failed: {e}");
            return (
                Assembler::new(),
                Some(ClientEvent::ReceiveFailed {
                    relative_path,
                    reason: e.to_string(),
                }),
            );
        }
    };

    let event = match result {
        Ok(Received::File(path)) => Some(ClientEvent::FileReceived(path)),
        Ok(Received::Directory(path)) => Some(ClientEvent::DirectoryReceived(path)),
        Ok(Received::Pending { .. }) => None,
        Err(e) => {
            warn!(path = %relative_path, "download chunk rejected: {e}");
            Some(ClientEvent::ReceiveFailed {
                relative_path,
                reason: e.to_string(),
            })
        }
    };
    (assembler, event)
}

/// Destination roots must resolve inside the local root.
fn apply_chunk(
    local_root: &Path,
    assembler: &mut Assembler,
    chunk: TransferChunk,
) -> Result<Received, ClientError> {
    let dir = resolve_in_root(local_root, &chunk.destination_root)?;
    Ok(assembler.accept(&dir, chunk)?)
}
