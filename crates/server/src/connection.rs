//! Client connection management: write pump, read loop, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use nimbus_protocol::{Message, ProtocolError, read_frame, write_frame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::SEND_BUFFER_SIZE;
use crate::server::ServerContext;
use crate::session::{Flow, Session};

const LOGOUT_FLUSH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Handle for queueing messages to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<Message>,
}

impl Sender {
    pub(crate) fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Queues a message, waiting while the buffer is full.
    ///
    /// Fails only once the connection is gone.
    pub async fn send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.send(msg).await.map_err(|_| SendError)
    }

    /// Blocking variant for use on `spawn_blocking` threads.
    pub fn blocking_send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.blocking_send(msg).map_err(|_| SendError)
    }
}

/// Error returned when the connection is closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;

/// Serves one accepted TCP connection until it closes.
pub(crate) async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) {
    let conn_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("connection", %conn_id, %peer);

    async move {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {e}");
        }
        let (reader, writer) = stream.into_split();
        run_connection(reader, writer, ctx, cancel).await;
    }
    .instrument(span)
    .await
}

/// Runs the pumps over any split byte stream.
pub(crate) async fn run_connection<R, W>(
    reader: R,
    writer: W,
    ctx: Arc<ServerContext>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Message>(SEND_BUFFER_SIZE);
    let sender = Sender::new(tx);

    let write_cancel = cancel.clone();
    let writer_task = tokio::spawn(write_pump(writer, rx, write_cancel).in_current_span());

    tracing::info!("client connected");
    let session = Session::new(ctx, sender);
    let logged_out = read_loop(reader, session, cancel.clone()).await;

    if logged_out {
        // Give the write pump time to flush the logout echo.
        let _ = tokio::time::timeout(LOGOUT_FLUSH_TIMEOUT, writer_task).await;
    }
    cancel.cancel();
    tracing::info!("client disconnected");
}

/// Write pump: drains the send channel into frames.
///
/// Stops after writing a logout echo, when every sender is gone, or on
/// cancellation.
async fn write_pump<W>(mut writer: W, mut rx: mpsc::Receiver<Message>, cancel: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, Message::LogoutRequest);
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    tracing::error!(kind = msg.kind(), "write pump error: {e}");
                    break;
                }
                if closing {
                    tracing::debug!("logout echoed");
                    break;
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    cancel.cancel();
}

/// Read loop: decodes frames and feeds them to the session in order.
///
/// Returns `true` when the session ended with a logout.
async fn read_loop<R>(mut reader: R, mut session: Session, cancel: CancellationToken) -> bool
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return false,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(msg) => {
                if session.handle(msg).await == Flow::Close {
                    return true;
                }
            }
            Err(ProtocolError::ConnectionClosed) => {
                tracing::debug!("peer closed the stream");
                return false;
            }
            Err(e) => {
                tracing::error!("read error: {e}");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_error_display() {
        assert!(SendError.to_string().contains("connection closed"));
    }

    #[tokio::test]
    async fn sender_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        let sender = Sender::new(tx);
        sender.send(Message::LogoutRequest).await.unwrap();

        drop(rx);
        assert!(sender.send(Message::LogoutRequest).await.is_err());
    }

    #[tokio::test]
    async fn write_pump_stops_after_logout() {
        let (tx, rx) = mpsc::channel(4);
        let (client, server) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        tx.send(Message::LogoutRequest).await.unwrap();
        tx.send(Message::LogoutRequest).await.unwrap();
        write_pump(server, rx, cancel.clone()).await;
        assert!(cancel.is_cancelled());

        let mut client = client;
        let first = read_frame(&mut client).await.unwrap();
        assert_eq!(first, Message::LogoutRequest);
        assert!(matches!(
            read_frame(&mut client).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
