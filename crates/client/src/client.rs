use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nimbus_file_ops::{ensure_within, list_directory};
use nimbus_protocol::{
    AuthRequest, AuthResponse, DeleteRequest, DirectoryListRequest, FileEntry, FileFetchRequest,
    ListingEntry, Message, RenameRequest,
};
use nimbus_transfer::{DEFAULT_CHUNK_SIZE, TransferError, TransferPlan, TransferProgress};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::pumps::{self, Pending};
use crate::{ClientError, ClientEvent, REPLY_TIMEOUT, SEND_BUFFER_SIZE};

/// A connection to a storage server.
///
/// Dropping the client closes the connection without a logout.
pub struct Client {
    write_tx: mpsc::Sender<Message>,
    events: Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
    pending: Arc<Pending>,
    /// Serializes auth round trips so replies match their requests.
    auth_lock: Mutex<()>,
    /// Held by an upload task for the length of one send.
    send_lock: Arc<Mutex<()>>,
    local_root: PathBuf,
    chunk_size: usize,
    cancel: CancellationToken,
}

impl Client {
    /// Connects to `addr`. Downloads may only land under `local_root`,
    /// which must exist.
    pub async fn connect(addr: SocketAddr, local_root: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        tracing::info!(%addr, "connected to storage server");
        Self::from_stream(reader, writer, local_root)
    }

    /// Runs the client over an already-established byte stream.
    pub fn from_stream<R, W>(
        reader: R,
        writer: W,
        local_root: impl Into<PathBuf>,
    ) -> Result<Self, ClientError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let local_root = std::fs::canonicalize(local_root.into())?;
        let (write_tx, write_rx) = mpsc::channel(SEND_BUFFER_SIZE);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::default());
        let cancel = CancellationToken::new();

        tokio::spawn(pumps::write_pump(writer, write_rx, cancel.clone()).in_current_span());
        tokio::spawn(
            pumps::read_pump(
                reader,
                local_root.clone(),
                Arc::clone(&pending),
                events_tx,
                cancel.clone(),
            )
            .in_current_span(),
        );

        Ok(Self {
            write_tx,
            events: Mutex::new(events_rx),
            pending,
            auth_lock: Mutex::new(()),
            send_lock: Arc::new(Mutex::new(())),
            local_root,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cancel,
        })
    }

    /// Sets the chunk size for uploads (capped at the protocol maximum).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Logs in and returns the account's storage root on the server.
    pub async fn login(&self, login: &str, password: &str) -> Result<String, ClientError> {
        let resp = self.authenticate(login, password, false).await?;
        match resp {
            AuthResponse {
                success: true,
                storage_root: Some(root),
            } => {
                tracing::info!(login, "logged in");
                Ok(root)
            }
            _ => Err(ClientError::Rejected),
        }
    }

    /// Creates an account. The session stays logged out.
    pub async fn register(&self, login: &str, password: &str) -> Result<(), ClientError> {
        let resp = self.authenticate(login, password, true).await?;
        if resp.success {
            tracing::info!(login, "registered");
            Ok(())
        } else {
            Err(ClientError::Rejected)
        }
    }

    async fn authenticate(
        &self,
        login: &str,
        password: &str,
        is_registration: bool,
    ) -> Result<AuthResponse, ClientError> {
        let _guard = self.auth_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        *self.pending.auth.lock().await = Some(tx);

        self.send(Message::AuthRequest(AuthRequest {
            login: login.to_owned(),
            password: password.to_owned(),
            is_registration,
        }))
        .await?;

        let result = self.await_reply(rx).await;
        self.pending.auth.lock().await.take();
        result
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, ClientError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ClientError::Closed),
            reply = tokio::time::timeout(REPLY_TIMEOUT, rx) => match reply {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(ClientError::Closed),
                Err(_) => Err(ClientError::Timeout),
            },
        }
    }

    /// Asks for a remote listing; it arrives as [`ClientEvent::Listing`].
    ///
    /// An empty `path` names the storage root.
    pub async fn request_listing(&self, path: &str) -> Result<(), ClientError> {
        self.send(Message::DirectoryListRequest(DirectoryListRequest {
            path: path.to_owned(),
        }))
        .await
    }

    /// Uploads `paths` (files or trees under `source_root`) into the remote
    /// directory `remote_destination`.
    ///
    /// Runs in the background; uploads on one client go out one at a time.
    /// The handle resolves once every chunk is queued for the socket, not
    /// when the server has stored it; the server's pushed listings confirm
    /// storage.
    pub fn upload<F>(
        &self,
        paths: Vec<PathBuf>,
        source_root: PathBuf,
        remote_destination: String,
        progress: F,
    ) -> JoinHandle<Result<TransferProgress, ClientError>>
    where
        F: FnMut(TransferProgress) + Send + 'static,
    {
        let tx = self.write_tx.clone();
        let lock = Arc::clone(&self.send_lock);
        let chunk_size = self.chunk_size;

        tokio::spawn(
            async move {
                let _guard = lock.lock_owned().await;
                let span = tracing::Span::current();
                let joined = tokio::task::spawn_blocking(move || {
                    let _entered = span.enter();
                    let plan =
                        TransferPlan::build(&paths, &source_root, remote_destination, chunk_size)?;
                    tracing::info!(chunks = plan.total_chunks(), "upload started");
                    plan.send(
                        |chunk| {
                            tx.blocking_send(Message::TransferChunk(chunk))
                                .map_err(|_| TransferError::SinkClosed)
                        },
                        progress,
                    )
                })
                .await;

                match joined {
                    Ok(Ok(done)) => Ok(done),
                    Ok(Err(TransferError::SinkClosed)) => Err(ClientError::Closed),
                    Ok(Err(e)) => Err(e.into()),
                    Err(e) => {
                        tracing::error!("upload task failed: {e}");
                        Err(ClientError::Closed)
                    }
                }
            }
            .in_current_span(),
        )
    }

    /// Downloads remote `paths` into `destination`, which must lie under
    /// the local root.
    pub async fn fetch<I, S>(&self, paths: I, destination: &Path) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let destination = ensure_within(&self.local_root, destination)?;
        let paths: BTreeSet<String> = paths.into_iter().map(Into::into).collect();
        self.send(Message::FileFetchRequest(FileFetchRequest {
            paths,
            destination_path: destination.to_string_lossy().into_owned(),
        }))
        .await
    }

    pub async fn delete(&self, entries: Vec<FileEntry>) -> Result<(), ClientError> {
        self.send(Message::DeleteRequest(DeleteRequest { entries }))
            .await
    }

    pub async fn rename(&self, entry: FileEntry, new_name: &str) -> Result<(), ClientError> {
        self.send(Message::RenameRequest(RenameRequest {
            entry,
            new_name: new_name.to_owned(),
        }))
        .await
    }

    /// Announces logout, waits for the server's echo, then closes.
    pub async fn logout(self) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        *self.pending.logout.lock().await = Some(tx);
        self.send(Message::LogoutRequest).await?;

        let result = tokio::time::timeout(REPLY_TIMEOUT, rx).await;
        self.cancel.cancel();
        match result {
            Ok(Ok(())) => {
                tracing::info!("logged out");
                Ok(())
            }
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Next pushed event; `None` once the connection is gone and every
    /// event was consumed.
    pub async fn next_event(&self) -> Option<ClientEvent> {
        self.events.lock().await.recv().await
    }

    /// Lists a local directory under the local root.
    pub fn list_local(&self, path: &Path) -> Result<Vec<ListingEntry>, ClientError> {
        let dir = ensure_within(&self.local_root, path)?;
        let is_root = dir == self.local_root;
        Ok(list_directory(&dir, is_root)?)
    }

    async fn send(&self, msg: Message) -> Result<(), ClientError> {
        self.write_tx.send(msg).await.map_err(|_| ClientError::Closed)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_protocol::{DirectoryListResponse, TransferChunk, read_frame, write_frame};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    struct FakeServer {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn recv(&mut self) -> Message {
            read_frame(&mut self.reader).await.unwrap()
        }

        async fn send(&mut self, msg: Message) {
            write_frame(&mut self.writer, &msg).await.unwrap();
        }
    }

    fn pair(local_root: &Path) -> (Client, FakeServer) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (cr, cw) = tokio::io::split(client_io);
        let (sr, sw) = tokio::io::split(server_io);
        let client = Client::from_stream(cr, cw, local_root).unwrap();
        (
            client,
            FakeServer {
                reader: sr,
                writer: sw,
            },
        )
    }

    #[tokio::test]
    async fn login_returns_storage_root() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = pair(tmp.path());

        let login = tokio::spawn(async move {
            let result = client.login("alice", "pw1").await;
            (client, result)
        });
        match server.recv().await {
            Message::AuthRequest(req) => {
                assert_eq!(req.login, "alice");
                assert!(!req.is_registration);
            }
            other => panic!("unexpected {other:?}"),
        }
        server
            .send(Message::AuthResponse(AuthResponse::logged_in("/srv/alice")))
            .await;

        let (_client, result) = login.await.unwrap();
        assert_eq!(result.unwrap(), "/srv/alice");
    }

    #[tokio::test]
    async fn rejected_registration_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = pair(tmp.path());

        let register = tokio::spawn(async move { client.register("bob", "pw").await });
        assert!(matches!(server.recv().await, Message::AuthRequest(_)));
        server
            .send(Message::AuthResponse(AuthResponse::registered(false)))
            .await;

        assert!(matches!(
            register.await.unwrap(),
            Err(ClientError::Rejected)
        ));
    }

    #[tokio::test]
    async fn listings_become_events() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = pair(tmp.path());

        client.request_listing("").await.unwrap();
        assert_eq!(
            server.recv().await,
            Message::DirectoryListRequest(DirectoryListRequest::default())
        );
        server
            .send(Message::DirectoryListResponse(DirectoryListResponse::default()))
            .await;
        assert_eq!(client.next_event().await, Some(ClientEvent::Listing(vec![])));
    }

    #[tokio::test]
    async fn downloaded_chunks_are_assembled_locally() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = pair(tmp.path());
        let dest = client.local_root().to_string_lossy().into_owned();

        for (index, part) in [(2u32, "world"), (1, "hello ")] {
            server
                .send(Message::TransferChunk(TransferChunk {
                    relative_path: "docs/greeting.txt".into(),
                    destination_root: dest.clone(),
                    payload: part.as_bytes().to_vec(),
                    part_index: index,
                    total_parts: 2,
                    empty_file: false,
                }))
                .await;
        }

        let expected = client.local_root().join("docs").join("greeting.txt");
        assert_eq!(
            client.next_event().await,
            Some(ClientEvent::FileReceived(expected.clone()))
        );
        assert_eq!(std::fs::read_to_string(expected).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn downloads_outside_local_root_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        std::fs::create_dir(&local).unwrap();
        let (client, mut server) = pair(&local);

        server
            .send(Message::TransferChunk(TransferChunk {
                relative_path: "evil.txt".into(),
                destination_root: tmp.path().to_string_lossy().into_owned(),
                payload: b"x".to_vec(),
                part_index: 1,
                total_parts: 1,
                empty_file: false,
            }))
            .await;

        assert!(matches!(
            client.next_event().await,
            Some(ClientEvent::ReceiveFailed { .. })
        ));
        assert!(!tmp.path().join("evil.txt").exists());
    }

    #[tokio::test]
    async fn fetch_checks_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        std::fs::create_dir(&local).unwrap();
        let (client, mut server) = pair(&local);

        let err = client.fetch(["/srv/a.txt"], tmp.path()).await.unwrap_err();
        assert!(matches!(err, ClientError::FileOps(_)));

        client.fetch(["/srv/a.txt"], &local).await.unwrap();
        match server.recv().await {
            Message::FileFetchRequest(req) => {
                assert!(req.paths.contains("/srv/a.txt"));
                assert_eq!(
                    PathBuf::from(req.destination_path),
                    std::fs::canonicalize(&local).unwrap()
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_streams_chunks_with_progress() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.bin"), b"abcdefghij").unwrap();
        let (client, mut server) = pair(tmp.path());
        let client = client.with_chunk_size(4);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let handle = client.upload(
            vec![tmp.path().join("a.bin")],
            tmp.path().to_path_buf(),
            "/srv/alice".into(),
            move |p| record.lock().unwrap().push(p.completed),
        );

        let mut parts = Vec::new();
        for _ in 0..3 {
            match server.recv().await {
                Message::TransferChunk(c) => parts.push((c.part_index, c.payload)),
                other => panic!("unexpected {other:?}"),
            }
        }
        let done = handle.await.unwrap().unwrap();
        assert!(done.is_complete());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(parts[2], (3, b"ij".to_vec()));
    }

    #[tokio::test]
    async fn logout_waits_for_echo() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, mut server) = pair(tmp.path());

        let logout = tokio::spawn(client.logout());
        assert_eq!(server.recv().await, Message::LogoutRequest);
        server.send(Message::LogoutRequest).await;
        logout.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dropped_server_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let (client, server) = pair(tmp.path());
        drop(server);

        assert_eq!(client.next_event().await, Some(ClientEvent::Disconnected));
        let err = client.login("alice", "pw").await.unwrap_err();
        assert!(matches!(err, ClientError::Closed));
    }

    #[tokio::test]
    async fn local_listing_stays_inside_root() {
        let tmp = tempfile::tempdir().unwrap();
        let local = tmp.path().join("local");
        std::fs::create_dir_all(local.join("sub")).unwrap();
        std::fs::write(local.join("sub").join("f.txt"), "f").unwrap();

        let (client, _server) = pair(&local);

        let root = client.list_local(&local).unwrap();
        assert_eq!(root.len(), 1);
        assert!(!root[0].is_parent_marker());

        let sub = client.list_local(&local.join("sub")).unwrap();
        assert!(sub[0].is_parent_marker());
        assert_eq!(sub[1].display_name(), "f.txt");

        assert!(client.list_local(tmp.path()).is_err());
    }
}
