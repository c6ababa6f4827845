//! File operations for an authenticated session.
//!
//! Every client-supplied path is resolved against the account's storage
//! root before use. Failures are logged and the operation is skipped; the
//! connection stays open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nimbus_file_ops::{
    FileOpsError, list_directory, remove_entries, rename_entry, resolve_entry, resolve_in_root,
};
use nimbus_protocol::{
    DeleteRequest, DirectoryListRequest, DirectoryListResponse, FileFetchRequest, Message,
    RenameRequest, TransferChunk,
};
use nimbus_transfer::{Assembler, Received, TransferError, TransferPlan};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::ServerError;
use crate::connection::Sender;
use crate::session::run_blocking;

pub(crate) struct FileOpsHandler {
    storage_root: PathBuf,
    sender: Sender,
    assembler: Assembler,
    /// Held by the download task for the length of one send.
    send_lock: Arc<Mutex<()>>,
    chunk_size: usize,
    last_listing: Option<PathBuf>,
}

impl FileOpsHandler {
    /// `storage_root` must already be canonical.
    pub(crate) fn new(storage_root: PathBuf, sender: Sender, chunk_size: usize) -> Self {
        Self {
            storage_root,
            sender,
            assembler: Assembler::new(),
            send_lock: Arc::new(Mutex::new(())),
            chunk_size,
            last_listing: None,
        }
    }

    pub(crate) async fn dispatch(&mut self, msg: Message) {
        match msg {
            Message::DirectoryListRequest(req) => self.handle_list(req).await,
            Message::FileFetchRequest(req) => self.handle_fetch(req),
            Message::TransferChunk(chunk) => self.handle_chunk(chunk).await,
            Message::DeleteRequest(req) => self.handle_delete(req).await,
            Message::RenameRequest(req) => self.handle_rename(req).await,
            other => {
                tracing::warn!(kind = other.kind(), "unexpected message dropped");
            }
        }
    }

    async fn handle_list(&mut self, req: DirectoryListRequest) {
        let root = self.storage_root.clone();
        let resolved = run_blocking(move || resolve_in_root(&root, &req.path)).await;
        match resolved {
            Some(Ok(dir)) => self.push_listing(dir).await,
            Some(Err(e)) => {
                tracing::warn!("listing refused: {e}");
                self.send(Message::DirectoryListResponse(DirectoryListResponse::default()))
                    .await;
            }
            None => {
                self.send(Message::DirectoryListResponse(DirectoryListResponse::default()))
                    .await;
            }
        }
    }

    /// Starts a download in the background.
    ///
    /// The send lock keeps one download in flight per connection; later
    /// requests queue behind it.
    fn handle_fetch(&self, req: FileFetchRequest) {
        let root = self.storage_root.clone();
        let sender = self.sender.clone();
        let lock = Arc::clone(&self.send_lock);
        let chunk_size = self.chunk_size;

        tokio::spawn(
            async move {
                let _guard = lock.lock_owned().await;
                let span = tracing::Span::current();
                let outcome = run_blocking(move || {
                    let _entered = span.enter();
                    send_download(&root, &req, &sender, chunk_size)
                })
                .await;
                match outcome {
                    Some(Ok(chunks)) => tracing::info!(chunks, "download sent"),
                    Some(Err(e)) => tracing::warn!("download aborted: {e}"),
                    None => {}
                }
            }
            .in_current_span(),
        );
    }

    async fn handle_chunk(&mut self, chunk: TransferChunk) {
        let root = self.storage_root.clone();
        let mut assembler = std::mem::take(&mut self.assembler);

        let outcome = run_blocking(move || {
            let result = receive_chunk(&root, &mut assembler, chunk);
            (assembler, result)
        })
        .await;

        let Some((assembler, result)) = outcome else {
            // The pending assemblies went down with the panicked task.
            return;
        };
        self.assembler = assembler;

        match result {
            Ok((dir, received)) if received.is_complete() => {
                tracing::info!(path = %received.path().display(), "upload stored");
                self.push_listing(dir).await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("chunk rejected: {e}"),
        }
    }

    async fn handle_delete(&mut self, req: DeleteRequest) {
        let root = self.storage_root.clone();
        let outcome = run_blocking(move || {
            let mut parent = None;
            let mut targets = Vec::new();
            for entry in &req.entries {
                match resolve_entry(&root, Path::new(&entry.path)) {
                    Ok(path) => {
                        if parent.is_none() {
                            parent = path.parent().map(Path::to_path_buf);
                        }
                        targets.push(path);
                    }
                    Err(e) => tracing::warn!(path = %entry.path, "delete refused: {e}"),
                }
            }
            (parent, remove_entries(&targets))
        })
        .await;

        let Some((parent, reports)) = outcome else {
            return;
        };
        for report in &reports {
            match &report.error {
                None => tracing::info!(path = %report.path.display(), "entry deleted"),
                Some(e) => tracing::warn!(path = %report.path.display(), "delete failed: {e}"),
            }
        }

        if let Some(dir) = parent.or_else(|| self.last_listing.clone()) {
            self.push_listing(dir).await;
        }
    }

    async fn handle_rename(&mut self, req: RenameRequest) {
        let root = self.storage_root.clone();
        let outcome = run_blocking(move || -> Result<PathBuf, FileOpsError> {
            let source = resolve_entry(&root, Path::new(&req.entry.path))?;
            rename_entry(&source, &req.new_name)
        })
        .await;

        match outcome {
            Some(Ok(renamed)) => {
                tracing::info!(path = %renamed.display(), "entry renamed");
                if let Some(dir) = renamed.parent() {
                    self.push_listing(dir.to_path_buf()).await;
                }
            }
            Some(Err(e)) => tracing::warn!("rename failed: {e}"),
            None => {}
        }
    }

    /// Lists `dir` and sends it; an unreadable directory yields an empty
    /// listing.
    async fn push_listing(&mut self, dir: PathBuf) {
        let is_root = dir == self.storage_root;
        let target = dir.clone();
        let entries = match run_blocking(move || list_directory(&target, is_root)).await {
            Some(Ok(entries)) => entries,
            Some(Err(e)) => {
                tracing::warn!(dir = %dir.display(), "listing failed: {e}");
                Vec::new()
            }
            None => Vec::new(),
        };

        tracing::debug!(dir = %dir.display(), entries = entries.len(), "listing sent");
        self.last_listing = Some(dir);
        self.send(Message::DirectoryListResponse(DirectoryListResponse {
            entries,
        }))
        .await;
    }

    async fn send(&self, msg: Message) {
        if self.sender.send(msg).await.is_err() {
            tracing::debug!("connection gone, reply dropped");
        }
    }
}

/// Applies one uploaded chunk; returns the directory it landed in.
fn receive_chunk(
    storage_root: &Path,
    assembler: &mut Assembler,
    chunk: TransferChunk,
) -> Result<(PathBuf, Received), ServerError> {
    let dir = resolve_in_root(storage_root, &chunk.destination_root)?;
    let received = assembler.accept(&dir, chunk)?;
    Ok((dir, received))
}

/// Streams every requested path under the storage root to the client.
fn send_download(
    storage_root: &Path,
    req: &FileFetchRequest,
    sender: &Sender,
    chunk_size: usize,
) -> Result<u64, ServerError> {
    let mut sources = Vec::with_capacity(req.paths.len());
    for requested in &req.paths {
        match resolve_in_root(storage_root, requested) {
            Ok(path) => sources.push(path),
            Err(e) => tracing::warn!(path = %requested, "fetch refused: {e}"),
        }
    }

    let plan = TransferPlan::build(
        &sources,
        storage_root,
        req.destination_path.as_str(),
        chunk_size,
    )?;
    tracing::info!(
        items = plan.items().len(),
        chunks = plan.total_chunks(),
        "download planned"
    );

    let done = plan.send(
        |chunk| {
            sender
                .blocking_send(Message::TransferChunk(chunk))
                .map_err(|_| TransferError::SinkClosed)
        },
        |_| {},
    )?;
    Ok(done.completed)
}
