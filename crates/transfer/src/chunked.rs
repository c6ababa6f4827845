use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use nimbus_protocol::TransferChunk;
use nimbus_protocol::constants::MAX_CHUNK_SIZE;
use tracing::{debug, warn};

use crate::progress::TransferProgress;
use crate::validation::relative_to;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Number of chunks needed for a file of `size` bytes.
///
/// A zero-byte file still takes one (flagged) chunk.
pub fn parts_for_size(size: u64, chunk_size: usize) -> u64 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size as u64)
}

fn effective_chunk_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_CHUNK_SIZE,
        n => n.min(MAX_CHUNK_SIZE),
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file sequentially in fixed-size parts.
///
/// Only one part is held in memory at a time.
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// A `chunk_size` of 0 selects [`DEFAULT_CHUNK_SIZE`]; larger values are
    /// capped at the protocol maximum.
    pub fn new(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            chunk_size: effective_chunk_size(chunk_size),
            offset: 0,
            file_size,
        })
    }

    /// Reads the next part. Returns `None` once the whole file was read.
    ///
    /// Every part except the last is exactly `chunk_size` bytes.
    pub fn next_part(&mut self) -> Result<Option<Vec<u8>>, TransferError> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(None);
        }

        let len = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf)?;
        self.offset += len as u64;
        Ok(Some(buf))
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn remaining(&self) -> u64 {
        self.file_size - self.offset
    }
}

// ---------------------------------------------------------------------------
// TransferPlan
// ---------------------------------------------------------------------------

/// One unit of work in a [`TransferPlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    /// Empty directory, sent as a single placeholder chunk.
    Directory { relative_path: String },
    /// Regular file, sent as `total_parts` chunks.
    File {
        source: PathBuf,
        relative_path: String,
        size: u64,
        total_parts: u32,
    },
}

impl PlanItem {
    pub fn relative_path(&self) -> &str {
        match self {
            PlanItem::Directory { relative_path } | PlanItem::File { relative_path, .. } => {
                relative_path
            }
        }
    }

    fn chunk_count(&self) -> u64 {
        match self {
            PlanItem::Directory { .. } => 1,
            PlanItem::File { total_parts, .. } => u64::from(*total_parts),
        }
    }
}

/// The fully expanded list of what a send will emit.
///
/// Directories are walked pre-order with children sorted by name. Non-empty
/// directories produce no item of their own: their descendants imply them.
#[derive(Debug, Clone)]
pub struct TransferPlan {
    items: Vec<PlanItem>,
    destination_root: String,
    chunk_size: usize,
}

impl TransferPlan {
    /// Expands `paths` (files or directories under `source_root`).
    pub fn build<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        source_root: &Path,
        destination_root: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        let chunk_size = effective_chunk_size(chunk_size);
        let mut items = Vec::new();
        let mut seen = HashSet::new();

        for path in paths {
            walk(path.as_ref(), source_root, chunk_size, &mut items, &mut seen)?;
        }

        Ok(Self {
            items,
            destination_root: destination_root.into(),
            chunk_size,
        })
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn destination_root(&self) -> &str {
        &self.destination_root
    }

    /// Chunks the send will emit, known before the first one goes out.
    pub fn total_chunks(&self) -> u64 {
        self.items.iter().map(PlanItem::chunk_count).sum()
    }

    /// Streams every chunk into `sink`, in plan order.
    ///
    /// `progress` is called after each chunk. The first error aborts the
    /// send; chunks already handed to the sink are not recalled.
    pub fn send<S, F>(&self, mut sink: S, mut progress: F) -> Result<TransferProgress, TransferError>
    where
        S: FnMut(TransferChunk) -> Result<(), TransferError>,
        F: FnMut(TransferProgress),
    {
        let mut state = TransferProgress::new(self.total_chunks());

        for item in &self.items {
            match item {
                PlanItem::Directory { relative_path } => {
                    sink(TransferChunk::directory(
                        relative_path.as_str(),
                        self.destination_root.as_str(),
                    ))?;
                    state.completed += 1;
                    progress(state);
                }
                PlanItem::File {
                    relative_path,
                    size: 0,
                    ..
                } => {
                    sink(TransferChunk::empty_file(
                        relative_path.as_str(),
                        self.destination_root.as_str(),
                    ))?;
                    state.completed += 1;
                    progress(state);
                }
                PlanItem::File {
                    source,
                    relative_path,
                    size,
                    total_parts,
                } => {
                    let mut reader = ChunkReader::new(source, self.chunk_size)?;
                    if reader.file_size() != *size {
                        return Err(TransferError::SourceChanged(relative_path.clone()));
                    }

                    for part_index in 1..=*total_parts {
                        let payload = reader
                            .next_part()?
                            .ok_or_else(|| TransferError::SourceChanged(relative_path.clone()))?;
                        debug!(
                            path = %relative_path,
                            part = part_index,
                            total = total_parts,
                            bytes = payload.len(),
                            "sending chunk"
                        );
                        sink(TransferChunk {
                            relative_path: relative_path.clone(),
                            destination_root: self.destination_root.clone(),
                            payload,
                            part_index,
                            total_parts: *total_parts,
                            empty_file: false,
                        })?;
                        state.completed += 1;
                        progress(state);
                    }
                }
            }
        }

        Ok(state)
    }
}

fn walk(
    path: &Path,
    root: &Path,
    chunk_size: usize,
    items: &mut Vec<PlanItem>,
    seen: &mut HashSet<String>,
) -> Result<(), TransferError> {
    let metadata = std::fs::symlink_metadata(path)?;
    let relative_path = relative_to(path, root)?;

    if metadata.is_dir() {
        let mut children = std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if children.is_empty() && !relative_path.is_empty() && seen.insert(relative_path.clone()) {
            items.push(PlanItem::Directory { relative_path });
        }
        for child in children {
            walk(&child, root, chunk_size, items, seen)?;
        }
    } else if metadata.is_file() {
        if relative_path.is_empty() {
            return Err(TransferError::InvalidPath(format!(
                "{} is the source root, not a file under it",
                path.display()
            )));
        }
        if !seen.insert(relative_path.clone()) {
            return Ok(());
        }

        let size = metadata.len();
        let total_parts = u32::try_from(parts_for_size(size, chunk_size)).map_err(|_| {
            TransferError::InvalidChunk {
                path: relative_path.clone(),
                reason: format!("{size} bytes needs too many parts"),
            }
        })?;
        items.push(PlanItem::File {
            source: path.to_path_buf(),
            relative_path,
            size,
            total_parts,
        });
    } else {
        warn!(path = %path.display(), "skipping entry that is neither file nor directory");
    }

    Ok(())
}
