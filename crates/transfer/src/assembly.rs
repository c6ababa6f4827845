use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use nimbus_protocol::TransferChunk;
use nimbus_protocol::constants::MAX_CHUNK_SIZE;
use tracing::{debug, warn};

use crate::TransferError;
use crate::validation::validate_relative_path;

/// Outcome of feeding one chunk to the [`Assembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// An empty directory was created.
    Directory(PathBuf),
    /// A file is now complete on disk.
    File(PathBuf),
    /// A multi-part file is still missing parts.
    Pending { path: PathBuf, next_expected: u32 },
}

impl Received {
    pub fn path(&self) -> &Path {
        match self {
            Received::Directory(p) | Received::File(p) | Received::Pending { path: p, .. } => p,
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self, Received::Pending { .. })
    }
}

/// Reassembly state of one multi-part file.
///
/// Parts below `next_expected` are already on disk in order; the rest wait
/// in `buffered` until the gap before them closes.
#[derive(Debug)]
pub struct PendingAssembly {
    next_expected: u32,
    total_parts: u32,
    buffered: BTreeMap<u32, Vec<u8>>,
}

impl PendingAssembly {
    fn new(total_parts: u32) -> Self {
        Self {
            next_expected: 1,
            total_parts,
            buffered: BTreeMap::new(),
        }
    }

    pub fn next_expected(&self) -> u32 {
        self.next_expected
    }

    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    pub fn buffered_parts(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_complete(&self) -> bool {
        self.next_expected > self.total_parts
    }

    /// Appends every ready part to `file_path`.
    fn drain(&mut self, file_path: &Path) -> std::io::Result<()> {
        let Some(mut ready) = self.buffered.remove(&self.next_expected) else {
            return Ok(());
        };

        let mut file = OpenOptions::new().append(true).open(file_path)?;
        loop {
            file.write_all(&ready)?;
            self.next_expected += 1;
            match self.buffered.remove(&self.next_expected) {
                Some(next) => ready = next,
                None => break,
            }
        }
        file.flush()
    }
}

/// Receiving side of a transfer, one per connection.
///
/// Chunks of several files may interleave; each file has its own
/// [`PendingAssembly`] keyed by destination path.
#[derive(Debug, Default)]
pub struct Assembler {
    pending: HashMap<PathBuf, PendingAssembly>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files with outstanding parts.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, path: &Path) -> Option<&PendingAssembly> {
        self.pending.get(path)
    }

    /// Applies one chunk under `destination_root`.
    ///
    /// On an I/O error the file's pending state is dropped and the error is
    /// returned; other files are unaffected.
    pub fn accept(
        &mut self,
        destination_root: &Path,
        chunk: TransferChunk,
    ) -> Result<Received, TransferError> {
        validate_chunk(&chunk)?;
        let target = destination_root.join(&chunk.relative_path);

        if chunk.is_single_part() {
            return write_single(target, &chunk);
        }

        let result = self.accept_part(&target, chunk);
        if result.is_err() {
            self.pending.remove(&target);
        }
        result
    }

    fn accept_part(
        &mut self,
        target: &Path,
        chunk: TransferChunk,
    ) -> Result<Received, TransferError> {
        if !self.pending.contains_key(target) {
            start_file(target)?;
            self.pending
                .insert(target.to_path_buf(), PendingAssembly::new(chunk.total_parts));
        }

        let Some(state) = self.pending.get_mut(target) else {
            return Err(TransferError::InvalidChunk {
                path: chunk.relative_path,
                reason: "assembly state missing".into(),
            });
        };

        if state.total_parts != chunk.total_parts {
            warn!(
                path = %target.display(),
                expected = state.total_parts,
                got = chunk.total_parts,
                "part count changed mid-transfer, dropping chunk"
            );
            return Ok(Received::Pending {
                path: target.to_path_buf(),
                next_expected: state.next_expected,
            });
        }

        if chunk.part_index < state.next_expected || state.buffered.contains_key(&chunk.part_index)
        {
            debug!(path = %target.display(), part = chunk.part_index, "duplicate part ignored");
        } else {
            state.buffered.insert(chunk.part_index, chunk.payload);
            state.drain(target)?;
        }

        if state.is_complete() {
            debug!(path = %target.display(), parts = state.total_parts, "file assembled");
            self.pending.remove(target);
            return Ok(Received::File(target.to_path_buf()));
        }

        Ok(Received::Pending {
            path: target.to_path_buf(),
            next_expected: state.next_expected,
        })
    }
}

fn validate_chunk(chunk: &TransferChunk) -> Result<(), TransferError> {
    validate_relative_path(&chunk.relative_path)?;

    let invalid = |reason: String| TransferError::InvalidChunk {
        path: chunk.relative_path.clone(),
        reason,
    };

    if chunk.total_parts == 0 {
        return Err(invalid("total_parts is zero".into()));
    }
    if chunk.part_index == 0 || chunk.part_index > chunk.total_parts {
        return Err(invalid(format!(
            "part {} outside 1..={}",
            chunk.part_index, chunk.total_parts
        )));
    }
    if chunk.payload.len() > MAX_CHUNK_SIZE {
        return Err(invalid(format!(
            "payload of {} bytes exceeds {MAX_CHUNK_SIZE}",
            chunk.payload.len()
        )));
    }
    if chunk.empty_file && !chunk.payload.is_empty() {
        return Err(invalid("empty-file marker with payload".into()));
    }
    Ok(())
}

fn write_single(target: PathBuf, chunk: &TransferChunk) -> Result<Received, TransferError> {
    if chunk.is_directory_marker() {
        std::fs::create_dir_all(&target)?;
        return Ok(Received::Directory(target));
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, &chunk.payload)?;
    Ok(Received::File(target))
}

/// Creates an empty file at `target`, replacing whatever stale file was there.
fn start_file(target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunked::TransferPlan;
    use std::fs;
    use tempfile::TempDir;

    const C: usize = 16;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn chunks_for(data: &[u8], name: &str) -> (TempDir, Vec<TransferChunk>) {
        let src = TempDir::new().unwrap();
        let path = src.path().join(name);
        fs::write(&path, data).unwrap();

        let plan = TransferPlan::build([&path], src.path(), "", C).unwrap();
        let mut chunks = Vec::new();
        plan.send(
            |c| {
                chunks.push(c);
                Ok(())
            },
            |_| {},
        )
        .unwrap();
        (src, chunks)
    }

    fn part(name: &str, index: u32, total: u32, payload: &[u8]) -> TransferChunk {
        TransferChunk {
            relative_path: name.into(),
            destination_root: String::new(),
            payload: payload.to_vec(),
            part_index: index,
            total_parts: total,
            empty_file: false,
        }
    }

    #[test]
    fn roundtrip_reproduces_every_size() {
        for size in [0, 1, C - 1, C, C + 1, 10 * C, 10 * C + 1] {
            let data = pattern(size);
            let (_src, chunks) = chunks_for(&data, "file.bin");
            assert_eq!(chunks.len() as u64, crate::parts_for_size(size as u64, C));

            let dst = TempDir::new().unwrap();
            let mut assembler = Assembler::new();
            let mut last = None;
            for chunk in chunks {
                last = Some(assembler.accept(dst.path(), chunk).unwrap());
            }

            assert_eq!(last, Some(Received::File(dst.path().join("file.bin"))));
            assert_eq!(fs::read(dst.path().join("file.bin")).unwrap(), data, "size {size}");
            assert_eq!(assembler.pending_count(), 0);
        }
    }

    fn assemble_in_order(order: &[u32]) -> Vec<u8> {
        let data = pattern(5 * C);
        let (_src, chunks) = chunks_for(&data, "shuffled.bin");
        assert_eq!(chunks.len(), 5);

        let dst = TempDir::new().unwrap();
        let target = dst.path().join("shuffled.bin");
        let mut assembler = Assembler::new();

        for (n, &index) in order.iter().enumerate() {
            let chunk = chunks[(index - 1) as usize].clone();
            let received = assembler.accept(dst.path(), chunk).unwrap();

            if n + 1 < order.len() {
                let state = assembler.pending(&target).unwrap();
                assert!(state.next_expected() <= state.total_parts() + 1);
                let on_disk = fs::metadata(&target).unwrap().len();
                assert_eq!(on_disk, (state.next_expected() as u64 - 1) * C as u64);
                assert!(!received.is_complete());
            } else {
                assert_eq!(received, Received::File(target.clone()));
            }
        }

        let out = fs::read(&target).unwrap();
        assert_eq!(out, data);
        out
    }

    #[test]
    fn reversed_parts_assemble() {
        assemble_in_order(&[5, 4, 3, 2, 1]);
    }

    #[test]
    fn shuffled_parts_assemble() {
        assemble_in_order(&[3, 1, 5, 2, 4]);
        assemble_in_order(&[2, 5, 1, 4, 3]);
    }

    #[test]
    fn duplicates_are_ignored() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();

        assembler.accept(dst.path(), part("d.bin", 1, 3, b"aa")).unwrap();
        assembler.accept(dst.path(), part("d.bin", 1, 3, b"XX")).unwrap();
        assembler.accept(dst.path(), part("d.bin", 3, 3, b"cc")).unwrap();
        assembler.accept(dst.path(), part("d.bin", 3, 3, b"YY")).unwrap();
        let last = assembler.accept(dst.path(), part("d.bin", 2, 3, b"bb")).unwrap();

        assert!(last.is_complete());
        assert_eq!(fs::read(dst.path().join("d.bin")).unwrap(), b"aabbcc");
    }

    #[test]
    fn completing_one_file_keeps_others_pending() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();

        assembler.accept(dst.path(), part("one.bin", 1, 2, b"11")).unwrap();
        assembler.accept(dst.path(), part("two.bin", 2, 2, b"22")).unwrap();
        let done = assembler.accept(dst.path(), part("one.bin", 2, 2, b"11")).unwrap();
        assert!(done.is_complete());

        assert_eq!(assembler.pending_count(), 1);
        let two = assembler.pending(&dst.path().join("two.bin")).unwrap();
        assert_eq!(two.next_expected(), 1);
        assert_eq!(two.buffered_parts(), 1);

        let done = assembler.accept(dst.path(), part("two.bin", 1, 2, b"2a")).unwrap();
        assert!(done.is_complete());
        assert_eq!(fs::read(dst.path().join("two.bin")).unwrap(), b"2a22");
    }

    #[test]
    fn stale_longer_file_is_replaced() {
        let dst = TempDir::new().unwrap();
        fs::write(dst.path().join("old.txt"), b"a much longer previous version").unwrap();
        fs::write(dst.path().join("multi.txt"), b"previous content that is long").unwrap();

        let mut assembler = Assembler::new();
        assembler.accept(dst.path(), part("old.txt", 1, 1, b"new")).unwrap();
        assembler.accept(dst.path(), part("multi.txt", 1, 2, b"ne")).unwrap();
        assembler.accept(dst.path(), part("multi.txt", 2, 2, b"w")).unwrap();

        assert_eq!(fs::read(dst.path().join("old.txt")).unwrap(), b"new");
        assert_eq!(fs::read(dst.path().join("multi.txt")).unwrap(), b"new");
    }

    #[test]
    fn stale_file_replaced_when_later_part_arrives_first() {
        let dst = TempDir::new().unwrap();
        fs::write(dst.path().join("late.txt"), b"stale stale stale").unwrap();

        let mut assembler = Assembler::new();
        assembler.accept(dst.path(), part("late.txt", 2, 2, b"d")).unwrap();
        assert_eq!(fs::metadata(dst.path().join("late.txt")).unwrap().len(), 0);
        assembler.accept(dst.path(), part("late.txt", 1, 2, b"ol")).unwrap();
        assert_eq!(fs::read(dst.path().join("late.txt")).unwrap(), b"old");
    }

    #[test]
    fn directory_placeholder_creates_directory() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();
        let received = assembler
            .accept(dst.path(), TransferChunk::directory("a/b/empty", ""))
            .unwrap();
        assert_eq!(received, Received::Directory(dst.path().join("a/b/empty")));
        assert!(dst.path().join("a/b/empty").is_dir());
    }

    #[test]
    fn empty_file_marker_creates_zero_byte_file() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();
        let received = assembler
            .accept(dst.path(), TransferChunk::empty_file("sub/zero.bin", ""))
            .unwrap();
        assert!(matches!(received, Received::File(_)));
        assert_eq!(fs::metadata(dst.path().join("sub/zero.bin")).unwrap().len(), 0);
    }

    #[test]
    fn invalid_chunks_are_rejected() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();

        assert!(matches!(
            assembler.accept(dst.path(), part("../escape", 1, 1, b"x")),
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            assembler.accept(dst.path(), part("a", 0, 1, b"x")),
            Err(TransferError::InvalidChunk { .. })
        ));
        assert!(matches!(
            assembler.accept(dst.path(), part("a", 3, 2, b"x")),
            Err(TransferError::InvalidChunk { .. })
        ));
        assert!(matches!(
            assembler.accept(dst.path(), part("a", 1, 1, &vec![0u8; MAX_CHUNK_SIZE + 1])),
            Err(TransferError::InvalidChunk { .. })
        ));
        assert_eq!(assembler.pending_count(), 0);
    }

    #[test]
    fn io_error_drops_only_that_file() {
        let dst = TempDir::new().unwrap();
        let mut assembler = Assembler::new();
        assembler.accept(dst.path(), part("keep.bin", 1, 2, b"k")).unwrap();

        // A regular file where a parent directory is needed.
        fs::write(dst.path().join("blocker"), b"").unwrap();
        let err = assembler.accept(dst.path(), part("blocker/x.bin", 1, 2, b"x"));
        assert!(matches!(err, Err(TransferError::Io(_))));

        assert_eq!(assembler.pending_count(), 1);
        assert!(assembler.pending(&dst.path().join("keep.bin")).is_some());
    }
}
