//! Receiver path — reassemble chunked files, verify checksums, and
//! materialize completed transfers atomically.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use ferry_core::checksum;
use ferry_core::limits::{chunk_count, CHUNK_RETRY_REQUESTS};
use ferry_core::wire::{decode_content, Message};

use crate::channel::MessageWriter;
use crate::suppress::SuppressionSet;

/// One in-progress file, keyed by relative path.
///
/// Slots are pre-sized from the announced total so completion is
/// simply "no empty slot" — no open-ended map to second-guess.
struct Transfer {
    total_size: u64,
    slots: Vec<Option<Bytes>>,
    retry_requests: Vec<u32>,
}

impl Transfer {
    fn new(total_size: u64) -> Self {
        let slots = chunk_count(total_size) as usize;
        Self {
            total_size,
            slots: vec![None; slots],
            retry_requests: vec![0; slots],
        }
    }

    fn received_bytes(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(|chunk| chunk.len() as u64)
            .sum()
    }

    fn is_complete(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_some())
    }
}

/// Tracks files being reassembled from incoming chunks and writes
/// everything the peer sends under the shared folder.
pub struct Reassembler {
    active: Arc<DashMap<String, Transfer>>,
    folder: PathBuf,
    suppress: SuppressionSet,
}

impl Reassembler {
    pub fn new(folder: PathBuf, suppress: SuppressionSet) -> Self {
        std::fs::create_dir_all(&folder).ok();
        Self {
            active: Arc::new(DashMap::new()),
            folder,
            suppress,
        }
    }

    /// Process one file_chunk message. A checksum mismatch answers
    /// with a retry_chunk request and stores nothing.
    pub async fn handle_chunk(
        &self,
        writer: &MessageWriter,
        path: String,
        content: String,
        chunk_num: u64,
        total_size: u64,
        announced: String,
    ) -> Result<()> {
        let data = Bytes::from(decode_content(&content).context("chunk content decode failed")?);

        if !checksum::verify(&data, &announced) {
            let retry = {
                let mut transfer = self
                    .active
                    .entry(path.clone())
                    .or_insert_with(|| Transfer::new(total_size));
                let index = chunk_num as usize;
                if index >= transfer.retry_requests.len() {
                    return Ok(());
                }
                transfer.retry_requests[index] += 1;
                transfer.retry_requests[index]
            };
            if retry > CHUNK_RETRY_REQUESTS {
                tracing::warn!(
                    path,
                    chunk_num,
                    "retry requests exhausted; transfer left incomplete"
                );
                return Ok(());
            }
            tracing::warn!(path, chunk_num, retry, "checksum mismatch, requesting retry");
            writer
                .send(&Message::RetryChunk {
                    path,
                    chunk_num,
                    retry,
                })
                .await
                .context("failed to send retry request")?;
            return Ok(());
        }

        let mut transfer = self
            .active
            .entry(path.clone())
            .or_insert_with(|| Transfer::new(total_size));

        let index = chunk_num as usize;
        if index >= transfer.slots.len() {
            tracing::warn!(
                path,
                chunk_num,
                expected = transfer.slots.len(),
                "chunk index out of range, discarding"
            );
            return Ok(());
        }

        // A duplicate valid chunk overwrites harmlessly.
        transfer.slots[index] = Some(data);
        tracing::info!(
            path,
            chunk_num,
            received = transfer.received_bytes(),
            total = transfer.total_size,
            "chunk stored"
        );

        if transfer.is_complete() {
            let assembled: Vec<u8> = transfer
                .slots
                .iter()
                .flatten()
                .flat_map(|chunk| chunk.iter().copied())
                .collect();
            let total = transfer.total_size;
            drop(transfer);
            self.active.remove(&path);

            self.materialize(&path, &assembled)?;
            tracing::info!(path, bytes = total, "file received and reassembled");
        }
        Ok(())
    }

    /// Whole-file sync for files smaller than one chunk.
    pub fn handle_sync(&self, path: String, content: String) -> Result<()> {
        let data = decode_content(&content).context("sync content decode failed")?;
        self.materialize(&path, &data)?;
        tracing::info!(path, bytes = data.len(), "file synced from peer");
        Ok(())
    }

    /// Remove the named file from the shared folder.
    pub fn handle_delete(&self, path: String) -> Result<()> {
        let dest = resolve_under(&self.folder, &path)?;
        match std::fs::remove_file(&dest) {
            Ok(()) => tracing::info!(path, "file deleted on peer's request"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path, "delete for a file we do not have")
            }
            Err(e) => return Err(e).with_context(|| format!("failed to delete {path}")),
        }
        self.active.remove(&path);
        Ok(())
    }

    /// Paths currently being reassembled, for progress listings.
    pub fn in_progress(&self) -> Vec<(String, u64, u64)> {
        self.active
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().received_bytes(),
                    entry.value().total_size,
                )
            })
            .collect()
    }

    /// Write through a temporary file and rename into place, creating
    /// parent directories as needed.
    fn materialize(&self, rel_path: &str, data: &[u8]) -> Result<()> {
        let dest = resolve_under(&self.folder, rel_path)?;
        let parent = dest
            .parent()
            .context("destination has no parent directory")?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let tmp = tempfile::NamedTempFile::new_in(parent)
            .context("failed to create temporary file")?;
        std::io::Write::write_all(&mut tmp.as_file(), data)
            .context("failed to write temporary file")?;
        tmp.persist(&dest)
            .with_context(|| format!("failed to move into {}", dest.display()))?;

        self.suppress.insert(rel_path);
        Ok(())
    }
}

impl Clone for Reassembler {
    fn clone(&self) -> Self {
        Self {
            active: self.active.clone(),
            folder: self.folder.clone(),
            suppress: self.suppress.clone(),
        }
    }
}

/// Join a wire-supplied relative path under the shared folder,
/// rejecting traversal and ignoring absolute components.
fn resolve_under(folder: &Path, rel_path: &str) -> Result<PathBuf> {
    let mut joined = folder.to_path_buf();
    for component in Path::new(rel_path).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::ParentDir => bail!("path {rel_path:?} contains a parent component"),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if joined == folder {
        bail!("path {rel_path:?} names no file");
    }
    Ok(joined)
}
