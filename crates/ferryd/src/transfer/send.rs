//! Sender path — partition a file into chunks and push them through
//! the single-writer channel under concurrency and rate limits.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use ferry_core::checksum::md5_hex;
use ferry_core::limits::{CHUNK_RETRY_BACKOFF, CHUNK_SEND_RETRIES, CHUNK_SIZE, MAX_CHUNKS_IN_FLIGHT};
use ferry_core::wire::{encode_content, Message};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::channel::MessageWriter;

use super::RateLimiter;

/// Send one file to the peer. Files smaller than one chunk go as a
/// single whole-file sync message; everything else is chunked with at
/// most [`MAX_CHUNKS_IN_FLIGHT`] chunks in flight.
pub async fn send_file(
    writer: MessageWriter,
    limiter: RateLimiter,
    source: &Path,
    rel_path: &str,
) -> Result<()> {
    let data = tokio::fs::read(source)
        .await
        .with_context(|| format!("failed to read {}", source.display()))?;
    let total_size = data.len() as u64;

    if data.len() < CHUNK_SIZE {
        limiter.acquire(data.len()).await;
        writer
            .send(&Message::Sync {
                path: rel_path.to_string(),
                content: encode_content(&data),
            })
            .await
            .with_context(|| format!("failed to sync {rel_path}"))?;
        tracing::info!(path = rel_path, bytes = total_size, "file synced whole");
        return Ok(());
    }

    let data = Bytes::from(data);
    let chunk_count = ferry_core::limits::chunk_count(total_size);
    let semaphore = Arc::new(Semaphore::new(MAX_CHUNKS_IN_FLIGHT));
    let sent_bytes = Arc::new(AtomicU64::new(0));
    let mut tasks = JoinSet::new();

    for chunk_num in 0..chunk_count {
        let start = chunk_num as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(data.len());
        let chunk = data.slice(start..end);

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore never closed");
        let writer = writer.clone();
        let limiter = limiter.clone();
        let sent_bytes = sent_bytes.clone();
        let path = rel_path.to_string();

        tasks.spawn(async move {
            let _permit = permit;
            limiter.acquire(chunk.len()).await;

            let message = Message::FileChunk {
                path: path.clone(),
                content: encode_content(&chunk),
                chunk_num,
                total_size,
                checksum: md5_hex(&chunk),
            };
            if send_with_retry(&writer, &message).await {
                let sent = sent_bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed)
                    + chunk.len() as u64;
                tracing::info!(path, chunk_num, sent, total = total_size, "chunk sent");
            } else {
                tracing::warn!(
                    path,
                    chunk_num,
                    "chunk abandoned after {CHUNK_SEND_RETRIES} retries; transfer will be incomplete"
                );
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.context("chunk sender panicked")?;
    }

    tracing::info!(
        path = rel_path,
        bytes = sent_bytes.load(Ordering::Relaxed),
        total = total_size,
        chunks = chunk_count,
        "file send finished"
    );
    Ok(())
}

/// Re-send a single chunk the receiver reported as corrupted.
pub async fn resend_chunk(
    writer: MessageWriter,
    limiter: RateLimiter,
    source: &Path,
    rel_path: &str,
    chunk_num: u64,
    retry: u32,
) -> Result<()> {
    let data = tokio::fs::read(source)
        .await
        .with_context(|| format!("failed to re-read {}", source.display()))?;
    let start = (chunk_num as usize).saturating_mul(CHUNK_SIZE);
    if start >= data.len() {
        anyhow::bail!("retry for chunk {chunk_num} past the end of {rel_path}");
    }
    let end = (start + CHUNK_SIZE).min(data.len());
    let chunk = &data[start..end];

    limiter.acquire(chunk.len()).await;
    let message = Message::FileChunk {
        path: rel_path.to_string(),
        content: encode_content(chunk),
        chunk_num,
        total_size: data.len() as u64,
        checksum: md5_hex(chunk),
    };
    tracing::info!(path = rel_path, chunk_num, retry, "re-sending chunk");
    if !send_with_retry(&writer, &message).await {
        anyhow::bail!("retransmit of chunk {chunk_num} exhausted its retries");
    }
    Ok(())
}

/// Write a frame, retrying transport failures with a fixed backoff.
/// Returns false once the retries are exhausted; the chunk is then
/// abandoned without aborting the rest of the transfer.
async fn send_with_retry(writer: &MessageWriter, message: &Message) -> bool {
    for attempt in 1..=CHUNK_SEND_RETRIES {
        match writer.send(message).await {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!(attempt, error = %e, "chunk send failed");
                if attempt < CHUNK_SEND_RETRIES {
                    tokio::time::sleep(CHUNK_RETRY_BACKOFF).await;
                }
            }
        }
    }
    false
}
