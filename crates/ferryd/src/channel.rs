//! Framed message channel — one length-prefixed JSON message per frame.
//!
//! All outbound traffic for a connection goes through a single cloned
//! [`MessageWriter`]; the write lock guarantees frames never interleave
//! no matter how many chunk senders are active.

use std::sync::Arc;

use ferry_core::limits::MAX_FRAME_SIZE;
use ferry_core::wire::{Message, WireError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// Channel failure modes. `Closed` and `Decode` are reported distinctly
/// from transport errors: a decode failure or an oversized frame
/// consumes exactly one frame and the connection survives it; `Closed`
/// ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("peer closed the stream")]
    Closed,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE}-byte limit")]
    FrameTooLarge(usize),
    #[error(transparent)]
    Decode(WireError),
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-writer half of the channel. Cheap to clone.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl MessageWriter {
    pub fn new(half: OwnedWriteHalf) -> Self {
        Self {
            inner: Arc::new(Mutex::new(half)),
        }
    }

    /// Serialize and write one frame. Holding the lock across the full
    /// write keeps concurrent senders from interleaving frames.
    pub async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let frame = message.to_frame().map_err(ChannelError::Decode)?;
        let mut half = self.inner.lock().await;
        half.write_all(&frame).await?;
        half.flush().await?;
        Ok(())
    }
}

/// Reading half of the channel. Owned by the inbound reader task.
pub struct MessageReader {
    half: OwnedReadHalf,
}

impl MessageReader {
    pub fn new(half: OwnedReadHalf) -> Self {
        Self { half }
    }

    /// Block until one full frame is available and decode it.
    pub async fn receive(&mut self) -> Result<Message, ChannelError> {
        let mut len_buf = [0u8; 4];
        match self.half.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ChannelError::Closed)
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            // The length is known, so skip the body and stay framed;
            // only the offending message is lost.
            let mut remaining = len;
            let mut scratch = [0u8; 8192];
            while remaining > 0 {
                let take = remaining.min(scratch.len());
                match self.half.read_exact(&mut scratch[..take]).await {
                    Ok(_) => remaining -= take,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Err(ChannelError::Closed)
                    }
                    Err(e) => return Err(ChannelError::Io(e)),
                }
            }
            return Err(ChannelError::FrameTooLarge(len));
        }
        let mut body = vec![0u8; len];
        match self.half.read_exact(&mut body).await {
            Ok(_) => {}
            // EOF mid-frame is still end-of-stream, not a decode error.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ChannelError::Closed)
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
        Message::from_slice(&body).map_err(ChannelError::Decode)
    }
}

/// Split a connected stream into channel halves.
pub fn split(stream: tokio::net::TcpStream) -> (MessageReader, MessageWriter) {
    let (read, write) = stream.into_split();
    (MessageReader::new(read), MessageWriter::new(write))
}
