//! SHA-256 content hashing over async byte streams.
//!
//! Two entry points share one digest definition:
//! - [`HashingReader`] folds bytes into the digest as a consumer pulls them
//!   through, so an upload is hashed during the same pass that writes it to
//!   the blob store.
//! - [`hash_reader`] drains a reader on its own, for rehashing stored blobs.
//!
//! Both work in bounded memory regardless of file size.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::error::{AppError, Result};

/// Default read chunk: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Hex-encoded SHA-256 digest of a file's full content (64 lowercase chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub const HEX_LEN: usize = 64;

    /// Parse a stored hex digest. Returns `None` for anything that is not 64 hex chars.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Hash an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    fn from_hasher(hasher: Sha256) -> Self {
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reader adapter that hashes every byte handed to the consumer.
///
/// Read failures from the wrapped stream are remembered so the caller can
/// tell a broken input apart from a failing sink.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
    read_error: Option<String>,
}

impl<R: AsyncRead + Unpin> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
            read_error: None,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// The read error that aborted the stream, if any.
    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    /// Finish the digest. Fails if the wrapped stream errored at any point.
    pub fn finalize(self) -> Result<ContentHash> {
        match self.read_error {
            Some(e) => Err(AppError::HashComputationFailed(e)),
            None => Ok(ContentHash::from_hasher(self.hasher)),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                this.hasher.update(fresh);
                this.bytes_read += fresh.len() as u64;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.read_error = Some(e.to_string());
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drain `reader` in `chunk_size` pieces and return its digest and length.
pub async fn hash_reader<R>(mut reader: R, chunk_size: usize) -> Result<(ContentHash, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| AppError::HashComputationFailed(e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    Ok((ContentHash::from_hasher(hasher), total))
}
