//! Length-prefixed wire framing.
//!
//! Every frame on a replicast stream socket is:
//!
//! ```text
//! [ASCII decimal length] [0x00] [length bytes of body]
//! ```
//!
//! The decoder keeps a carry buffer so frames may arrive split across any
//! number of reads, or several per read.  A frame whose length prefix does
//! not parse is skipped without killing the stream; a frame whose announced
//! length exceeds the configured maximum aborts decoding, and the caller is
//! expected to drop the connection.

use {
    crate::error::{NetError, Result},
    log::{debug, warn},
};

/// Encode one frame: decimal length, NUL separator, body.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let prefix = body.len().to_string();
    let mut buf = Vec::with_capacity(prefix.len() + 1 + body.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.push(0);
    buf.extend_from_slice(body);
    buf
}

/// Incremental frame decoder with a carry buffer.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    /// Create a decoder that rejects frames larger than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Feed a chunk of bytes and return every frame completed by it.
    ///
    /// Empty frames (`0\0`) are tolerated and dropped.  Unparseable length
    /// prefixes are logged and skipped by discarding up to their separator.
    /// Returns [`NetError::FrameTooLarge`] when an announced length exceeds
    /// the maximum; the decoder is unusable afterwards.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(nul) = self.buf.iter().position(|b| *b == 0) else {
                break;
            };

            let len = std::str::from_utf8(&self.buf[..nul])
                .ok()
                .and_then(|prefix| prefix.parse::<usize>().ok());
            let Some(len) = len else {
                warn!("skipping frame with unparseable length prefix ({nul} bytes)");
                self.buf.drain(..=nul);
                continue;
            };

            if len > self.max_frame_bytes {
                return Err(NetError::FrameTooLarge {
                    size: len,
                    max: self.max_frame_bytes,
                });
            }

            let start = nul + 1;
            if self.buf.len() < start + len {
                break;
            }

            let body = self.buf[start..start + len].to_vec();
            self.buf.drain(..start + len);

            if body.is_empty() {
                debug!("dropping empty frame");
                continue;
            }
            frames.push(body);
        }

        Ok(frames)
    }

    /// Number of buffered bytes that do not yet form a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
