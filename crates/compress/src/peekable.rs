//! Buffered lookahead for sniffing a stream without consuming it.

use crate::pool::{BufferPool, PooledBuffer};
use std::io::{self, BufRead, Read};

/// A buffered [`Read`]er whose head can be inspected before it is consumed.
///
/// Bytes returned by [`peek`](Self::peek) are still delivered by the next
/// [`read`](Read::read). The lookahead buffer is checked out of a
/// [`BufferPool`] on construction and returned the moment the wrapped stream
/// reports end-of-data; from then on every read reports end-of-data and the
/// wrapped stream is never touched again. Dropping the reader before that
/// point frees the buffer instead of pooling it.
pub struct PeekingBuffer<R> {
    inner: Option<R>,
    buffer: Option<PooledBuffer>,
    pos: usize,
    filled: usize,
    eof: bool,
}

impl<R: Read> PeekingBuffer<R> {
    /// Wrap a reader using the process-wide [`BufferPool`].
    pub fn new(inner: R) -> Self {
        Self::with_pool(inner, BufferPool::shared())
    }

    /// Wrap a reader, checking the lookahead buffer out of `pool`.
    pub fn with_pool(inner: R, pool: &'static BufferPool) -> Self {
        Self { inner: Some(inner), buffer: Some(pool.checkout()), pos: 0, filled: 0, eof: false }
    }

    /// Look at up to `limit` upcoming bytes without consuming them.
    ///
    /// The returned slice is shorter than `limit` only when the stream ends
    /// first (including an empty stream, which yields an empty slice); that
    /// is not an error. `limit` is capped at [`BUFFER_SIZE`](crate::BUFFER_SIZE).
    /// Peeking the same or a smaller amount again before reading returns the
    /// same bytes.
    pub fn peek(&mut self, limit: usize) -> io::Result<&[u8]> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(&[]);
        };
        let limit = limit.min(buffer.len());
        if self.filled - self.pos < limit && self.pos > 0 {
            buffer.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        while self.filled - self.pos < limit && !self.eof {
            let Some(inner) = self.inner.as_mut() else {
                break;
            };
            match inner.read(&mut buffer[self.filled..]) {
                Ok(0) => self.eof = true,
                Ok(read) => self.filled += read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let end = self.filled.min(self.pos + limit);
        Ok(&buffer[self.pos..end])
    }

    /// Bytes already buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    /// Whether the wrapped stream has been exhausted and the lookahead
    /// buffer handed back.
    pub fn is_finished(&self) -> bool {
        self.buffer.is_none()
    }

    /// Drop the wrapped stream and return the buffer to its pool. Taking
    /// both out of their `Option`s makes repeated calls a no-op.
    fn finish(&mut self) {
        self.inner = None;
        if let Some(buffer) = self.buffer.take() {
            tracing::trace!("Stream exhausted; returning lookahead buffer to pool");
            buffer.release();
        }
        self.pos = 0;
        self.filled = 0;
    }
}

impl<R: Read> BufRead for PeekingBuffer<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.pos = 0;
            self.filled = 0;
            if !self.eof
                && let (Some(inner), Some(buffer)) = (self.inner.as_mut(), self.buffer.as_mut())
            {
                loop {
                    match inner.read(buffer) {
                        Ok(read) => {
                            self.filled = read;
                            break;
                        },
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e),
                    }
                }
                self.eof = self.filled == 0;
            }
            if self.filled == 0 {
                self.finish();
                return Ok(&[]);
            }
        }
        match self.buffer.as_ref() {
            Some(buffer) => Ok(&buffer[self.pos..self.filled]),
            None => Ok(&[]),
        }
    }

    fn consume(&mut self, amount: usize) {
        self.pos = (self.pos + amount).min(self.filled);
    }
}

impl<R: Read> Read for PeekingBuffer<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        // Large reads skip the lookahead entirely once it has been drained.
        if self.pos == self.filled
            && !self.eof
            && out.len() >= crate::BUFFER_SIZE
            && let Some(inner) = self.inner.as_mut()
        {
            let read = inner.read(out)?;
            if read == 0 {
                self.eof = true;
                self.finish();
            }
            return Ok(read);
        }
        let available = self.fill_buf()?;
        let read = available.len().min(out.len());
        out[..read].copy_from_slice(&available[..read]);
        self.consume(read);
        Ok(read)
    }
}
