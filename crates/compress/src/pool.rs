//! Reusable lookahead buffers.
//!
//! Every [`PeekingBuffer`](crate::PeekingBuffer) checks out one 32 KiB buffer
//! when it wraps a stream and hands it back once that stream is exhausted.
//! Returning a buffer consumes its [`PooledBuffer`] handle, so a buffer can't
//! be released twice or touched after release.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Capacity of every pooled buffer.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Idle buffers kept around by a pool; anything released beyond this is freed.
const MAX_IDLE: usize = 16;

static SHARED: BufferPool = BufferPool::new();

/// A free list of lookahead buffers, safe to share between threads.
#[derive(Debug, Default)]
pub struct BufferPool {
    idle: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub const fn new() -> Self {
        Self { idle: Mutex::new(Vec::new()) }
    }

    /// The process-wide pool used by [`PeekingBuffer::new`](crate::PeekingBuffer::new).
    pub fn shared() -> &'static BufferPool {
        &SHARED
    }

    /// Take an idle buffer, or allocate a fresh one if none are left.
    pub fn checkout(&'static self) -> PooledBuffer {
        let reused = self.lock().pop();
        let bytes = reused.unwrap_or_else(|| {
            tracing::trace!(size = BUFFER_SIZE, "Allocating lookahead buffer");
            vec![0; BUFFER_SIZE].into_boxed_slice()
        });
        PooledBuffer { bytes, pool: self }
    }

    /// Number of buffers currently waiting to be checked out.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        // The list is valid whatever a panicking holder was doing with it.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dropping it frees the memory; only [`release`](Self::release) puts it
/// back into the pool.
#[derive(Debug)]
pub struct PooledBuffer {
    bytes: Box<[u8]>,
    pool: &'static BufferPool,
}

impl PooledBuffer {
    /// Return the buffer to the pool it came from.
    pub fn release(self) {
        let mut idle = self.pool.lock();
        if idle.len() < MAX_IDLE {
            idle.push(self.bytes);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_allocates_full_capacity() {
        static POOL: BufferPool = BufferPool::new();
        let buffer = POOL.checkout();
        assert_eq!(buffer.len(), BUFFER_SIZE);
        assert_eq!(POOL.idle(), 0);
    }

    #[test]
    fn release_makes_buffer_reusable() {
        static POOL: BufferPool = BufferPool::new();
        let buffer = POOL.checkout();
        let address = buffer.as_ptr();
        buffer.release();
        assert_eq!(POOL.idle(), 1);

        let again = POOL.checkout();
        assert_eq!(again.as_ptr(), address);
        assert_eq!(POOL.idle(), 0);
    }

    #[test]
    fn drop_does_not_return_to_pool() {
        static POOL: BufferPool = BufferPool::new();
        drop(POOL.checkout());
        assert_eq!(POOL.idle(), 0);
    }

    #[test]
    fn idle_buffers_are_capped() {
        static POOL: BufferPool = BufferPool::new();
        let buffers: Vec<_> = (0..MAX_IDLE + 4).map(|_| POOL.checkout()).collect();
        buffers.into_iter().for_each(PooledBuffer::release);
        assert_eq!(POOL.idle(), MAX_IDLE);
    }

    #[test]
    fn concurrent_checkout_and_release() {
        static POOL: BufferPool = BufferPool::new();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    for _ in 0..100 {
                        let mut buffer = POOL.checkout();
                        buffer[0] = 1;
                        buffer.release();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(POOL.idle() <= 8);
    }
}
