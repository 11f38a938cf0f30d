use std::sync::{Mutex, PoisonError};

/// A thread-safe free list of fixed-size relay buffers.
///
/// The pool has no upper bound: it holds at most as many buffers as were
/// ever in use at the same time.
pub struct BufferPool {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Get a buffer from the pool, or allocate one if none is available
    pub fn acquire(&self) -> Vec<u8> {
        let reused = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        reused.unwrap_or_else(|| vec![0; self.buffer_size])
    }

    /// Return a buffer for reuse. Buffers of a foreign size are dropped.
    pub fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        self.free.lock().unwrap_or_else(PoisonError::into_inner).push(buf);
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of buffers currently waiting in the pool
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
