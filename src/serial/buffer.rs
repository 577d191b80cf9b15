//! # Buffer Module
//!
//! The shared byte queue between the background reader and the consumer.
//! Appends are checked against the reader's [`CancelToken`] under the same
//! lock that [`ReadBuffer::barrier`] takes, so nothing lands after a
//! disconnect has passed the barrier.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::serial::reader::CancelToken;

/// Bytes received from the link that have not been displayed yet.
///
/// The reader appends, the flush scheduler takes. Clones share the same
/// storage.
#[derive(Clone, Debug, Default)]
pub struct ReadBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `bytes` in arrival order.
    pub fn append(&self, bytes: &[u8]) {
        self.lock().extend_from_slice(bytes);
    }

    /// Append `bytes` unless `token` is cancelled.
    ///
    /// The token is checked while the lock is held, so once [`Self::barrier`]
    /// has returned after a cancel, no append guarded by that token lands.
    pub fn append_unless_cancelled(&self, token: &CancelToken, bytes: &[u8]) -> bool {
        let mut guard = self.lock();
        if token.is_cancelled() {
            return false;
        }
        guard.extend_from_slice(bytes);
        true
    }

    /// Wait for any append in progress to finish.
    pub fn barrier(&self) {
        drop(self.lock());
    }

    /// Take the current contents, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears() {
        let buffer = ReadBuffer::new();
        buffer.append(b"AB");
        buffer.append(b"CD");
        assert_eq!(buffer.take(), b"ABCD");
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn test_clones_share_storage() {
        let buffer = ReadBuffer::new();
        let producer = buffer.clone();
        producer.append(b"xyz");
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_cancelled_append_is_refused() {
        let buffer = ReadBuffer::new();
        let token = CancelToken::new();
        assert!(buffer.append_unless_cancelled(&token, b"a"));
        token.cancel();
        buffer.barrier();
        assert!(!buffer.append_unless_cancelled(&token, b"b"));
        assert_eq!(buffer.take(), b"a");
    }

    #[test]
    fn test_concurrent_appends_keep_chunk_order() {
        let buffer = ReadBuffer::new();
        let producer = buffer.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100u8 {
                producer.append(&[i]);
            }
        });
        let mut drained = Vec::new();
        while drained.len() < 100 {
            drained.extend(buffer.take());
            std::thread::yield_now();
        }
        handle.join().unwrap();
        assert_eq!(drained, (0..100u8).collect::<Vec<_>>());
    }
}
