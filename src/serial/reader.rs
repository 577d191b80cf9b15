//! # Reader Module
//!
//! The background loop that moves bytes from the link into the
//! [`ReadBuffer`].
//!
//! One [`ReaderTask`] runs per connection on tokio's blocking pool. Every read
//! is bounded by a timeout, so the loop looks at its [`CancelToken`] at a fixed
//! cadence even when the device is silent. A read error while the token is
//! unset is a fault: it is reported on the fault channel and the loop ends.
//! Errors seen after the token is set are the closed handle from a disconnect
//! and end the loop quietly.

use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::LinkError;
use crate::serial::buffer::ReadBuffer;
use crate::serial::link::{Link, ReadOutcome};

/// Upper bound on one read, and so on cancellation latency.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `disconnect` waits for the reader to stop.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Largest chunk requested per read.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Cooperative stop flag for one reader.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reader timing settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderConfig {
    pub read_timeout: Duration,
    pub join_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            read_timeout: DEFAULT_READ_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// A read failure reported to the consumer thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderFault {
    /// Session the failing reader belonged to.
    pub session: u64,
    pub error: LinkError,
}

/// How a reader loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReaderExit {
    Cancelled,
    Failed(LinkError),
}

/// Handle to a running reader loop.
///
/// Dropping the handle cancels the loop without waiting for it.
pub struct ReaderTask {
    session: u64,
    token: CancelToken,
    handle: JoinHandle<ReaderExit>,
}

impl ReaderTask {
    /// Start reading `link` into `buffer` on the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        session: u64,
        link: Arc<dyn Link>,
        buffer: ReadBuffer,
        faults: mpsc::UnboundedSender<ReaderFault>,
        config: &ReaderConfig,
    ) -> Self {
        let token = CancelToken::new();
        let loop_token = token.clone();
        let read_timeout = config.read_timeout;
        let chunk_size = config.chunk_size;
        let handle = tokio::task::spawn_blocking(move || {
            read_loop(
                session,
                link.as_ref(),
                &buffer,
                &loop_token,
                &faults,
                read_timeout,
                chunk_size,
            )
        });
        ReaderTask {
            session,
            token,
            handle,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the loop to end.
    ///
    /// On timeout the loop is left running detached and `Err(timeout)` is
    /// returned.
    pub async fn join(mut self, timeout: Duration) -> Result<ReaderExit, Duration> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(Ok(exit)) => Ok(exit),
            Ok(Err(e)) => {
                warn!("Reader {} did not finish cleanly: {e}", self.session);
                Ok(ReaderExit::Failed(LinkError::io(e.to_string())))
            }
            Err(_) => Err(timeout),
        }
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn read_loop(
    session: u64,
    link: &dyn Link,
    buffer: &ReadBuffer,
    token: &CancelToken,
    faults: &mpsc::UnboundedSender<ReaderFault>,
    read_timeout: Duration,
    chunk_size: usize,
) -> ReaderExit {
    debug!("Reader {session} started");
    loop {
        if token.is_cancelled() {
            debug!("Reader {session} cancelled");
            return ReaderExit::Cancelled;
        }

        match link.read(chunk_size, read_timeout) {
            Ok(ReadOutcome::Data(bytes)) => {
                if !bytes.is_empty() && !buffer.append_unless_cancelled(token, &bytes) {
                    debug!("Reader {session} cancelled, dropped {} bytes", bytes.len());
                    return ReaderExit::Cancelled;
                }
            }
            Ok(ReadOutcome::TimedOut) => {}
            Err(error) if token.is_cancelled() => {
                debug!("Reader {session} stopped by disconnect: {error}");
                return ReaderExit::Cancelled;
            }
            Err(error) => {
                warn!("Reader {session} stopped: {error}");
                let _ = faults.send(ReaderFault {
                    session,
                    error: error.clone(),
                });
                return ReaderExit::Failed(error);
            }
        }
    }
}
