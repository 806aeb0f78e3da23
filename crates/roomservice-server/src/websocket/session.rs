//! Server-side state for one open WebSocket session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use roomservice_core::SessionId;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Work item for a session's socket writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized envelope, shared between all recipients of a broadcast.
    Frame(Arc<str>),
    /// A heartbeat probe (WebSocket Ping).
    Probe,
}

/// Why a frame could not be queued for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The writer is not keeping up and the queue is full.
    #[error("send queue full")]
    Full,
    /// The writer task is gone.
    #[error("send channel closed")]
    Closed,
    /// The session was already terminated.
    #[error("session terminated")]
    Terminated,
}

/// One open transport connection.
///
/// Owned by the [`SessionRegistry`](super::registry::SessionRegistry);
/// the socket task holds a clone only to route inbound heartbeats and echoes.
pub struct Session {
    /// Opaque session handle.
    pub id: SessionId,
    tx: mpsc::Sender<Outbound>,
    /// When the session was admitted.
    pub opened_at: Instant,
    alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_frames: AtomicU64,
    terminated: CancellationToken,
}

impl Session {
    /// Create a session feeding the given writer channel.
    ///
    /// New sessions start out alive.
    pub fn new(id: SessionId, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            opened_at: now,
            alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            terminated: CancellationToken::new(),
        }
    }

    /// Queue a serialized envelope without waiting.
    pub fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
        self.enqueue(Outbound::Frame(frame))
    }

    /// Queue a heartbeat probe without waiting.
    pub fn probe(&self) -> Result<(), SendError> {
        self.enqueue(Outbound::Probe)
    }

    fn enqueue(&self, item: Outbound) -> Result<(), SendError> {
        if self.is_terminated() {
            return Err(SendError::Terminated);
        }
        self.tx.try_send(item).map_err(|e| {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            }
        })
    }

    /// Frames that could not be queued.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record a heartbeat response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Read and clear the alive flag.
    ///
    /// Returns `true` if a heartbeat response arrived since the last check.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Current alive flag, without clearing it.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Time since the last heartbeat response (or admission).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Ask the socket task to close the connection. Idempotent.
    pub fn terminate(&self) {
        self.terminated.cancel();
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves once the session is terminated.
    pub fn terminated(&self) -> WaitForCancellationFuture<'_> {
        self.terminated.cancelled()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }
}
