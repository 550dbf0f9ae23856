//! Media engine seam
//!
//! The controller never talks to a concrete player; it drives this trait
//! and consumes the engine's asynchronous events. Events are tagged with
//! the playback session they belong to so stale callbacks from an
//! abandoned session can be discarded.

use async_trait::async_trait;

use crate::errors::PlaybackError;

/// Monotonic playback session counter; advanced on every user-initiated
/// playback start
pub type SessionId = u64;

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Start playback of a live or archive URI, replacing whatever is
    /// currently playing
    async fn play_uri(&self, uri: &str) -> Result<(), PlaybackError>;

    /// Seek relative to the current position; `false` means the target
    /// fell outside the seekable range and no seek happened
    async fn seek_by(&self, delta_ms: i64) -> bool;

    async fn pause(&self);

    async fn resume(&self);

    async fn stop(&self);

    /// Jump to the default live position; used to recover when the live
    /// window has moved past the current position
    async fn seek_to_live_edge(&self);
}

/// Asynchronous engine notifications, forwarded to
/// [`PlaybackController::handle_engine_event`](crate::playback::PlaybackController::handle_engine_event)
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The stream at `index` in the engine's queue became playable
    Ready { index: usize },
    Buffering,
    /// End of stream; for archive sessions this drives the
    /// "watch next program" prompt
    Ended,
    Error {
        kind: EngineErrorKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The live edge moved past the current seek position; recoverable by
    /// reseeking to the live edge
    BehindLiveWindow,
    Fatal,
}
