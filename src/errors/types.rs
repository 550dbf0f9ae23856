//! Error type definitions for the EPG/DVR core
//!
//! This module defines all error types used throughout the crate, using
//! `thiserror` for automatic trait implementations and error chaining.

use thiserror::Error;

/// Top-level application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// EPG gateway errors
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Archive playback validation failures
    #[error("Archive request rejected: {0}")]
    Archive(#[from] ArchiveRejection),

    /// Playback/engine errors
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Persistence layer errors
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// EPG source gateway errors
///
/// A gateway failure leaves the program cache untouched; the caller may
/// retry by re-requesting once state settles.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Network or service failure reaching the EPG source
    #[error("EPG gateway unavailable: {message}")]
    Unavailable { message: String },

    /// The gateway answered but the payload could not be interpreted
    #[error("EPG gateway returned a bad response: {message}")]
    BadResponse { message: String },
}

/// Archive playback validation failures
///
/// The `Display` output is the human-readable reason surfaced to the user.
/// These are always produced before any media engine interaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRejection {
    /// Channel has no catch-up support (no EPG join key or zero retention)
    #[error("Channel {channel} does not support catch-up/DVR")]
    NoCatchup { channel: String },

    /// Program has not finished airing yet
    #[error("{title} is still airing (ends in {minutes_remaining} minutes)")]
    StillAiring {
        title: String,
        minutes_remaining: i64,
    },

    /// Program start is older than the channel's retention window
    #[error("{title} is outside of the {catchup_days} day archive window")]
    OutsideWindow { title: String, catchup_days: u32 },

    /// No playable archive URL could be derived for the channel
    #[error("Channel {channel} does not provide a catch-up URL")]
    NoUrl { channel: String },

    /// Program carries degenerate times (missing or inverted start/stop)
    #[error("{title} has invalid schedule times")]
    InvalidTimes { title: String },
}

/// Playback state controller errors
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The media engine reported an unrecoverable failure
    #[error("Media engine fatal error: {message}")]
    EngineFatal { message: String },

    /// A playback request referenced a channel index outside the playlist
    #[error("No channel at index {index}")]
    NoSuchChannel { index: usize },

    /// Watch-from-beginning was requested with no resolvable current program
    #[error("No current program to restart on channel {channel}")]
    NoCurrentProgram { channel: String },

    /// An operation required an active playback session
    #[error("Nothing is currently playing")]
    NotPlaying,
}

impl AppError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl GatewayError {
    /// Create an unavailable error from any displayable cause
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create a bad-response error
    pub fn bad_response<S: Into<String>>(message: S) -> Self {
        Self::BadResponse {
            message: message.into(),
        }
    }
}
