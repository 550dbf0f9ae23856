//! Centralized error handling for the EPG/DVR core
//!
//! The error hierarchy mirrors the failure taxonomy of the subsystem:
//!
//! - **Gateway errors**: the EPG source is unreachable or returned garbage.
//!   These never propagate past the pager boundary; they resolve to a
//!   tri-state [`crate::models::FetchOutcome`].
//! - **Archive rejections**: an archive playback request failed validation.
//!   Rejected before any engine interaction; `Display` is the user-visible
//!   reason.
//! - **Playback errors**: fatal media engine failures and bad channel
//!   indices.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for gateway Results
pub type GatewayResult<T> = Result<T, GatewayError>;
