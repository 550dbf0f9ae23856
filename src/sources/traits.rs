//! Gateway trait definition
//!
//! The EPG source is the only long-latency collaborator of this crate and
//! is treated as a black box with unspecified latency and possibly partial
//! or empty results. It carries its own timeout/retry contract; callers
//! treat "no response" identically to "failure".

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::GatewayError;
use crate::models::Program;

/// A source of program listings for channels, keyed by `tvg_id`
#[async_trait]
pub trait EpgGateway: Send + Sync {
    /// Fetch programs for one channel covering at least `[from, to]`
    ///
    /// Implementations may return programs extending beyond the requested
    /// range; an empty list for a valid range is not an error.
    async fn fetch_programs(
        &self,
        tvg_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Program>, GatewayError>;

    /// Optional liveness probe; sources without one report healthy
    async fn current_healthy(&self) -> bool {
        true
    }
}
