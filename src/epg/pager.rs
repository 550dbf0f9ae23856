//! Incremental EPG paging
//!
//! Extends a channel's loaded window backwards or forwards in whole local
//! days as the user scrolls, clamped to the configured global bounds. At
//! most one gateway call is in flight per (channel, direction); duplicate
//! requests while one is outstanding are dropped, not queued; callers
//! re-request once state settles, and the target range is recomputed from
//! the cache each time, so the retry is idempotent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::config::EpgConfig;
use crate::epg::ProgramWindowCache;
use crate::models::FetchOutcome;
use crate::sources::EpgGateway;
use crate::utils::time::{end_of_day, end_of_day_at, start_of_day, start_of_day_at};

/// Paging direction; `Jump` covers direct date-picker fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PageDirection {
    Past,
    Future,
    Jump,
}

pub struct TimeWindowPager {
    cache: Arc<ProgramWindowCache>,
    gateway: Arc<dyn EpgGateway>,
    config: EpgConfig,
    in_flight: Mutex<HashSet<(String, PageDirection)>>,
}

/// Releases the in-flight slot when the fetch completes, succeeds or not
struct InFlightGuard<'a> {
    registry: &'a Mutex<HashSet<(String, PageDirection)>>,
    key: (String, PageDirection),
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.registry.lock() {
            set.remove(&self.key);
        }
    }
}

impl TimeWindowPager {
    pub fn new(
        cache: Arc<ProgramWindowCache>,
        gateway: Arc<dyn EpgGateway>,
        config: EpgConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            gateway,
            config,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Page the loaded window backwards by `page_days + 1` local days
    ///
    /// With nothing loaded yet, bootstraps the window with today's range
    /// instead. No-op at the global past bound or while a past-page fetch
    /// for this channel is already outstanding.
    pub async fn request_past(&self, channel_id: &str, now: DateTime<Utc>, tz: Tz) -> FetchOutcome {
        let Some((loaded_from, _)) = self.cache.window(channel_id).await else {
            return self.bootstrap_today(channel_id, now, tz).await;
        };

        let global_from = start_of_day(now, tz, -(self.config.days_past as i64));
        if loaded_from <= global_from {
            debug!("Channel {} already at the past paging bound", channel_id);
            return FetchOutcome::Empty;
        }

        let step = self.config.page_days.max(1) as i64 + 1;
        let from = start_of_day(loaded_from, tz, -step).max(global_from);
        let to = loaded_from - Duration::milliseconds(1);

        self.fetch_guarded(channel_id, PageDirection::Past, from, to)
            .await
    }

    /// Page the loaded window forwards by `page_days + 1` local days
    pub async fn request_future(
        &self,
        channel_id: &str,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> FetchOutcome {
        let Some((_, loaded_to)) = self.cache.window(channel_id).await else {
            return self.bootstrap_today(channel_id, now, tz).await;
        };

        let global_to = end_of_day(now, tz, self.config.days_ahead as i64);
        if loaded_to >= global_to {
            debug!("Channel {} already at the future paging bound", channel_id);
            return FetchOutcome::Empty;
        }

        let step = self.config.page_days.max(1) as i64 + 1;
        let from = loaded_to + Duration::milliseconds(1);
        let to = end_of_day(loaded_to, tz, step).min(global_to);

        self.fetch_guarded(channel_id, PageDirection::Future, from, to)
            .await
    }

    /// Check-then-fetch for a direct jump to an arbitrary range
    ///
    /// If `[from, to]` is already covered this is a no-op; otherwise exactly
    /// that range is fetched and merged.
    pub async fn ensure_range(
        &self,
        channel_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchOutcome {
        if self.cache.covers(channel_id, from, to).await {
            debug!(
                "Channel {} window already covers [{} .. {}]",
                channel_id, from, to
            );
            return FetchOutcome::Empty;
        }
        self.fetch_guarded(channel_id, PageDirection::Jump, from, to)
            .await
    }

    /// First fetch for a channel: today's local day
    async fn bootstrap_today(&self, channel_id: &str, now: DateTime<Utc>, tz: Tz) -> FetchOutcome {
        let from = start_of_day(now, tz, 0);
        let to = end_of_day(now, tz, 0);
        self.fetch_guarded(channel_id, PageDirection::Jump, from, to)
            .await
    }

    async fn fetch_guarded(
        &self,
        channel_id: &str,
        direction: PageDirection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchOutcome {
        let key = (channel_id.to_string(), direction);
        {
            let Ok(mut set) = self.in_flight.lock() else {
                return FetchOutcome::Failed;
            };
            if !set.insert(key.clone()) {
                debug!(
                    "Dropping duplicate {:?} page request for channel {} (fetch outstanding)",
                    direction, channel_id
                );
                return FetchOutcome::Empty;
            }
        }
        let _guard = InFlightGuard {
            registry: &self.in_flight,
            key,
        };

        // Tag the fetch with the cache generation so a result arriving
        // after an invalidation is discarded instead of resurrecting a
        // window that no longer exists.
        let issued_for = self.cache.generation().await;

        let programs = match self.gateway.fetch_programs(channel_id, from, to).await {
            Ok(programs) => programs,
            Err(err) => {
                warn!("EPG fetch for channel {} failed: {}", channel_id, err);
                return FetchOutcome::Failed;
            }
        };

        if self.cache.generation().await != issued_for {
            debug!(
                "Discarding stale EPG fetch for channel {} (cache invalidated while in flight)",
                channel_id
            );
            return FetchOutcome::Failed;
        }

        if programs.is_empty() {
            // A valid range with no programs is still "loaded"
            self.cache.expand_window(channel_id, from, to).await;
            return FetchOutcome::Empty;
        }

        self.cache.merge(channel_id, programs.clone()).await;
        self.cache.expand_window(channel_id, from, to).await;
        FetchOutcome::Fetched(programs)
    }
}

/// The fetch range spanning the whole local day containing `day`; used by
/// date-picker callers together with [`TimeWindowPager::ensure_range`]
pub fn day_range(day: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    (start_of_day_at(day, tz), end_of_day_at(day, tz))
}
