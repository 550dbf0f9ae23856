//! Current-program resolution and system time-change classification
//!
//! Answers "what is airing now" from the cache (never fetching), and
//! classifies OS time-change notifications so that callers know whether
//! cached windows are still trustworthy. Wall-clock time and the device
//! timezone are explicit parameters throughout.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::epg::ProgramWindowCache;
use crate::models::{Program, TimeChangeResult, TimeChangeTrigger};
use crate::utils::time::TimezoneSnapshot;

/// How long a resolved "current program" answer stays valid
const CURRENT_PROGRAM_TTL_MS: i64 = 60_000;

struct ResolverInner {
    /// Memoized per-channel answers; cleared on clock or timezone changes
    snapshot: HashMap<String, Option<Program>>,
    snapshot_at: Option<DateTime<Utc>>,
    /// Last observed device timezone; `None` until seeded or first signalled
    timezone: Option<TimezoneSnapshot>,
}

pub struct CurrentProgramResolver {
    cache: Arc<ProgramWindowCache>,
    inner: RwLock<ResolverInner>,
    clock_skew_tolerance: Duration,
}

impl CurrentProgramResolver {
    /// `timezone` seeds the change-detection baseline; with `None` the
    /// first time signal only establishes it and is never reported as a
    /// change
    pub fn new(
        cache: Arc<ProgramWindowCache>,
        clock_skew_tolerance_secs: u64,
        timezone: Option<TimezoneSnapshot>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            inner: RwLock::new(ResolverInner {
                snapshot: HashMap::new(),
                snapshot_at: None,
                timezone,
            }),
            clock_skew_tolerance: Duration::seconds(clock_skew_tolerance_secs as i64),
        })
    }

    /// The program airing on `channel_id` at `now`, if the cache knows it
    ///
    /// Returns `None` for channels without cached EPG and for gaps in the
    /// schedule. Callers may react by asking the pager to fetch; this
    /// method never does.
    pub async fn current_program(&self, channel_id: &str, now: DateTime<Utc>) -> Option<Program> {
        {
            let inner = self.inner.read().await;
            if let (Some(at), Some(cached)) = (inner.snapshot_at, inner.snapshot.get(channel_id)) {
                let age = now - at;
                if age >= Duration::zero() && age < Duration::milliseconds(CURRENT_PROGRAM_TTL_MS) {
                    return cached.clone();
                }
            }
        }

        let current = self
            .cache
            .programs(channel_id)
            .await
            .into_iter()
            .find(|p| p.is_current(now));

        let mut inner = self.inner.write().await;
        inner.snapshot.insert(channel_id.to_string(), current.clone());
        inner.snapshot_at = Some(now);
        current
    }

    /// Observable per-channel "now playing" map
    pub async fn current_programs_snapshot(&self) -> HashMap<String, Option<Program>> {
        self.inner.read().await.snapshot.clone()
    }

    /// Drop memoized answers so the next lookup re-resolves against the cache
    pub async fn clear_snapshot(&self) {
        let mut inner = self.inner.write().await;
        inner.snapshot.clear();
        inner.snapshot_at = None;
    }

    /// Classify an OS-level time change notification
    ///
    /// `tz` is the device timezone as observed now, `expected_now` the time
    /// the process expected (projected from a monotonic anchor) and
    /// `reported_now` the wall clock after the change.
    ///
    /// - A changed timezone id or UTC offset is a `TimezoneChanged`: day
    ///   bucketing is timezone-relative, so every cached window must go.
    ///   The caller is responsible for invalidating the program cache.
    /// - `TimeSet`/`Date` with a delta above the skew tolerance is a
    ///   `ClockChanged`: absolute UTC windows stay valid, only the
    ///   memoized "current program" answers are dropped here.
    /// - Anything else, including NTP-scale drift under the tolerance, is
    ///   `None`.
    pub async fn on_system_time_signal(
        &self,
        trigger: TimeChangeTrigger,
        tz: TimezoneSnapshot,
        expected_now: DateTime<Utc>,
        reported_now: DateTime<Utc>,
    ) -> TimeChangeResult {
        let mut inner = self.inner.write().await;

        match inner.timezone.take() {
            Some(previous) => {
                if previous != tz {
                    info!(
                        "Device timezone changed from {} (UTC{}) to {} (UTC{})",
                        previous.id,
                        previous.format_offset(),
                        tz.id,
                        tz.format_offset()
                    );
                    inner.timezone = Some(tz);
                    inner.snapshot.clear();
                    inner.snapshot_at = None;
                    return TimeChangeResult::TimezoneChanged;
                }
                inner.timezone = Some(previous);
            }
            None => {
                // First observation is a baseline, not a change
                inner.timezone = Some(tz);
            }
        }

        match trigger {
            TimeChangeTrigger::Timezone => {
                debug!("Timezone broadcast with unchanged timezone snapshot; ignoring");
                TimeChangeResult::None
            }
            TimeChangeTrigger::TimeSet | TimeChangeTrigger::Date => {
                let delta = reported_now - expected_now;
                let skew = if delta < Duration::zero() { -delta } else { delta };
                if skew > self.clock_skew_tolerance {
                    info!(
                        "System clock adjusted by {}s, clearing current-program snapshot",
                        delta.num_seconds()
                    );
                    inner.snapshot.clear();
                    inner.snapshot_at = None;
                    TimeChangeResult::ClockChanged
                } else {
                    debug!(
                        "Clock delta {}ms within skew tolerance; treating as drift correction",
                        delta.num_milliseconds()
                    );
                    TimeChangeResult::None
                }
            }
            TimeChangeTrigger::Unknown => TimeChangeResult::None,
        }
    }
}
