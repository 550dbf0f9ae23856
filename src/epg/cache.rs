//! Per-channel program window cache
//!
//! The cache is the single owner of fetched program listings. Each channel
//! holds a sorted, identity-deduplicated program list together with the
//! contiguous UTC envelope that is known to be fully fetched. All callers
//! receive the cache as an injected `Arc`; nothing here is process-global.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{Program, ProgramWindow};

/// Maximum number of channels retained; least-recently-touched evicted first
const CHANNEL_CACHE_CAPACITY: usize = 64;

struct Entry {
    window: ProgramWindow,
    touched: u64,
}

struct CacheInner {
    channels: HashMap<String, Entry>,
    /// Monotonic touch counter backing the LRU eviction order
    clock: u64,
    /// Bumped on every invalidation; lets in-flight fetches detect that the
    /// window they were issued for no longer exists
    generation: u64,
}

pub struct ProgramWindowCache {
    inner: RwLock<CacheInner>,
    capacity: usize,
    coverage_tolerance_ms: i64,
}

impl ProgramWindowCache {
    pub fn new(coverage_tolerance_ms: i64) -> Arc<Self> {
        Self::with_capacity(coverage_tolerance_ms, CHANNEL_CACHE_CAPACITY)
    }

    pub fn with_capacity(coverage_tolerance_ms: i64, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(CacheInner {
                channels: HashMap::new(),
                clock: 0,
                generation: 0,
            }),
            capacity: capacity.max(1),
            coverage_tolerance_ms,
        })
    }

    /// Merge freshly fetched programs into a channel's list
    ///
    /// The result is sorted ascending by start with duplicate identities
    /// collapsed; the most-recently-fetched copy wins a key clash. The
    /// loaded envelope is not changed here; callers report the fetched
    /// range through [`expand_window`](Self::expand_window).
    pub async fn merge(&self, channel_id: &str, fetched: Vec<Program>) -> Vec<Program> {
        let mut inner = self.inner.write().await;
        inner.touch(channel_id);
        inner.evict_over(self.capacity, channel_id);

        let entry = inner.entry_mut(channel_id);
        let merged = merge_programs(&entry.window.programs, &fetched);
        entry.window.programs = merged.clone();
        debug!(
            "Merged {} fetched programs into channel {} ({} total)",
            fetched.len(),
            channel_id,
            merged.len()
        );
        merged
    }

    /// Extend a channel's loaded envelope to the union with `[from, to]`
    ///
    /// The cache keeps a single contiguous envelope. A reported range that
    /// is disjoint from the current envelope (beyond the coverage
    /// tolerance) would mask an unloaded gap; it is logged before the
    /// envelope is expanded anyway, since in-app callers only ever page
    /// contiguously.
    pub async fn expand_window(&self, channel_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) {
        if to < from {
            warn!(
                "Ignoring inverted window report for channel {}: {} > {}",
                channel_id, from, to
            );
            return;
        }

        let mut inner = self.inner.write().await;
        inner.touch(channel_id);
        inner.evict_over(self.capacity, channel_id);

        let tolerance = Duration::milliseconds(self.coverage_tolerance_ms);
        let entry = inner.entry_mut(channel_id);
        match (entry.window.loaded_from, entry.window.loaded_to) {
            (Some(loaded_from), Some(loaded_to)) => {
                if from > loaded_to + tolerance || to < loaded_from - tolerance {
                    warn!(
                        "Window report [{} .. {}] for channel {} is disjoint from loaded [{} .. {}]; envelope now spans the gap",
                        from, to, channel_id, loaded_from, loaded_to
                    );
                }
                entry.window.loaded_from = Some(loaded_from.min(from));
                entry.window.loaded_to = Some(loaded_to.max(to));
            }
            _ => {
                entry.window.loaded_from = Some(from);
                entry.window.loaded_to = Some(to);
            }
        }
    }

    /// Whether `[from, to]` is already inside the loaded envelope
    pub async fn covers(&self, channel_id: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(channel_id)
            .map(|entry| entry.window.covers(from, to, self.coverage_tolerance_ms))
            .unwrap_or(false)
    }

    pub async fn programs(&self, channel_id: &str) -> Vec<Program> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(channel_id)
            .map(|entry| entry.window.programs.clone())
            .unwrap_or_default()
    }

    /// The loaded envelope, or `None` when nothing has been fetched yet
    pub async fn window(&self, channel_id: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let inner = self.inner.read().await;
        let window = &inner.channels.get(channel_id)?.window;
        Some((window.loaded_from?, window.loaded_to?))
    }

    /// Earliest cached program starting at/after `stop`
    ///
    /// Drives the "what's next" prompt after an archived program ends.
    pub async fn next_program_after(
        &self,
        channel_id: &str,
        stop: DateTime<Utc>,
    ) -> Option<Program> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(channel_id)?
            .window
            .programs
            .iter()
            .filter(|p| p.start >= stop)
            .min_by_key(|p| p.start)
            .cloned()
    }

    pub async fn invalidate(&self, channel_id: &str) {
        let mut inner = self.inner.write().await;
        if inner.channels.remove(channel_id).is_some() {
            inner.generation += 1;
            debug!("Invalidated EPG window for channel {}", channel_id);
        }
    }

    /// Drop every channel's window (playlist force-reload, timezone change)
    pub async fn invalidate_all(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.channels.len();
        inner.channels.clear();
        inner.generation += 1;
        debug!("Invalidated all EPG windows ({} channels)", dropped);
    }

    /// Current invalidation generation; compared by in-flight fetches to
    /// detect that their target window was dropped while they were away
    pub async fn generation(&self) -> u64 {
        self.inner.read().await.generation
    }
}

impl CacheInner {
    fn touch(&mut self, channel_id: &str) {
        self.clock += 1;
        let clock = self.clock;
        if let Some(entry) = self.channels.get_mut(channel_id) {
            entry.touched = clock;
        }
    }

    fn entry_mut(&mut self, channel_id: &str) -> &mut Entry {
        let clock = self.clock;
        self.channels
            .entry(channel_id.to_string())
            .or_insert_with(|| Entry {
                window: ProgramWindow::default(),
                touched: clock,
            })
    }

    /// Evict least-recently-touched entries so that inserting `incoming`
    /// stays within `capacity`
    fn evict_over(&mut self, capacity: usize, incoming: &str) {
        while self.channels.len() >= capacity && !self.channels.contains_key(incoming) {
            let oldest = self
                .channels
                .iter()
                .min_by_key(|(_, entry)| entry.touched)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!("Evicting least-recently-used EPG window for channel {}", id);
                    self.channels.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// Merge two program lists by identity key, sorted ascending by start
///
/// Keys use the provider id when present; otherwise the composite key is
/// disambiguated by the occurrence index among same-shaped programs within
/// its own list, so overlapping fetches of the same schedule collapse while
/// genuine same-slot duplicates inside one fetch stay distinct.
fn merge_programs(existing: &[Program], fetched: &[Program]) -> Vec<Program> {
    let mut merged: HashMap<String, Program> = HashMap::new();
    for list in [existing, fetched] {
        let mut occurrences: HashMap<(i64, i64, &str), usize> = HashMap::new();
        for program in list {
            let slot = (
                program.start.timestamp_millis(),
                program.stop.timestamp_millis(),
                program.title.as_str(),
            );
            let position = occurrences.entry(slot).or_insert(0);
            let key = program.identity_key(*position);
            *position += 1;
            // Later lists overwrite: the most-recently-fetched copy wins
            merged.insert(key, program.clone());
        }
    }
    let mut result: Vec<Program> = merged.into_values().collect();
    result.sort_by_key(|p| (p.start, p.stop, p.title.clone()));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap()
    }

    fn program(id: &str, start: DateTime<Utc>, stop: DateTime<Utc>, title: &str) -> Program {
        Program {
            id: id.to_string(),
            start,
            stop,
            title: title.to_string(),
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let cache = ProgramWindowCache::new(60_000);
        let batch = vec![
            program("", at(0), at(1), "Morning"),
            program("", at(1), at(2), "Noon"),
        ];

        let once = cache.merge("ch", batch.clone()).await;
        let twice = cache.merge("ch", batch).await;
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 2);
    }

    #[tokio::test]
    async fn merge_sorts_and_prefers_latest_copy() {
        let cache = ProgramWindowCache::new(60_000);
        cache
            .merge(
                "ch",
                vec![
                    program("p2", at(2), at(3), "Late"),
                    program("p1", at(0), at(1), "Early stale"),
                ],
            )
            .await;
        let merged = cache
            .merge("ch", vec![program("p1", at(0), at(1), "Early fresh")])
            .await;

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].title, "Early fresh");
        assert_eq!(merged[1].id, "p2");
        assert!(merged.windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[tokio::test]
    async fn overlapping_fetches_collapse_blank_id_programs() {
        let cache = ProgramWindowCache::new(60_000);
        let a = program("", at(0), at(1), "A");
        let b = program("", at(1), at(2), "B");
        let c = program("", at(2), at(3), "C");

        cache.merge("ch", vec![a.clone(), b.clone()]).await;
        let merged = cache.merge("ch", vec![b, c]).await;
        assert_eq!(
            merged.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["A", "B", "C"]
        );
    }

    #[tokio::test]
    async fn same_slot_duplicates_within_one_fetch_stay_distinct() {
        let cache = ProgramWindowCache::new(60_000);
        let merged = cache
            .merge(
                "ch",
                vec![
                    program("", at(0), at(1), "Loop"),
                    program("", at(0), at(1), "Loop"),
                ],
            )
            .await;
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn window_expansion_is_monotonic() {
        let cache = ProgramWindowCache::new(60_000);
        cache.expand_window("ch", at(6), at(12)).await;
        cache.expand_window("ch", at(3), at(7)).await;
        cache.expand_window("ch", at(11), at(20)).await;

        assert_eq!(cache.window("ch").await, Some((at(3), at(20))));
        assert!(cache.covers("ch", at(4), at(19)).await);
        assert!(!cache.covers("ch", at(2), at(19)).await);
    }

    #[tokio::test]
    async fn disjoint_expansion_still_widens_the_envelope() {
        let cache = ProgramWindowCache::new(60_000);
        cache.expand_window("ch", at(0), at(1)).await;
        cache.expand_window("ch", at(10), at(12)).await;
        // Single-envelope simplification: the gap is spanned (and logged)
        assert_eq!(cache.window("ch").await, Some((at(0), at(12))));
    }

    #[tokio::test]
    async fn invalidation_resets_window_and_bumps_generation() {
        let cache = ProgramWindowCache::new(60_000);
        cache.merge("a", vec![program("x", at(0), at(1), "X")]).await;
        cache.expand_window("a", at(0), at(1)).await;
        cache.expand_window("b", at(0), at(1)).await;
        let generation = cache.generation().await;

        cache.invalidate("a").await;
        assert!(cache.programs("a").await.is_empty());
        assert_eq!(cache.window("a").await, None);
        assert!(cache.window("b").await.is_some());
        assert!(cache.generation().await > generation);

        cache.invalidate_all().await;
        assert_eq!(cache.window("b").await, None);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_touched_channel() {
        let cache = ProgramWindowCache::with_capacity(60_000, 2);
        cache.expand_window("a", at(0), at(1)).await;
        cache.expand_window("b", at(0), at(1)).await;
        // Writing to "a" again leaves "b" as the eviction candidate
        cache.expand_window("a", at(1), at(2)).await;
        cache.expand_window("c", at(0), at(1)).await;

        assert!(cache.window("a").await.is_some());
        assert_eq!(cache.window("b").await, None);
        assert!(cache.window("c").await.is_some());
    }

    #[tokio::test]
    async fn next_program_after_returns_earliest_following() {
        let cache = ProgramWindowCache::new(60_000);
        cache
            .merge(
                "ch",
                vec![
                    program("p1", at(0), at(1), "First"),
                    program("p2", at(2), at(3), "Second"),
                    program("p3", at(4), at(5), "Third"),
                ],
            )
            .await;

        let next = cache.next_program_after("ch", at(1)).await.unwrap();
        assert_eq!(next.id, "p2");
        assert_eq!(cache.next_program_after("ch", at(6)).await, None);
    }
}
