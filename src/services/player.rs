//! Player service facade
//!
//! Wires the program cache, pager, resolver and playback controller into
//! the single entry point the UI layer consumes. Every method that depends
//! on wall-clock time takes `now` explicitly; the service never reads a
//! global clock, which keeps time-dependent behavior deterministic under
//! test and honest across clock changes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::config::Config;
use crate::epg::{CurrentProgramResolver, ProgramWindowCache, TimeWindowPager};
use crate::errors::{AppResult, PlaybackError};
use crate::models::{
    Channel, FetchOutcome, PlaybackState, Program, TimeChangeResult, TimeChangeTrigger,
};
use crate::persistence::PreferencesStore;
use crate::playback::{EngineEvent, MediaEngine, PlaybackController, SessionId};
use crate::sources::EpgGateway;
use crate::utils::TimezoneSnapshot;

pub struct PlayerService {
    cache: Arc<ProgramWindowCache>,
    resolver: Arc<CurrentProgramResolver>,
    pager: Arc<TimeWindowPager>,
    controller: Arc<PlaybackController>,
    gateway: Arc<dyn EpgGateway>,
    prefs: Arc<dyn PreferencesStore>,
    timezone: RwLock<Tz>,
}

impl PlayerService {
    /// `now` anchors the timezone baseline captured at construction, so a
    /// zone change is detected from the very first time signal onwards
    pub fn new(
        config: &Config,
        gateway: Arc<dyn EpgGateway>,
        engine: Arc<dyn MediaEngine>,
        prefs: Arc<dyn PreferencesStore>,
        timezone: Tz,
        now: DateTime<Utc>,
    ) -> Self {
        let cache = ProgramWindowCache::new(config.epg.coverage_tolerance_ms);
        let resolver = CurrentProgramResolver::new(
            cache.clone(),
            config.epg.clock_skew_tolerance_secs,
            Some(TimezoneSnapshot::capture(timezone, now)),
        );
        let pager = TimeWindowPager::new(cache.clone(), gateway.clone(), config.epg.clone());
        let controller = PlaybackController::new(
            cache.clone(),
            resolver.clone(),
            &config.playback,
            engine,
            prefs.clone(),
        );
        Self {
            cache,
            resolver,
            pager,
            controller,
            gateway,
            prefs,
            timezone: RwLock::new(timezone),
        }
    }

    /// Observable playback state
    pub fn state(&self) -> watch::Receiver<PlaybackState> {
        self.controller.state()
    }

    pub fn current_state(&self) -> PlaybackState {
        self.controller.current_state()
    }

    /// Load or reload the playlist
    ///
    /// `force_refresh` drops every cached program window; used when the
    /// playlist source itself changed and old EPG joins may be wrong.
    pub async fn set_channels(&self, channels: Vec<Channel>, force_refresh: bool) {
        if force_refresh {
            info!("Playlist reload with forced EPG refresh ({} channels)", channels.len());
            self.cache.invalidate_all().await;
            self.resolver.clear_snapshot().await;
        }
        self.controller.set_channels(channels).await;
    }

    pub async fn play_channel(&self, index: usize) -> Result<SessionId, PlaybackError> {
        self.controller.play_channel(index).await
    }

    /// Resume the channel persisted by the previous run
    pub async fn resume_last_played(&self) -> AppResult<SessionId> {
        let saved = self.prefs.load_last_played_index().await?;
        let count = self.controller.channel_count().await;
        let index = usize::try_from(saved)
            .ok()
            .filter(|i| *i < count)
            .unwrap_or(0);
        Ok(self.controller.play_channel(index).await?)
    }

    pub async fn play_archive(
        &self,
        channel: &Channel,
        program: &Program,
        now: DateTime<Utc>,
    ) -> AppResult<SessionId> {
        self.controller.play_archive(channel, program, now).await
    }

    pub async fn watch_from_beginning(&self, now: DateTime<Utc>) -> AppResult<SessionId> {
        self.controller.watch_from_beginning(now).await
    }

    pub async fn return_to_live(&self) -> Result<SessionId, PlaybackError> {
        self.controller.return_to_live().await
    }

    pub async fn continue_from_prompt(&self, now: DateTime<Utc>) -> AppResult<SessionId> {
        self.controller.continue_from_prompt(now).await
    }

    pub async fn dismiss_prompt(&self) -> Result<SessionId, PlaybackError> {
        self.controller.dismiss_prompt().await
    }

    pub async fn seek_back(&self) {
        self.controller.seek_back().await;
    }

    pub async fn seek_forward(&self) {
        self.controller.seek_forward().await;
    }

    pub async fn pause_playback(&self) {
        self.controller.pause_playback().await;
    }

    pub async fn resume_playback(&self) {
        self.controller.resume_playback().await;
    }

    pub async fn stop(&self) {
        self.controller.stop().await;
    }

    /// Forward an engine notification to the controller
    pub async fn handle_engine_event(&self, session: SessionId, event: EngineEvent) {
        self.controller.handle_engine_event(session, event).await;
    }

    /// Fetch a specific EPG range if not already cached (date-picker jump)
    pub async fn request_epg_window(
        &self,
        channel_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> FetchOutcome {
        self.pager.ensure_range(channel_id, from, to).await
    }

    pub async fn load_more_past(&self, channel_id: &str, now: DateTime<Utc>) -> FetchOutcome {
        let tz = *self.timezone.read().await;
        self.pager.request_past(channel_id, now, tz).await
    }

    pub async fn load_more_future(&self, channel_id: &str, now: DateTime<Utc>) -> FetchOutcome {
        let tz = *self.timezone.read().await;
        self.pager.request_future(channel_id, now, tz).await
    }

    /// Cached programs for a channel, sorted by start time
    pub async fn programs(&self, channel_id: &str) -> Vec<Program> {
        self.cache.programs(channel_id).await
    }

    /// The loaded `[from, to]` envelope for a channel, if any
    pub async fn window(&self, channel_id: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.cache.window(channel_id).await
    }

    pub async fn current_program(&self, channel_id: &str, now: DateTime<Utc>) -> Option<Program> {
        self.resolver.current_program(channel_id, now).await
    }

    /// The memoized per-channel "now playing" map
    pub async fn current_programs(&self) -> HashMap<String, Option<Program>> {
        self.resolver.current_programs_snapshot().await
    }

    /// Classify an OS time-change notification and react to it
    ///
    /// Timezone changes drop every cached window since day bucketing is
    /// timezone-relative; clock changes only force "what's current" to be
    /// re-resolved, the absolute UTC windows stay valid.
    pub async fn on_system_time_signal(
        &self,
        trigger: TimeChangeTrigger,
        timezone: Tz,
        expected_now: DateTime<Utc>,
        reported_now: DateTime<Utc>,
    ) -> TimeChangeResult {
        let snapshot = TimezoneSnapshot::capture(timezone, reported_now);
        let result = self
            .resolver
            .on_system_time_signal(trigger, snapshot, expected_now, reported_now)
            .await;
        if result == TimeChangeResult::TimezoneChanged {
            *self.timezone.write().await = timezone;
            self.cache.invalidate_all().await;
        }
        result
    }

    /// Probe the EPG source
    pub async fn gateway_healthy(&self) -> bool {
        self.gateway.current_healthy().await
    }
}
