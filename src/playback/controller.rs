//! Playback state controller
//!
//! Exclusive owner of [`PlaybackState`]. All transitions, whether user
//! initiated or reported by the media engine, funnel through one lock and
//! are published atomically through a `watch` channel, so observers never
//! see a half-applied transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::archive::ArchiveValidator;
use crate::config::PlaybackConfig;
use crate::epg::{CurrentProgramResolver, ProgramWindowCache};
use crate::errors::{AppResult, PlaybackError};
use crate::models::{ArchivePlayback, ArchivePrompt, Channel, PlaybackState, Program};
use crate::persistence::PreferencesStore;
use crate::playback::{EngineErrorKind, EngineEvent, MediaEngine, SessionId};

pub struct PlaybackController {
    cache: Arc<ProgramWindowCache>,
    resolver: Arc<CurrentProgramResolver>,
    archive: ArchiveValidator,
    engine: Arc<dyn MediaEngine>,
    prefs: Arc<dyn PreferencesStore>,
    seek_increment_ms: i64,
    state_tx: watch::Sender<PlaybackState>,
    inner: Mutex<ControllerInner>,
}

struct ControllerInner {
    channels: Vec<Channel>,
    /// Index to return to after an archive session
    last_live_index: usize,
    session: SessionId,
}

impl PlaybackController {
    pub fn new(
        cache: Arc<ProgramWindowCache>,
        resolver: Arc<CurrentProgramResolver>,
        config: &PlaybackConfig,
        engine: Arc<dyn MediaEngine>,
        prefs: Arc<dyn PreferencesStore>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        Arc::new(Self {
            cache,
            resolver,
            archive: ArchiveValidator::new(config.min_archive_duration_secs),
            engine,
            prefs,
            seek_increment_ms: config.seek_increment_ms,
            state_tx,
            inner: Mutex::new(ControllerInner {
                channels: Vec::new(),
                last_live_index: 0,
                session: 0,
            }),
        })
    }

    /// Subscribe to state transitions
    pub fn state(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> PlaybackState {
        self.state_tx.borrow().clone()
    }

    /// Replace the channel list (playlist load/reload)
    ///
    /// Keeps the remembered live index when it still points inside the new
    /// list, otherwise resets it to the first channel.
    pub async fn set_channels(&self, channels: Vec<Channel>) {
        let mut inner = self.inner.lock().await;
        if inner.last_live_index >= channels.len() {
            inner.last_live_index = 0;
        }
        inner.channels = channels;
    }

    pub async fn channel(&self, index: usize) -> Option<Channel> {
        self.inner.lock().await.channels.get(index).cloned()
    }

    pub async fn channel_count(&self) -> usize {
        self.inner.lock().await.channels.len()
    }

    /// The session id new engine events must carry to be accepted
    pub async fn session(&self) -> SessionId {
        self.inner.lock().await.session
    }

    /// Tune to a live channel; ends any archive session and clears the
    /// prompt and timeshift flags with it
    pub async fn play_channel(&self, index: usize) -> Result<SessionId, PlaybackError> {
        let mut inner = self.inner.lock().await;
        self.play_channel_locked(&mut inner, index).await
    }

    /// Return to the last live channel, typically after an archive session
    pub async fn return_to_live(&self) -> Result<SessionId, PlaybackError> {
        let mut inner = self.inner.lock().await;
        let index = inner.last_live_index;
        self.play_channel_locked(&mut inner, index).await
    }

    /// Validated archive playback of a finished program
    pub async fn play_archive(
        &self,
        channel: &Channel,
        program: &Program,
        now: DateTime<Utc>,
    ) -> AppResult<SessionId> {
        let playback = self.archive.validate(channel, program, now)?;
        let mut inner = self.inner.lock().await;
        self.start_archive_locked(&mut inner, playback).await
    }

    /// Restart the currently airing program from its beginning
    pub async fn watch_from_beginning(&self, now: DateTime<Utc>) -> AppResult<SessionId> {
        let mut inner = self.inner.lock().await;
        let channel = self
            .playing_channel()
            .ok_or(PlaybackError::NotPlaying)?;
        let program = self
            .resolver
            .current_program(&channel.tvg_id, now)
            .await
            .ok_or_else(|| PlaybackError::NoCurrentProgram {
                channel: channel.title.clone(),
            })?;
        let playback = self.archive.validate_restart(&channel, &program, now)?;
        self.start_archive_locked(&mut inner, playback).await
    }

    /// Re-issue the active archive session from the program start
    pub async fn restart_archive(&self, now: DateTime<Utc>) -> AppResult<SessionId> {
        let mut inner = self.inner.lock().await;
        let (channel, program) = match self.state_tx.borrow().clone() {
            PlaybackState::Archive { channel, program } => (channel, program),
            _ => return Err(PlaybackError::NotPlaying.into()),
        };
        let playback = self.archive.validate_restart(&channel, &program, now)?;
        self.start_archive_locked(&mut inner, playback).await
    }

    /// Accept the "watch next" prompt after an archive session ended
    ///
    /// Plays the prompted next program, or returns to the last live channel
    /// when the schedule had nothing after the completed one. The next
    /// program is often still airing (the viewer catching up to the live
    /// edge), so the relaxed restart validation applies; the archive URL
    /// becomes a growing EVENT playlist in that case.
    pub async fn continue_from_prompt(&self, now: DateTime<Utc>) -> AppResult<SessionId> {
        let mut inner = self.inner.lock().await;
        let prompt = match self.state_tx.borrow().clone() {
            PlaybackState::ArchivePrompt { prompt } => prompt,
            _ => return Err(PlaybackError::NotPlaying.into()),
        };
        match prompt.next {
            Some(next) => {
                let playback = self.archive.validate_restart(&prompt.channel, &next, now)?;
                self.start_archive_locked(&mut inner, playback).await
            }
            None => {
                let index = inner.last_live_index;
                Ok(self.play_channel_locked(&mut inner, index).await?)
            }
        }
    }

    /// Dismiss the prompt and return to the last live channel
    pub async fn dismiss_prompt(&self) -> Result<SessionId, PlaybackError> {
        self.return_to_live().await
    }

    /// Seek backwards within the current stream; entering timeshift when
    /// the session was live
    pub async fn seek_back(&self) {
        self.seek(-self.seek_increment_ms).await;
    }

    pub async fn seek_forward(&self) {
        self.seek(self.seek_increment_ms).await;
    }

    async fn seek(&self, delta_ms: i64) {
        let _inner = self.inner.lock().await;
        if !self.engine.seek_by(delta_ms).await {
            debug!("Seek by {}ms refused by the engine", delta_ms);
            return;
        }
        self.mark_timeshift();
    }

    /// Pause; a paused live stream is timeshift, not live
    pub async fn pause_playback(&self) {
        let _inner = self.inner.lock().await;
        self.engine.pause().await;
        self.mark_timeshift();
    }

    /// Resume after a pause; the session stays in timeshift until the user
    /// explicitly returns to live
    pub async fn resume_playback(&self) {
        let _inner = self.inner.lock().await;
        self.engine.resume().await;
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.session += 1;
        self.engine.stop().await;
        self.state_tx.send_replace(PlaybackState::Idle);
    }

    /// Apply an engine notification
    ///
    /// Events carrying a session older than the current one are dropped:
    /// an `Ended` from an abandoned archive session must not resurrect it
    /// after the user has tuned elsewhere.
    pub async fn handle_engine_event(&self, session: SessionId, event: EngineEvent) {
        let mut inner = self.inner.lock().await;
        if session != inner.session {
            debug!(
                "Dropping engine event from stale session {} (current {}): {:?}",
                session, inner.session, event
            );
            return;
        }

        match event {
            EngineEvent::Ready { index } => {
                // Archive sessions set their state when playback starts;
                // a Ready for them must not demote the state to Live
                let state = self.state_tx.borrow().clone();
                if state.is_archive() || matches!(state, PlaybackState::ArchivePrompt { .. }) {
                    return;
                }
                if let Some(channel) = inner.channels.get(index).cloned() {
                    inner.last_live_index = index;
                    self.state_tx
                        .send_replace(PlaybackState::Live { channel, index });
                }
            }
            EngineEvent::Buffering => {
                let state = self.state_tx.borrow().clone();
                if !state.is_archive() && !matches!(state, PlaybackState::ArchivePrompt { .. }) {
                    self.state_tx.send_replace(PlaybackState::Buffering);
                }
            }
            EngineEvent::Ended => {
                // Clone out of the watch before transitioning; a borrow held
                // across send_replace deadlocks
                let state = self.state_tx.borrow().clone();
                if let PlaybackState::Archive { channel, program } = state {
                    let next = self
                        .cache
                        .next_program_after(&channel.tvg_id, program.stop)
                        .await;
                    info!(
                        "Archive playback of {} finished, next up: {}",
                        program.title,
                        next.as_ref().map(|p| p.title.as_str()).unwrap_or("(none)")
                    );
                    self.state_tx.send_replace(PlaybackState::ArchivePrompt {
                        prompt: ArchivePrompt {
                            channel,
                            completed: program,
                            next,
                        },
                    });
                } else {
                    self.state_tx.send_replace(PlaybackState::Ended);
                }
            }
            EngineEvent::Error {
                kind: EngineErrorKind::BehindLiveWindow,
                ..
            } => {
                // The live window slid past our position; recover in place
                // without surfacing an error
                debug!("Behind live window, reseeking to the live edge");
                self.engine.seek_to_live_edge().await;
                self.engine.resume().await;
            }
            EngineEvent::Error {
                kind: EngineErrorKind::Fatal,
                message,
            } => {
                let channel = match self.state_tx.borrow().clone() {
                    PlaybackState::Live { channel, .. }
                    | PlaybackState::Timeshift { channel, .. }
                    | PlaybackState::Archive { channel, .. } => Some(channel),
                    _ => None,
                };
                warn!("Media engine fatal error: {}", message);
                self.state_tx
                    .send_replace(PlaybackState::Error { message, channel });
            }
        }
    }

    async fn play_channel_locked(
        &self,
        inner: &mut ControllerInner,
        index: usize,
    ) -> Result<SessionId, PlaybackError> {
        let channel = inner
            .channels
            .get(index)
            .cloned()
            .ok_or(PlaybackError::NoSuchChannel { index })?;

        inner.session += 1;
        let session = inner.session;
        info!("Playing channel {}: {}", index, channel.title);
        self.engine.play_uri(&channel.url).await?;

        inner.last_live_index = index;
        if let Err(e) = self.prefs.save_last_played_index(index as i64).await {
            warn!("Failed to persist last played index: {}", e);
        }
        self.state_tx
            .send_replace(PlaybackState::Live { channel, index });
        Ok(session)
    }

    async fn start_archive_locked(
        &self,
        inner: &mut ControllerInner,
        playback: ArchivePlayback,
    ) -> AppResult<SessionId> {
        inner.session += 1;
        let session = inner.session;
        info!(
            "Starting archive playback on {}: {} ({}m long, {}m ago, template: {})",
            playback.channel.title,
            playback.program.title,
            playback.duration_minutes,
            playback.age_minutes,
            playback.template_used
        );
        self.engine.play_uri(&playback.url).await?;
        self.state_tx.send_replace(PlaybackState::Archive {
            channel: playback.channel,
            program: playback.program,
        });
        Ok(session)
    }

    fn playing_channel(&self) -> Option<Channel> {
        match self.state_tx.borrow().clone() {
            PlaybackState::Live { channel, .. }
            | PlaybackState::Timeshift { channel, .. }
            | PlaybackState::Archive { channel, .. } => Some(channel),
            _ => None,
        }
    }

    fn mark_timeshift(&self) {
        let state = self.state_tx.borrow().clone();
        if let PlaybackState::Live { channel, index } = state {
            self.state_tx
                .send_replace(PlaybackState::Timeshift { channel, index });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPreferencesStore;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    /// Records every engine call; playback always "succeeds"
    #[derive(Default)]
    struct RecordingEngine {
        played: AsyncMutex<Vec<String>>,
        seek_refused: AtomicBool,
        live_edge_seeks: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MediaEngine for RecordingEngine {
        async fn play_uri(&self, uri: &str) -> Result<(), PlaybackError> {
            self.played.lock().await.push(uri.to_string());
            Ok(())
        }

        async fn seek_by(&self, _delta_ms: i64) -> bool {
            !self.seek_refused.load(Ordering::SeqCst)
        }

        async fn pause(&self) {}
        async fn resume(&self) {}
        async fn stop(&self) {}

        async fn seek_to_live_edge(&self) {
            self.live_edge_seeks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn channel(title: &str, tvg_id: &str) -> Channel {
        Channel {
            url: format!("http://example.com/{tvg_id}/index.m3u8"),
            title: title.to_string(),
            logo: String::new(),
            group: String::new(),
            tvg_id: tvg_id.to_string(),
            catchup_days: 7,
            catchup_source: String::new(),
            is_favorite: false,
            aspect_ratio: Default::default(),
            position: 0,
        }
    }

    fn program(id: &str, start: DateTime<Utc>, minutes: i64) -> Program {
        Program {
            id: id.to_string(),
            start,
            stop: start + Duration::minutes(minutes),
            title: format!("Program {id}"),
            description: String::new(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap()
    }

    struct Fixture {
        cache: Arc<ProgramWindowCache>,
        engine: Arc<RecordingEngine>,
        controller: Arc<PlaybackController>,
    }

    async fn fixture(channels: Vec<Channel>) -> Fixture {
        let cache = ProgramWindowCache::new(60_000);
        let resolver = CurrentProgramResolver::new(cache.clone(), 5, None);
        let engine = Arc::new(RecordingEngine::default());
        let controller = PlaybackController::new(
            cache.clone(),
            resolver,
            &PlaybackConfig::default(),
            engine.clone(),
            Arc::new(MemoryPreferencesStore::new()),
        );
        controller.set_channels(channels).await;
        Fixture {
            cache,
            engine,
            controller,
        }
    }

    #[tokio::test]
    async fn play_channel_enters_live_and_remembers_the_index() {
        let f = fixture(vec![channel("One", "one"), channel("Two", "two")]).await;

        f.controller.play_channel(1).await.unwrap();
        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::Live { index: 1, .. }
        ));

        let err = f.controller.play_channel(9).await.unwrap_err();
        assert!(matches!(err, PlaybackError::NoSuchChannel { index: 9 }));
    }

    #[tokio::test]
    async fn pausing_live_enters_timeshift_and_return_to_live_leaves_it() {
        let f = fixture(vec![channel("One", "one")]).await;
        f.controller.play_channel(0).await.unwrap();

        f.controller.pause_playback().await;
        assert!(f.controller.current_state().is_timeshift());

        f.controller.return_to_live().await.unwrap();
        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::Live { index: 0, .. }
        ));
    }

    #[tokio::test]
    async fn refused_seek_does_not_enter_timeshift() {
        let f = fixture(vec![channel("One", "one")]).await;
        f.controller.play_channel(0).await.unwrap();

        f.engine.seek_refused.store(true, Ordering::SeqCst);
        f.controller.seek_back().await;
        assert!(!f.controller.current_state().is_timeshift());
    }

    #[tokio::test]
    async fn archive_end_prompts_with_the_next_cached_program() {
        let ch = channel("One", "one.example");
        let f = fixture(vec![ch.clone()]).await;

        let completed = program("x", now() - Duration::hours(3), 60);
        let next = program("y", completed.stop + Duration::seconds(1), 60);
        f.cache
            .merge("one.example", vec![completed.clone(), next.clone()])
            .await;

        let session = f
            .controller
            .play_archive(&ch, &completed, now())
            .await
            .unwrap();
        assert!(f.controller.current_state().is_archive());

        f.controller
            .handle_engine_event(session, EngineEvent::Ended)
            .await;
        match f.controller.current_state() {
            PlaybackState::ArchivePrompt { prompt } => {
                assert_eq!(prompt.completed.id, "x");
                assert_eq!(prompt.next.as_ref().map(|p| p.id.as_str()), Some("y"));
            }
            other => panic!("expected prompt, got {other:?}"),
        }

        f.controller.continue_from_prompt(now()).await.unwrap();
        match f.controller.current_state() {
            PlaybackState::Archive { program, .. } => assert_eq!(program.id, "y"),
            other => panic!("expected archive of next, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn live_stream_end_reaches_ended_state() {
        let f = fixture(vec![channel("One", "one")]).await;
        let session = f.controller.play_channel(0).await.unwrap();

        f.controller
            .handle_engine_event(session, EngineEvent::Ended)
            .await;
        assert_eq!(f.controller.current_state(), PlaybackState::Ended);
    }

    #[tokio::test]
    async fn continuing_the_prompt_plays_a_still_airing_next_program() {
        let ch = channel("One", "one.example");
        let f = fixture(vec![ch.clone()]).await;

        // The completed program's successor has not finished airing yet
        let completed = program("x", now() - Duration::minutes(90), 60);
        let ongoing = program("y", completed.stop + Duration::minutes(1), 60);
        f.cache
            .merge("one.example", vec![completed.clone(), ongoing.clone()])
            .await;

        let session = f
            .controller
            .play_archive(&ch, &completed, now())
            .await
            .unwrap();
        f.controller
            .handle_engine_event(session, EngineEvent::Ended)
            .await;

        f.controller.continue_from_prompt(now()).await.unwrap();
        match f.controller.current_state() {
            PlaybackState::Archive { program, .. } => assert_eq!(program.id, "y"),
            other => panic!("expected archive of the ongoing next, got {other:?}"),
        }
        // Ongoing catch-up plays as a growing EVENT playlist
        let played = f.engine.played.lock().await;
        assert!(played.last().unwrap().contains("event=true"));
    }

    #[tokio::test]
    async fn prompt_without_next_continues_back_to_live() {
        let ch = channel("One", "one.example");
        let f = fixture(vec![ch.clone()]).await;

        let completed = program("x", now() - Duration::hours(3), 60);
        f.cache.merge("one.example", vec![completed.clone()]).await;

        f.controller.play_channel(0).await.unwrap();
        let session = f
            .controller
            .play_archive(&ch, &completed, now())
            .await
            .unwrap();
        f.controller
            .handle_engine_event(session, EngineEvent::Ended)
            .await;
        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::ArchivePrompt { ref prompt } if prompt.next.is_none()
        ));

        f.controller.continue_from_prompt(now()).await.unwrap();
        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::Live { index: 0, .. }
        ));
    }

    #[tokio::test]
    async fn stale_session_events_are_dropped() {
        let ch = channel("One", "one.example");
        let f = fixture(vec![ch.clone()]).await;

        let completed = program("x", now() - Duration::hours(3), 60);
        f.cache.merge("one.example", vec![completed.clone()]).await;

        let archive_session = f
            .controller
            .play_archive(&ch, &completed, now())
            .await
            .unwrap();
        f.controller.play_channel(0).await.unwrap();

        // The abandoned archive session ends late; it must not resurrect
        f.controller
            .handle_engine_event(archive_session, EngineEvent::Ended)
            .await;
        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::Live { .. }
        ));
    }

    #[tokio::test]
    async fn behind_live_window_recovers_silently() {
        let f = fixture(vec![channel("One", "one")]).await;
        let session = f.controller.play_channel(0).await.unwrap();

        f.controller
            .handle_engine_event(
                session,
                EngineEvent::Error {
                    kind: EngineErrorKind::BehindLiveWindow,
                    message: "behind live window".to_string(),
                },
            )
            .await;

        assert!(matches!(
            f.controller.current_state(),
            PlaybackState::Live { .. }
        ));
        assert_eq!(f.engine.live_edge_seeks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_engine_error_surfaces_with_channel_context() {
        let f = fixture(vec![channel("One", "one")]).await;
        let session = f.controller.play_channel(0).await.unwrap();

        f.controller
            .handle_engine_event(
                session,
                EngineEvent::Error {
                    kind: EngineErrorKind::Fatal,
                    message: "decoder died".to_string(),
                },
            )
            .await;

        match f.controller.current_state() {
            PlaybackState::Error { message, channel } => {
                assert_eq!(message, "decoder died");
                assert_eq!(channel.map(|c| c.title), Some("One".to_string()));
            }
            other => panic!("expected error state, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ineligible_archive_request_never_reaches_the_engine() {
        let mut ch = channel("One", "one.example");
        ch.catchup_days = 0;
        let f = fixture(vec![ch.clone()]).await;

        let completed = program("x", now() - Duration::hours(3), 60);
        assert!(f.controller.play_archive(&ch, &completed, now()).await.is_err());
        assert!(f.engine.played.lock().await.is_empty());
    }

    #[tokio::test]
    async fn watch_from_beginning_restarts_the_current_program() {
        let ch = channel("One", "one.example");
        let f = fixture(vec![ch.clone()]).await;

        let airing = program("x", now() - Duration::minutes(20), 60);
        f.cache.merge("one.example", vec![airing.clone()]).await;

        f.controller.play_channel(0).await.unwrap();
        f.controller.watch_from_beginning(now()).await.unwrap();

        match f.controller.current_state() {
            PlaybackState::Archive { program, .. } => assert_eq!(program.id, "x"),
            other => panic!("expected archive restart, got {other:?}"),
        }
        let played = f.engine.played.lock().await;
        let start_secs = airing.start_utc_millis() / 1000;
        assert!(played[1].contains(&format!("archive-{start_secs}-")));
    }
}
