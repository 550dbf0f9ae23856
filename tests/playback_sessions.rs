//! Integration tests for full playback sessions through the player service
//!
//! Covers live tuning, timeshift, archive playback with the completion
//! prompt, and resume of the persisted channel index.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use epg_dvr::config::Config;
use epg_dvr::errors::{AppError, ArchiveRejection, GatewayError, PlaybackError};
use epg_dvr::models::{Channel, Program, PlaybackState};
use epg_dvr::persistence::{MemoryPreferencesStore, PreferencesStore};
use epg_dvr::playback::{EngineEvent, MediaEngine};
use epg_dvr::services::PlayerService;
use epg_dvr::sources::EpgGateway;

#[derive(Default)]
struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<Vec<Program>, GatewayError>>>,
}

#[async_trait]
impl EpgGateway for ScriptedGateway {
    async fn fetch_programs(
        &self,
        _tvg_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Program>, GatewayError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Engine recording every URI it was asked to play
#[derive(Default)]
struct RecordingEngine {
    played: Mutex<Vec<String>>,
}

impl RecordingEngine {
    fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaEngine for RecordingEngine {
    async fn play_uri(&self, uri: &str) -> Result<(), PlaybackError> {
        self.played.lock().unwrap().push(uri.to_string());
        Ok(())
    }
    async fn seek_by(&self, _delta_ms: i64) -> bool {
        true
    }
    async fn pause(&self) {}
    async fn resume(&self) {}
    async fn stop(&self) {}
    async fn seek_to_live_edge(&self) {}
}

fn channel(title: &str, tvg_id: &str, catchup_days: u32) -> Channel {
    Channel {
        url: format!("http://example.com/{tvg_id}/index.m3u8"),
        title: title.to_string(),
        logo: String::new(),
        group: "General".to_string(),
        tvg_id: tvg_id.to_string(),
        catchup_days,
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
    Utc.with_ymd_and_hms(2024, 6, 15, 20, 0, 0).unwrap()
}

struct Fixture {
    gateway: Arc<ScriptedGateway>,
    engine: Arc<RecordingEngine>,
    prefs: Arc<MemoryPreferencesStore>,
    svc: PlayerService,
}

async fn fixture(channels: Vec<Channel>) -> Fixture {
    let gateway = Arc::new(ScriptedGateway::default());
    let engine = Arc::new(RecordingEngine::default());
    let prefs = Arc::new(MemoryPreferencesStore::new());
    let svc = PlayerService::new(
        &Config::default(),
        gateway.clone(),
        engine.clone(),
        prefs.clone(),
        chrono_tz::UTC,
        now(),
    );
    svc.set_channels(channels, false).await;
    Fixture {
        gateway,
        engine,
        prefs,
        svc,
    }
}

/// Load the given programs into a channel's cached window
async fn seed(f: &Fixture, tvg_id: &str, programs: Vec<Program>) {
    f.gateway.responses.lock().unwrap().push_back(Ok(programs));
    f.svc
        .request_epg_window(tvg_id, now() - Duration::days(7), now() + Duration::days(1))
        .await;
}

#[tokio::test]
async fn live_tuning_persists_the_channel_index() {
    let f = fixture(vec![channel("One", "one", 0), channel("Two", "two", 0)]).await;

    f.svc.play_channel(1).await.unwrap();
    assert!(matches!(
        f.svc.current_state(),
        PlaybackState::Live { index: 1, .. }
    ));
    assert_eq!(f.prefs.load_last_played_index().await.unwrap(), 1);
    assert_eq!(f.engine.played(), vec!["http://example.com/two/index.m3u8"]);
}

#[tokio::test]
async fn resume_last_played_falls_back_to_the_first_channel() {
    let f = fixture(vec![channel("One", "one", 0), channel("Two", "two", 0)]).await;

    // A stale index from a previous, longer playlist
    f.prefs.save_last_played_index(17).await.unwrap();
    f.svc.resume_last_played().await.unwrap();
    assert!(matches!(
        f.svc.current_state(),
        PlaybackState::Live { index: 0, .. }
    ));

    f.prefs.save_last_played_index(1).await.unwrap();
    f.svc.resume_last_played().await.unwrap();
    assert!(matches!(
        f.svc.current_state(),
        PlaybackState::Live { index: 1, .. }
    ));
}

#[tokio::test]
async fn archive_completion_prompts_and_continues_to_the_next_program() {
    let ch = channel("News", "news.example", 7);
    let f = fixture(vec![ch.clone()]).await;

    let x = program("x", now() - Duration::hours(4), 60);
    let y = program("y", x.stop + Duration::seconds(1), 60);
    seed(&f, "news.example", vec![x.clone(), y.clone()]).await;

    f.svc.play_channel(0).await.unwrap();
    let session = f.svc.play_archive(&ch, &x, now()).await.unwrap();
    assert!(f.svc.current_state().is_archive());

    f.svc.handle_engine_event(session, EngineEvent::Ended).await;
    let prompt = match f.svc.current_state() {
        PlaybackState::ArchivePrompt { prompt } => prompt,
        other => panic!("expected archive prompt, got {other:?}"),
    };
    assert_eq!(prompt.completed.id, "x");
    assert_eq!(prompt.next.as_ref().map(|p| p.id.as_str()), Some("y"));

    f.svc.continue_from_prompt(now()).await.unwrap();
    match f.svc.current_state() {
        PlaybackState::Archive { program, .. } => assert_eq!(program.id, "y"),
        other => panic!("expected next archive session, got {other:?}"),
    }
}

#[tokio::test]
async fn dismissing_the_prompt_returns_to_the_last_live_channel() {
    let ch = channel("News", "news.example", 7);
    let f = fixture(vec![channel("One", "one", 0), ch.clone()]).await;

    let x = program("x", now() - Duration::hours(4), 60);
    seed(&f, "news.example", vec![x.clone()]).await;

    f.svc.play_channel(1).await.unwrap();
    let session = f.svc.play_archive(&ch, &x, now()).await.unwrap();
    f.svc.handle_engine_event(session, EngineEvent::Ended).await;

    f.svc.dismiss_prompt().await.unwrap();
    assert!(matches!(
        f.svc.current_state(),
        PlaybackState::Live { index: 1, .. }
    ));
}

#[tokio::test]
async fn archive_and_timeshift_are_mutually_exclusive() {
    let ch = channel("News", "news.example", 7);
    let f = fixture(vec![ch.clone()]).await;

    let x = program("x", now() - Duration::hours(4), 60);
    seed(&f, "news.example", vec![x.clone()]).await;

    f.svc.play_channel(0).await.unwrap();
    f.svc.pause_playback().await;
    assert!(f.svc.current_state().is_timeshift());
    assert!(!f.svc.current_state().is_archive());

    // Starting an archive session clears the timeshift flag with it
    f.svc.play_archive(&ch, &x, now()).await.unwrap();
    let state = f.svc.current_state();
    assert!(state.is_archive());
    assert!(!state.is_timeshift());

    // Pausing inside archive stays archive; it never becomes timeshift
    f.svc.pause_playback().await;
    let state = f.svc.current_state();
    assert!(state.is_archive());
    assert!(!state.is_timeshift());
}

#[tokio::test]
async fn ineligible_archive_requests_carry_a_readable_reason() {
    let ch = channel("News", "news.example", 3);
    let f = fixture(vec![ch.clone()]).await;

    let ancient = program("old", now() - Duration::days(5), 60);
    let err = f.svc.play_archive(&ch, &ancient, now()).await.unwrap_err();
    match err {
        AppError::Archive(rejection) => {
            assert!(matches!(
                rejection,
                ArchiveRejection::OutsideWindow { catchup_days: 3, .. }
            ));
            assert!(rejection.to_string().contains("3 day archive window"));
        }
        other => panic!("expected archive rejection, got {other}"),
    }
    assert!(f.engine.played().is_empty());

    // Current playback is not disturbed by the rejection
    assert_eq!(f.svc.current_state(), PlaybackState::Idle);
}
