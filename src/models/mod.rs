//! Domain models for channels, programs and playback state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds in one day, used by the archive retention arithmetic
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// Last chosen video aspect ratio for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Fit,
    Fill,
    Zoom,
}

/// A playlist channel
///
/// Identity is the stream `url`. The channel set is immutable per playlist
/// load and replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub logo: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// EPG join key; empty means the channel has no EPG
    #[serde(default)]
    pub tvg_id: String,
    /// Catch-up retention window length in days (0 = no catch-up)
    #[serde(default)]
    pub catchup_days: u32,
    /// Catch-up URL template; empty means the provider default path format
    #[serde(default)]
    pub catchup_source: String,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    /// Position within the playlist
    #[serde(default)]
    pub position: usize,
}

fn default_group() -> String {
    "General".to_string()
}

impl Channel {
    pub fn has_epg(&self) -> bool {
        !self.tvg_id.is_empty()
    }

    pub fn supports_catchup(&self) -> bool {
        self.has_epg() && self.catchup_days > 0
    }
}

/// A single EPG program entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Provider-issued id; may be empty, in which case the composite key
    /// from [`Program::identity_key`] is used for deduplication
    #[serde(default)]
    pub id: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Program {
    /// A program is current at `now` iff `start <= now <= stop`
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.stop
    }

    pub fn is_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.stop
    }

    pub fn start_utc_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn stop_utc_millis(&self) -> i64 {
        self.stop.timestamp_millis()
    }

    pub fn duration(&self) -> Duration {
        self.stop - self.start
    }

    /// Identity used for merge deduplication: the provider id when present,
    /// otherwise a composite of times, title and position in the fetch.
    /// Two near-duplicates with differing composite keys stay distinct;
    /// completeness is preferred over perfect deduplication.
    pub fn identity_key(&self, position: usize) -> String {
        if self.id.is_empty() {
            format!(
                "{}:{}:{}:{}",
                self.start.timestamp_millis(),
                self.stop.timestamp_millis(),
                self.title,
                position
            )
        } else {
            self.id.clone()
        }
    }
}

/// The contiguous UTC range of fully fetched programs for one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramWindow {
    /// Sorted ascending by start, no duplicate identities
    pub programs: Vec<Program>,
    /// `None` means nothing loaded yet
    pub loaded_from: Option<DateTime<Utc>>,
    pub loaded_to: Option<DateTime<Utc>>,
}

impl ProgramWindow {
    pub fn is_loaded(&self) -> bool {
        self.loaded_from.is_some() && self.loaded_to.is_some()
    }

    /// Whether `[from, to]` lies inside the loaded envelope, with
    /// `tolerance_ms` slack at both edges
    pub fn covers(&self, from: DateTime<Utc>, to: DateTime<Utc>, tolerance_ms: i64) -> bool {
        match (self.loaded_from, self.loaded_to) {
            (Some(loaded_from), Some(loaded_to)) => {
                let slack = Duration::milliseconds(tolerance_ms);
                loaded_from - slack <= from && to <= loaded_to + slack
            }
            _ => false,
        }
    }
}

/// Prompt shown after an archived program finishes playing
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivePrompt {
    pub channel: Channel,
    pub completed: Program,
    /// Earliest program starting at/after the completed one; absent when the
    /// cache holds nothing past it
    pub next: Option<Program>,
}

/// Validated archive playback request, ready for the media engine
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivePlayback {
    pub channel: Channel,
    pub program: Program,
    pub url: String,
    pub duration_minutes: i64,
    pub age_minutes: i64,
    /// Template used to build the URL, for diagnostics
    pub template_used: String,
}

/// Playback session state
///
/// Exactly one state is active at a time; all mutation funnels through the
/// playback controller.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Live {
        channel: Channel,
        index: usize,
    },
    /// Paused/seeked within the live stream; not yet archive playback
    Timeshift {
        channel: Channel,
        index: usize,
    },
    Archive {
        channel: Channel,
        program: Program,
    },
    /// An archive session completed; waiting for continue/dismiss
    ArchivePrompt { prompt: ArchivePrompt },
    Error {
        message: String,
        channel: Option<Channel>,
    },
    Ended,
}

impl PlaybackState {
    pub fn is_archive(&self) -> bool {
        matches!(self, PlaybackState::Archive { .. })
    }

    pub fn is_timeshift(&self) -> bool {
        matches!(self, PlaybackState::Timeshift { .. })
    }
}

/// OS-level time change notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChangeTrigger {
    Timezone,
    TimeSet,
    Date,
    Unknown,
}

/// Classification of a time change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeChangeResult {
    /// Routine drift or a no-op broadcast; nothing to do
    None,
    /// Wall clock moved; "what's current" must be re-resolved, cached
    /// absolute UTC windows stay valid
    ClockChanged,
    /// Timezone or UTC offset moved; day bucketing is no longer trustworthy
    /// and every cached window must be dropped
    TimezoneChanged,
}

/// Tri-state result of an EPG fetch as seen by pager callers
///
/// Zero programs for a valid range is not an error; it is recorded as
/// "loaded, empty".
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Vec<Program>),
    Empty,
    Failed,
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, FetchOutcome::Failed)
    }
}
