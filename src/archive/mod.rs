//! Archive (catch-up/DVR) eligibility and URL construction
//!
//! Every archive playback request is validated here before the media
//! engine is touched: the channel must support catch-up, the program must
//! have finished airing (except for the watch-from-beginning restart path)
//! and its start must still be inside the channel's retention window.
//! Rejections carry the human-readable reason shown to the user.

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::errors::ArchiveRejection;
use crate::models::{ArchivePlayback, Channel, Program, MILLIS_PER_DAY};

/// Catch-up source template shown in diagnostics when a channel relies on
/// the provider default path format
const DEFAULT_TEMPLATE_LABEL: &str = "Flussonic path-based";

pub struct ArchiveValidator {
    /// Floor applied to archive durations; some providers reject
    /// zero-length or sub-minute archive requests
    min_duration_secs: i64,
}

impl ArchiveValidator {
    pub fn new(min_duration_secs: i64) -> Self {
        Self { min_duration_secs }
    }

    /// Validate playback of a finished program from the archive
    pub fn validate(
        &self,
        channel: &Channel,
        program: &Program,
        now: DateTime<Utc>,
    ) -> Result<ArchivePlayback, ArchiveRejection> {
        if !channel.supports_catchup() {
            return Err(ArchiveRejection::NoCatchup {
                channel: channel.title.clone(),
            });
        }
        if program.stop > now {
            let minutes_remaining = (program.stop - now).num_minutes().max(1);
            return Err(ArchiveRejection::StillAiring {
                title: program.title.clone(),
                minutes_remaining,
            });
        }
        self.validate_restart(channel, program, now)
    }

    /// Validate restarting a program from its beginning
    ///
    /// Identical to [`validate`](Self::validate) except that a program
    /// still airing is eligible: the user is rewinding a broadcast in
    /// progress, not fetching a finished one. The archive URL is built
    /// from the program start either way, so the start offset is computed
    /// from the schedule, never from "now".
    pub fn validate_restart(
        &self,
        channel: &Channel,
        program: &Program,
        now: DateTime<Utc>,
    ) -> Result<ArchivePlayback, ArchiveRejection> {
        if !channel.supports_catchup() {
            return Err(ArchiveRejection::NoCatchup {
                channel: channel.title.clone(),
            });
        }
        if !has_valid_times(program) {
            return Err(ArchiveRejection::InvalidTimes {
                title: program.title.clone(),
            });
        }

        let age_ms = now.timestamp_millis() - program.start_utc_millis();
        let retention_ms = channel.catchup_days as i64 * MILLIS_PER_DAY;
        if age_ms > retention_ms {
            return Err(ArchiveRejection::OutsideWindow {
                title: program.title.clone(),
                catchup_days: channel.catchup_days,
            });
        }

        let url = self.build_archive_url(channel, program, now).ok_or_else(|| {
            ArchiveRejection::NoUrl {
                channel: channel.title.clone(),
            }
        })?;

        let duration_minutes = (program.duration().num_minutes()).max(1);
        let age_minutes = (age_ms / 60_000).max(0);
        let template_used = if channel.catchup_source.is_empty() {
            DEFAULT_TEMPLATE_LABEL.to_string()
        } else {
            channel.catchup_source.clone()
        };

        debug!(
            "Archive playback validated: {} -> {} ({}m, {}m ago)",
            channel.title, program.title, duration_minutes, age_minutes
        );

        Ok(ArchivePlayback {
            channel: channel.clone(),
            program: program.clone(),
            url,
            duration_minutes,
            age_minutes,
            template_used,
        })
    }

    /// Derive the playable catch-up URL for a program
    ///
    /// Returns `None` when the channel lacks catch-up support, the program
    /// times are degenerate, or the channel URL cannot be parsed; callers
    /// must reject playback rather than hand a malformed URL to the engine.
    pub fn build_archive_url(
        &self,
        channel: &Channel,
        program: &Program,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !channel.supports_catchup() || !has_valid_times(program) {
            return None;
        }

        let start_secs = (program.start_utc_millis() / 1000).max(0);
        let stop_secs = (program.stop_utc_millis() / 1000).max(start_secs);
        let duration_secs = (stop_secs - start_secs).max(self.min_duration_secs);
        let offset_secs = (program.start_utc_millis() - now.timestamp_millis()) / 1000;

        if channel.catchup_source.is_empty() {
            build_default_archive_url(channel, program, now, start_secs, duration_secs)
        } else {
            build_templated_archive_url(
                channel,
                &channel.catchup_source,
                start_secs,
                stop_secs,
                duration_secs,
                offset_secs,
            )
        }
    }
}

fn has_valid_times(program: &Program) -> bool {
    program.start_utc_millis() > 0
        && program.stop_utc_millis() > 0
        && program.stop > program.start
}

/// Provider default: the Flussonic path-based archive format,
/// `http://server/STREAM/archive-{from}-{duration}.m3u8`
fn build_default_archive_url(
    channel: &Channel,
    program: &Program,
    now: DateTime<Utc>,
    start_secs: i64,
    duration_secs: i64,
) -> Option<String> {
    let base = Url::parse(&channel.url).ok()?;

    let base_path = base.path();
    let stream_dir = match base_path.rfind('/') {
        Some(idx) if idx > 0 => &base_path[..idx],
        _ => "",
    };
    let archive_path = format!("{stream_dir}/archive-{start_secs}-{duration_secs}.m3u8");

    // EVENT playlists grow while the program is still airing; completed
    // programs come back as static VOD playlists regardless, so the flag
    // is always safe to send
    let query = merge_query(base.query().unwrap_or(""), "event=true");

    let mut archive = base;
    archive.set_path(&archive_path);
    archive.set_query(if query.is_empty() { None } else { Some(query.as_str()) });

    if program.stop > now {
        debug!("Archive URL for ongoing program (EVENT playlist): {}", archive_path);
    }
    Some(archive.to_string())
}

/// Fill a provider catch-up template (`catchup-source`) and resolve it
/// against the channel URL
fn build_templated_archive_url(
    channel: &Channel,
    template: &str,
    start_secs: i64,
    stop_secs: i64,
    duration_secs: i64,
    offset_secs: i64,
) -> Option<String> {
    let mut filled = template.to_string();

    // Some playlists carry bare `{utc}...` templates with the query
    // prefix missing
    if filled.starts_with('{') {
        filled = format!("?from={filled}");
    }

    filled = filled
        .replace("{utc}", &start_secs.to_string())
        .replace("{start}", &start_secs.to_string())
        .replace("{duration}", &duration_secs.to_string())
        .replace("{end}", &stop_secs.to_string())
        .replace("{stop}", &stop_secs.to_string())
        .replace("{offset}", &offset_secs.to_string())
        .replace("{timestamp}", &start_secs.to_string())
        .replace("{lutc}", &start_secs.to_string());

    let lower = filled.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(filled);
    }

    let base = Url::parse(&channel.url).ok()?;
    let base_query = base.query().unwrap_or("").to_string();

    if let Some(extra) = filled.strip_prefix('?').or_else(|| filled.strip_prefix('&')) {
        let merged = merge_query(extra, &base_query);
        let mut out = base;
        out.set_query(if merged.is_empty() { None } else { Some(merged.as_str()) });
        return Some(out.to_string());
    }

    // Path template: absolute, or relative to the channel URL's directory
    let path_with_template = if filled.starts_with('/') {
        filled
    } else {
        let base_path = base.path();
        let dir = match base_path.rfind('/') {
            Some(idx) => &base_path[..=idx],
            None => "/",
        };
        format!("{dir}{filled}")
    };
    let (new_path, extra_query) = match path_with_template.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (path_with_template, String::new()),
    };
    let merged = merge_query(&extra_query, &base_query);

    let mut out = base;
    out.set_path(&new_path);
    out.set_query(if merged.is_empty() { None } else { Some(merged.as_str()) });
    Some(out.to_string())
}

/// Join two query fragments, dropping empties and stray separators
fn merge_query(primary: &str, secondary: &str) -> String {
    [primary, secondary]
        .iter()
        .map(|q| q.trim_matches(|c| c == '?' || c == '&'))
        .filter(|q| !q.is_empty())
        .collect::<Vec<_>>()
        .join("&")
}
