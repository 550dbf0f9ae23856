//! HTTP EPG gateway
//!
//! Speaks the JSON protocol of the companion EPG service: programs are
//! requested per channel with `POST {base}/epg` and the service exposes a
//! `GET {base}/health` liveness probe.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::EpgGateway;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::models::Program;

#[derive(Debug, Serialize)]
struct EpgRequest {
    channels: Vec<EpgChannelRequest>,
    timezone: String,
    from_date: String,
    to_date: String,
}

#[derive(Debug, Serialize)]
struct EpgChannelRequest {
    xmltv_id: String,
}

#[derive(Debug, Deserialize)]
struct EpgResponse {
    #[serde(default)]
    epg: HashMap<String, Vec<WireProgram>>,
}

#[derive(Debug, Deserialize)]
struct WireProgram {
    #[serde(default)]
    id: String,
    start_time: String,
    stop_time: String,
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

pub struct HttpEpgGateway {
    client: Client,
    base_url: String,
    timezone: Tz,
    health_timeout: Duration,
}

impl HttpEpgGateway {
    /// `timezone` is the device timezone forwarded to the service, which
    /// buckets its response days by it
    pub fn new(config: &GatewayConfig, timezone: Tz) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            timezone,
            health_timeout: Duration::from_secs(config.health_timeout_secs),
        }
    }
}

#[async_trait]
impl EpgGateway for HttpEpgGateway {
    async fn fetch_programs(
        &self,
        tvg_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Program>, GatewayError> {
        let request = EpgRequest {
            channels: vec![EpgChannelRequest {
                xmltv_id: tvg_id.to_string(),
            }],
            timezone: self.timezone.name().to_string(),
            from_date: from.to_rfc3339(),
            to_date: to.to_rfc3339(),
        };

        debug!(
            "Fetching EPG window [{} .. {}] for channel {}",
            from, to, tvg_id
        );

        let response = self
            .client
            .post(format!("{}/epg", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("EPG request for channel {} failed: HTTP {}", tvg_id, status);
            return Err(GatewayError::unavailable(format!("HTTP {status}")));
        }

        let mut body: EpgResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::bad_response(e.to_string()))?;

        let wire = body.epg.remove(tvg_id).unwrap_or_else(|| {
            debug!("EPG response has no entry for channel {}", tvg_id);
            vec![]
        });
        let programs = wire
            .into_iter()
            .map(Program::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(trim_to_window(programs, from, to))
    }

    async fn current_healthy(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponse>().await {
                    Ok(health) => health.status.eq_ignore_ascii_case("ok"),
                    Err(_) => false,
                }
            }
            Ok(response) => {
                warn!("EPG health check failed: HTTP {}", response.status());
                false
            }
            Err(e) => {
                warn!("EPG health check failed: {}", e);
                false
            }
        }
    }
}

impl TryFrom<WireProgram> for Program {
    type Error = GatewayError;

    fn try_from(wire: WireProgram) -> Result<Self, Self::Error> {
        let start = parse_wire_time(&wire.start_time).ok_or_else(|| {
            GatewayError::bad_response(format!("unparseable start_time '{}'", wire.start_time))
        })?;
        let stop = parse_wire_time(&wire.stop_time).ok_or_else(|| {
            GatewayError::bad_response(format!("unparseable stop_time '{}'", wire.stop_time))
        })?;
        Ok(Program {
            id: wire.id,
            start,
            stop,
            title: wire.title,
            description: wire.description,
        })
    }
}

/// Parse the timestamp formats seen in the wild: RFC 3339, ISO without an
/// offset (treated as UTC), and the XMLTV `yyyymmddHHMMSS +ZZZZ` form
fn parse_wire_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(t) = DateTime::parse_from_str(raw, "%Y%m%d%H%M%S %z") {
        return Some(t.with_timezone(&Utc));
    }
    None
}

/// Keep only programs overlapping the queried window
fn trim_to_window(programs: Vec<Program>, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Program> {
    programs
        .into_iter()
        .filter(|p| p.stop >= from && p.start <= to)
        .collect()
}
