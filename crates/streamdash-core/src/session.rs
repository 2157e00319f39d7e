//! Normalizes a backend's `/status/sessions` payload into [`Session`] records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{NumericField, as_list, is_truthy, str_field};

/// How the backend is delivering a stream to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamDecision {
    #[serde(rename = "Direct Play")]
    DirectPlay,
    #[serde(rename = "Direct Stream")]
    DirectStream,
    Transcode,
    Unknown,
}

impl StreamDecision {
    /// Map a raw decision token (`directplay`, `copy`, `Direct Stream`,
    /// `TRANSCODE`, ...) case-insensitively.
    pub fn from_token(token: &str) -> Self {
        let normalized: String = token
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "directplay" => Self::DirectPlay,
            "directstream" | "copy" => Self::DirectStream,
            "transcode" => Self::Transcode,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::DirectPlay => "Direct Play",
            Self::DirectStream => "Direct Stream",
            Self::Transcode => "Transcode",
            Self::Unknown => "Unknown",
        }
    }
}

/// Where the player sits relative to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkLocation {
    Lan,
    Wan,
}

/// One active playback on one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_key: Option<String>,
    pub server_id: i64,
    pub server_name: String,
    pub user: String,
    pub title: String,
    pub parent_title: Option<String>,
    pub grandparent_title: Option<String>,
    pub media_type: String,
    pub year: Option<u32>,
    pub thumb: Option<String>,
    pub progress: u8,
    pub state: Option<String>,
    pub bitrate_kbps: Option<u64>,
    pub quality: String,
    pub video_codec: Option<String>,
    pub resolution: String,
    pub codec_label: String,
    pub decision: StreamDecision,
    pub location: NetworkLocation,
    pub player: String,
    pub platform: String,
}

impl Session {
    /// Identity used to group plays of the same show/album/movie.
    pub fn content_key(&self) -> &str {
        self.grandparent_title
            .as_deref()
            .or(self.parent_title.as_deref())
            .unwrap_or(&self.title)
    }
}

/// Which backend a payload came from and how to build artwork URLs for it.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext<'a> {
    pub server_id: i64,
    pub server_name: &'a str,
    pub base_url: &'a str,
    pub token: &'a str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionParseError {
    #[error("session record is not an object")]
    NotAnObject,
    #[error("session record has no {0}")]
    MissingField(&'static str),
}

/// Parse every session record in a payload. Records that fail to parse are
/// logged and skipped.
pub fn parse_sessions(payload: &Value, ctx: &SessionContext<'_>) -> Vec<Session> {
    let container = payload.get("MediaContainer").unwrap_or(payload);
    as_list(container.get("Metadata"))
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match parse_session(record, ctx) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(
                    server = %ctx.server_name,
                    index,
                    error = %e,
                    "Skipping malformed session record"
                );
                None
            },
        })
        .collect()
}

/// Parse one session record.
pub fn parse_session(record: &Value, ctx: &SessionContext<'_>) -> Result<Session, SessionParseError> {
    if !record.is_object() {
        return Err(SessionParseError::NotAnObject);
    }
    let title = str_field(record, "title")
        .ok_or(SessionParseError::MissingField("title"))?
        .into_owned();

    let media_type = str_field(record, "type")
        .map(|t| t.into_owned())
        .unwrap_or_else(|| "unknown".to_string());

    let media = as_list(record.get("Media")).into_iter().next();
    let part = media.and_then(|m| as_list(m.get("Part")).into_iter().next());

    let bitrate_kbps = media
        .and_then(|m| NumericField::field(m, "bitrate").as_u64())
        .or_else(|| {
            record
                .get("Session")
                .and_then(|s| NumericField::field(s, "bandwidth").as_u64())
        });

    let video_codec = media
        .and_then(|m| str_field(m, "videoCodec").or_else(|| str_field(m, "audioCodec")))
        .map(|c| c.into_owned());
    let height = media.and_then(resolution_height).unwrap_or(0);

    let player = record.get("Player");
    let player_title = player
        .and_then(|p| str_field(p, "title").or_else(|| str_field(p, "product")))
        .map(|s| s.into_owned())
        .unwrap_or_else(|| "Unknown Player".to_string());
    let platform = player
        .and_then(|p| str_field(p, "platform").or_else(|| str_field(p, "product")))
        .map(|s| s.into_owned())
        .unwrap_or_else(|| "Unknown".to_string());
    let location = if is_truthy(player.and_then(|p| p.get("local"))) {
        NetworkLocation::Lan
    } else {
        NetworkLocation::Wan
    };

    let user = record
        .get("User")
        .and_then(|u| str_field(u, "title"))
        .map(|s| s.into_owned())
        .unwrap_or_else(|| "Unknown User".to_string());

    Ok(Session {
        session_key: str_field(record, "sessionKey").map(|s| s.into_owned()),
        server_id: ctx.server_id,
        server_name: ctx.server_name.to_string(),
        user,
        parent_title: str_field(record, "parentTitle").map(|s| s.into_owned()),
        grandparent_title: str_field(record, "grandparentTitle").map(|s| s.into_owned()),
        year: NumericField::field(record, "year")
            .as_u64()
            .and_then(|y| u32::try_from(y).ok()),
        thumb: artwork_url(record, &media_type, ctx),
        progress: progress_percent(
            NumericField::field(record, "viewOffset").value(),
            NumericField::field(record, "duration").value(),
        ),
        state: player
            .and_then(|p| str_field(p, "state"))
            .map(|s| s.into_owned()),
        quality: quality_label(bitrate_kbps),
        bitrate_kbps,
        resolution: resolution_label(height),
        codec_label: codec_label(video_codec.as_deref(), height),
        video_codec,
        decision: StreamDecision::from_token(&decision_token(record, part)),
        location,
        player: player_title,
        platform,
        media_type,
        title,
    })
}

/// `"8.5 Mbps"` from a bitrate in kbps.
pub fn quality_label(bitrate_kbps: Option<u64>) -> String {
    match bitrate_kbps {
        Some(kbps) => format!("{:.1} Mbps", kbps as f64 / 1000.0),
        None => "Unknown".to_string(),
    }
}

pub fn resolution_label(height: u64) -> String {
    match height {
        0 => "Unknown".to_string(),
        h if h >= 2160 => "4K".to_string(),
        h if h >= 1080 => "1080p".to_string(),
        h if h >= 720 => "720p".to_string(),
        h => format!("{h}p"),
    }
}

/// `"HEVC 4K"`, `"H264 1080p"`, `"UNKNOWN Unknown"`.
pub fn codec_label(codec: Option<&str>, height: u64) -> String {
    let codec = codec
        .map(str::to_uppercase)
        .unwrap_or_else(|| "UNKNOWN".to_string());
    format!("{codec} {}", resolution_label(height))
}

pub fn progress_percent(position: Option<f64>, duration: Option<f64>) -> u8 {
    match (position, duration) {
        (Some(pos), Some(dur)) if dur > 0.0 => ((pos / dur) * 100.0).round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

/// Append the backend's auth token to an artwork path.
pub fn with_token(base_url: &str, path: &str, token: &str) -> String {
    let sep = if path.contains('?') { '&' } else { '?' };
    if path.starts_with("http://") || path.starts_with("https://") {
        format!("{path}{sep}X-Plex-Token={token}")
    } else {
        format!("{}{path}{sep}X-Plex-Token={token}", base_url.trim_end_matches('/'))
    }
}

fn artwork_url(record: &Value, media_type: &str, ctx: &SessionContext<'_>) -> Option<String> {
    let series_art = if media_type == "episode" {
        str_field(record, "grandparentThumb").or_else(|| str_field(record, "parentThumb"))
    } else {
        None
    };
    let path = series_art.or_else(|| str_field(record, "thumb"))?;
    Some(with_token(ctx.base_url, &path, ctx.token))
}

fn resolution_height(media: &Value) -> Option<u64> {
    if let Some(h) = NumericField::field(media, "height").as_u64()
        && h > 0
    {
        return Some(h);
    }
    let raw = str_field(media, "videoResolution")?.trim().to_ascii_lowercase();
    match raw.as_str() {
        "4k" => Some(2160),
        "sd" => Some(480),
        other => other.trim_end_matches('p').parse().ok(),
    }
}

fn decision_token(record: &Value, part: Option<&Value>) -> String {
    if let Some(transcode) = record.get("TranscodeSession").filter(|v| v.is_object()) {
        return str_field(transcode, "videoDecision")
            .or_else(|| str_field(transcode, "audioDecision"))
            .map(|s| s.into_owned())
            .unwrap_or_else(|| "transcode".to_string());
    }
    part.and_then(|p| str_field(p, "decision"))
        .map(|s| s.into_owned())
        .unwrap_or_else(|| "directplay".to_string())
}
