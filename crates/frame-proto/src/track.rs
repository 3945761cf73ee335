//! Now-playing lookup against the NPO radio GraphQL API.

use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::SourceError;

/// Size suffix the API appends to cover URLs; dropping it yields the full image.
const COVER_SIZE_SUFFIX: &str = "&width=250&height=250";

const NOW_PLAYING_QUERY: &str = "query GetNowPlaying($channel: String!) { result: radio_track_plays( channel: $channel order_by: \"from\" order_direction: \"desc\" limit: 1 ) { __typename playingTrack: data { __typename id from until song artist track: radio_tracks { __typename cover_url(size: MEDIUM) } } } }";

// ── TrackEvent ────────────────────────────────────────────────────────────────

/// One play of a track on the station.
///
/// `id` identifies the play, not the recording: the same song aired twice
/// gets two ids. Two events are the same track iff their ids match.
#[derive(Debug, Clone)]
pub struct TrackEvent {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub from: String,
    pub until: String,
    pub cover_url: Option<String>,
}

impl TrackEvent {
    pub fn same_play(&self, other: &TrackEvent) -> bool {
        self.id == other.id
    }
}

impl PartialEq for TrackEvent {
    fn eq(&self, other: &Self) -> bool {
        self.same_play(other)
    }
}

impl Eq for TrackEvent {}

impl fmt::Display for TrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({} to {})",
            self.artist, self.title, self.from, self.until
        )
    }
}

// ── client ────────────────────────────────────────────────────────────────────

pub struct NowPlayingClient {
    client: reqwest::Client,
    endpoint: String,
}

impl NowPlayingClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Fetch the most recent play on `channel`.
    pub async fn fetch_current_track(&self, channel: &str) -> Result<TrackEvent, SourceError> {
        // Timestamp defeats intermediate caches
        let stamp = chrono::Utc::now().timestamp_millis().to_string();

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("_", stamp)])
            .json(&request_body(channel))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }

        let body: Value = response.json().await?;
        let track = parse_now_playing(&body)?;
        debug!("now playing on {}: id={} {}", channel, track.id, track);
        Ok(track)
    }
}

fn request_body(channel: &str) -> Value {
    json!({
        "extensions": {
            "clientLibrary": { "name": "apollo-ios", "version": "1.23.0" }
        },
        "operationName": "GetNowPlaying",
        "query": NOW_PLAYING_QUERY,
        "variables": { "channel": channel }
    })
}

/// Extract the playing track from a `GetNowPlaying` response.
pub fn parse_now_playing(body: &Value) -> Result<TrackEvent, SourceError> {
    let track = &body["data"]["result"]["playingTrack"][0];
    if track.is_null() {
        return Err(SourceError::Parse("no playingTrack in response".into()));
    }

    let field = |name: &'static str| -> Result<String, SourceError> {
        match &track[name] {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(SourceError::Parse(format!("playingTrack.{} missing", name))),
        }
    };

    let cover_url = track["track"]["cover_url"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.replace(COVER_SIZE_SUFFIX, ""));

    Ok(TrackEvent {
        id: field("id")?,
        artist: field("artist")?,
        title: field("song")?,
        from: field("from")?,
        until: field("until")?,
        cover_url,
    })
}
