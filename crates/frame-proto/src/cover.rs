//! Album cover lookup via Last.fm `track.getInfo`.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::CoverConfig;
use crate::error::SourceError;

/// Why a lookup produced no usable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    NoTrackInfo,
    NoAlbum,
    NoImages,
    NoExtraLarge,
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoTrackInfo => "no track info",
            Self::NoAlbum => "no album info",
            Self::NoImages => "album has no images",
            Self::NoExtraLarge => "no extralarge image",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverLookup {
    Found(String),
    Missing(MissReason),
}

pub struct LastFmResolver {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl LastFmResolver {
    pub fn new(config: &CoverConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub async fn resolve_cover(&self, artist: &str, title: &str) -> Result<CoverLookup, SourceError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(SourceError::MissingCredentials)?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("method", "track.getInfo"),
                ("api_key", api_key),
                ("artist", artist),
                ("track", title),
                ("format", "json"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }

        let body: Value = response.json().await?;
        let lookup = pick_cover(&body);
        match &lookup {
            CoverLookup::Found(url) => info!("found album cover for {} - {}: {}", artist, title, url),
            CoverLookup::Missing(reason) => debug!("no cover for {} - {}: {}", artist, title, reason),
        }
        Ok(lookup)
    }
}

/// Pick the first non-empty `extralarge` album image from a `track.getInfo` body.
pub fn pick_cover(body: &Value) -> CoverLookup {
    let Some(track) = body.get("track") else {
        return CoverLookup::Missing(MissReason::NoTrackInfo);
    };
    let Some(album) = track.get("album") else {
        return CoverLookup::Missing(MissReason::NoAlbum);
    };
    let images = match album.get("image").and_then(|v| v.as_array()) {
        Some(images) if !images.is_empty() => images,
        _ => return CoverLookup::Missing(MissReason::NoImages),
    };

    images
        .iter()
        .filter(|img| img["size"].as_str() == Some("extralarge"))
        .filter_map(|img| img["#text"].as_str())
        .find(|url| !url.is_empty())
        .map(|url| CoverLookup::Found(url.to_string()))
        .unwrap_or(CoverLookup::Missing(MissReason::NoExtraLarge))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pick_extralarge() {
        let body = json!({
            "track": {
                "name": "Hey Jude",
                "album": {
                    "image": [
                        { "#text": "https://lastfm/s.png", "size": "small" },
                        { "#text": "https://lastfm/xl.png", "size": "extralarge" }
                    ]
                }
            }
        });
        assert_eq!(
            pick_cover(&body),
            CoverLookup::Found("https://lastfm/xl.png".into())
        );
    }

    #[test]
    fn test_missing_reasons() {
        assert_eq!(
            pick_cover(&json!({ "error": 6, "message": "Track not found" })),
            CoverLookup::Missing(MissReason::NoTrackInfo)
        );
        assert_eq!(
            pick_cover(&json!({ "track": { "name": "x" } })),
            CoverLookup::Missing(MissReason::NoAlbum)
        );
        assert_eq!(
            pick_cover(&json!({ "track": { "album": { "image": [] } } })),
            CoverLookup::Missing(MissReason::NoImages)
        );
        let empty_xl = json!({
            "track": { "album": { "image": [
                { "#text": "", "size": "extralarge" },
                { "#text": "https://lastfm/m.png", "size": "medium" }
            ] } }
        });
        assert_eq!(
            pick_cover(&empty_xl),
            CoverLookup::Missing(MissReason::NoExtraLarge)
        );
    }
}
