use thiserror::Error;

/// Failure talking to an HTTP collaborator (now-playing API, Last.fm).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("no API key configured")]
    MissingCredentials,
}

/// Malformed frame on the television's art channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
}
