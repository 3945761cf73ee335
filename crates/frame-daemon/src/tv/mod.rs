//! Television session seam.
//!
//! A session is one connection to the set, opened for a single logical
//! operation (an art-mode probe or a full replacement sequence) and closed
//! afterwards whatever the outcome. Nothing holds a session across cycles.

use async_trait::async_trait;
use frame_proto::error::ProtocolError;
use frame_proto::protocol::{ImageFormat, MatteSpec};
use std::fmt;
use thiserror::Error;

#[cfg(test)]
pub mod mock;
pub mod samsung;
mod transfer;

pub use samsung::SamsungConnector;

/// Content id of artwork stored on the television.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtworkHandle(String);

impl ArtworkHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtworkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum TvError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("television rejected the client (pairing required)")]
    Unauthorized,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("connection closed")]
    Disconnected,
    #[error("device error {code} on {request}")]
    Device { request: &'static str, code: String },
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
}

/// Operations available on an open television connection.
///
/// Methods take `&self`; sessions serialise their own traffic. Callers must
/// hand the session back through [`ArtSession::close`] on every path.
#[async_trait]
pub trait ArtSession: Send + Sync {
    async fn art_mode(&self) -> Result<bool, TvError>;

    async fn is_supported(&self) -> Result<bool, TvError>;

    /// Content id currently on display, if the set reports one.
    async fn current_artwork(&self) -> Result<Option<ArtworkHandle>, TvError>;

    async fn upload(
        &self,
        image: &[u8],
        format: ImageFormat,
        matte: &MatteSpec,
    ) -> Result<ArtworkHandle, TvError>;

    async fn select(&self, handle: &ArtworkHandle) -> Result<(), TvError>;

    async fn delete_artwork(&self, handles: &[ArtworkHandle]) -> Result<(), TvError>;

    async fn close(self: Box<Self>);
}

/// Opens sessions against one television.
#[async_trait]
pub trait TvConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ArtSession>, TvError>;
}
