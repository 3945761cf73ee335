//! The artwork replacement sequence.
//!
//! ```text
//!   START → CHECK_SUPPORTED → LOOKUP_PREVIOUS → UPLOAD → SELECT → DELETE_PREVIOUS → DONE
//!                 │                              │        │
//!                 └──────────────┬───────────────┴────────┘
//!                                ▼
//!                             FAILED
//! ```
//!
//! LOOKUP_PREVIOUS and DELETE_PREVIOUS only warn. Nothing is retried and a
//! failed select leaves the uploaded artwork on the set.

use frame_proto::config::TvConfig;
use frame_proto::protocol::{ImageFormat, MatteSpec};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::tv::{ArtSession, ArtworkHandle, TvConnector, TvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckSupported,
    LookupPrevious,
    Upload,
    Select,
    DeletePrevious,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CheckSupported => "check_supported",
            Stage::LookupPrevious => "lookup_previous",
            Stage::Upload => "upload",
            Stage::Select => "select",
            Stage::DeletePrevious => "delete_previous",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    pub matte: MatteSpec,
    /// Pause between upload and select while the set indexes the new image.
    pub upload_settle: Duration,
    /// Pause between select and delete of the previous artwork.
    pub delete_settle: Duration,
}

impl ReplaceOptions {
    pub fn from_config(tv: &TvConfig) -> Self {
        Self {
            matte: MatteSpec::new(tv.matte.clone(), tv.matte_color.clone()),
            upload_settle: tv.upload_settle(),
            delete_settle: tv.delete_settle(),
        }
    }
}

/// A completed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replaced {
    pub handle: ArtworkHandle,
    pub previous: Option<ArtworkHandle>,
    pub previous_deleted: bool,
}

#[derive(Debug, Error)]
pub enum ReplaceFailure {
    #[error("cannot connect to television: {0}")]
    Connect(#[source] TvError),
    #[error("television does not support art mode uploads")]
    Unsupported,
    #[error("capability check failed: {0}")]
    Capability(#[source] TvError),
    #[error("upload failed: {0}")]
    Upload(#[source] TvError),
    #[error("select of {handle} failed, uploaded artwork left orphaned: {source}")]
    Select {
        handle: ArtworkHandle,
        #[source]
        source: TvError,
    },
}

impl ReplaceFailure {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ReplaceFailure::Connect(_) => None,
            ReplaceFailure::Unsupported | ReplaceFailure::Capability(_) => {
                Some(Stage::CheckSupported)
            }
            ReplaceFailure::Upload(_) => Some(Stage::Upload),
            ReplaceFailure::Select { .. } => Some(Stage::Select),
        }
    }
}

/// Open a session, run the sequence, and close the session on every path.
pub async fn replace_artwork(
    connector: &dyn TvConnector,
    image: &[u8],
    format: ImageFormat,
    opts: &ReplaceOptions,
) -> Result<Replaced, ReplaceFailure> {
    let session = match connector.open().await {
        Ok(s) => s,
        Err(e) => {
            error!("replace: cannot connect to television: {}", e);
            return Err(ReplaceFailure::Connect(e));
        }
    };
    let result = run_sequence(session.as_ref(), image, format, opts).await;
    session.close().await;
    result
}

async fn run_sequence(
    session: &dyn ArtSession,
    image: &[u8],
    format: ImageFormat,
    opts: &ReplaceOptions,
) -> Result<Replaced, ReplaceFailure> {
    match session.is_supported().await {
        Ok(true) => debug!(stage = %Stage::CheckSupported, "replace: device supports art uploads"),
        Ok(false) => {
            error!(stage = %Stage::CheckSupported, "replace: device does not support art mode");
            return Err(ReplaceFailure::Unsupported);
        }
        Err(e) => {
            error!(stage = %Stage::CheckSupported, "replace: capability check failed: {}", e);
            return Err(ReplaceFailure::Capability(e));
        }
    }

    let previous = match session.current_artwork().await {
        Ok(prev) => {
            debug!(stage = %Stage::LookupPrevious, "replace: current artwork {:?}", prev);
            prev
        }
        Err(e) => {
            warn!(stage = %Stage::LookupPrevious, "replace: current artwork lookup failed, continuing: {}", e);
            None
        }
    };

    let handle = match session.upload(image, format, &opts.matte).await {
        Ok(h) => h,
        Err(e) => {
            error!(stage = %Stage::Upload, "replace: upload failed: {}", e);
            return Err(ReplaceFailure::Upload(e));
        }
    };
    info!(stage = %Stage::Upload, content_id = %handle, "replace: uploaded");

    tokio::time::sleep(opts.upload_settle).await;

    if let Err(e) = session.select(&handle).await {
        error!(
            stage = %Stage::Select,
            content_id = %handle,
            "replace: select failed, uploaded artwork is orphaned: {}", e
        );
        return Err(ReplaceFailure::Select { handle, source: e });
    }
    info!(stage = %Stage::Select, content_id = %handle, "replace: selected");

    let mut previous_deleted = false;
    match &previous {
        Some(prev) if *prev != handle => {
            tokio::time::sleep(opts.delete_settle).await;
            match session.delete_artwork(std::slice::from_ref(prev)).await {
                Ok(()) => {
                    info!(stage = %Stage::DeletePrevious, content_id = %prev, "replace: deleted previous artwork");
                    previous_deleted = true;
                }
                Err(e) => warn!(
                    stage = %Stage::DeletePrevious,
                    content_id = %prev,
                    "replace: delete of previous artwork failed: {}", e
                ),
            }
        }
        _ => debug!(stage = %Stage::DeletePrevious, "replace: no previous artwork to delete"),
    }

    Ok(Replaced {
        handle,
        previous,
        previous_deleted,
    })
}
