//! The reconciliation loop: poll the station, detect a new play, and push
//! fresh artwork when the television is showing art.
//!
//! One cycle:
//!
//! ```text
//!   fetch track ──err──▶ (log, keep last_seen)
//!       │ same id ──▶ done
//!       ▼
//!   probe art mode ──▶ last_seen = id ──off──▶ done
//!       ▼
//!   resolve cover ──none──▶ done
//!       ▼
//!   compose ──err──▶ done
//!       ▼
//!   replace_artwork
//! ```
//!
//! `last_seen_track_id` is updated right after the art-mode decision, so a
//! play whose replacement fails is not retried.

use async_trait::async_trait;
use frame_proto::config::Config;
use frame_proto::cover::{CoverLookup, LastFmResolver};
use frame_proto::error::SourceError;
use frame_proto::protocol::ImageFormat;
use frame_proto::track::{NowPlayingClient, TrackEvent};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::compose::{CompositionError, ImageComposer};
use crate::replace::{replace_artwork, ReplaceFailure, ReplaceOptions, Replaced};
use crate::tv::TvConnector;

// ── collaborator seams ────────────────────────────────────────────────────────

#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch_current_track(&self, channel: &str) -> Result<TrackEvent, SourceError>;
}

#[async_trait]
pub trait CoverSource: Send + Sync {
    async fn resolve_cover(&self, artist: &str, title: &str) -> Result<CoverLookup, SourceError>;
}

#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(
        &self,
        artist: &str,
        title: &str,
        cover_url: &str,
    ) -> Result<PathBuf, CompositionError>;
}

#[async_trait]
impl TrackSource for NowPlayingClient {
    async fn fetch_current_track(&self, channel: &str) -> Result<TrackEvent, SourceError> {
        NowPlayingClient::fetch_current_track(self, channel).await
    }
}

#[async_trait]
impl CoverSource for LastFmResolver {
    async fn resolve_cover(&self, artist: &str, title: &str) -> Result<CoverLookup, SourceError> {
        LastFmResolver::resolve_cover(self, artist, title).await
    }
}

#[async_trait]
impl Composer for ImageComposer {
    async fn compose(
        &self,
        artist: &str,
        title: &str,
        cover_url: &str,
    ) -> Result<PathBuf, CompositionError> {
        ImageComposer::compose(self, artist, title, cover_url).await
    }
}

// ── loop ──────────────────────────────────────────────────────────────────────

/// What a single poll cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    SourceUnavailable,
    Unchanged,
    ArtModeOff,
    NoCover,
    CompositionFailed,
    Replaced(Replaced),
    ReplaceFailed(ReplaceFailure),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::SourceUnavailable => "source_unavailable",
            CycleOutcome::Unchanged => "unchanged",
            CycleOutcome::ArtModeOff => "art_mode_off",
            CycleOutcome::NoCover => "no_cover",
            CycleOutcome::CompositionFailed => "composition_failed",
            CycleOutcome::Replaced(_) => "replaced",
            CycleOutcome::ReplaceFailed(_) => "replace_failed",
        }
    }
}

pub struct SyncLoop {
    source: Box<dyn TrackSource>,
    covers: Box<dyn CoverSource>,
    composer: Box<dyn Composer>,
    tv: Box<dyn TvConnector>,
    channel: String,
    interval: Duration,
    use_station_cover: bool,
    replace: ReplaceOptions,
    last_seen_track_id: Option<String>,
}

impl SyncLoop {
    pub fn new(
        config: &Config,
        source: Box<dyn TrackSource>,
        covers: Box<dyn CoverSource>,
        composer: Box<dyn Composer>,
        tv: Box<dyn TvConnector>,
    ) -> Self {
        Self {
            source,
            covers,
            composer,
            tv,
            channel: config.sync.channel.clone(),
            interval: config.sync.interval(),
            use_station_cover: config.cover.use_station_cover,
            replace: ReplaceOptions::from_config(&config.tv),
            last_seen_track_id: None,
        }
    }

    pub fn last_seen_track_id(&self) -> Option<&str> {
        self.last_seen_track_id.as_deref()
    }

    /// Poll until `cancel` fires. Cancellation is observed only while
    /// sleeping between cycles.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "sync: watching channel {} every {}s",
            self.channel,
            self.interval.as_secs()
        );
        loop {
            match self.tick().await {
                CycleOutcome::Replaced(done) => debug!(
                    content_id = %done.handle,
                    previous = ?done.previous,
                    previous_deleted = done.previous_deleted,
                    "sync: cycle finished: replaced"
                ),
                CycleOutcome::ReplaceFailed(e) => {
                    debug!(stage = ?e.stage(), "sync: cycle finished: replace_failed: {}", e)
                }
                other => debug!("sync: cycle finished: {}", other.label()),
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sync: shutdown requested, stopping");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Run exactly one poll cycle.
    pub async fn tick(&mut self) -> CycleOutcome {
        let track = match self.source.fetch_current_track(&self.channel).await {
            Ok(track) => track,
            Err(e) => {
                error!("sync: track source unavailable: {}", e);
                return CycleOutcome::SourceUnavailable;
            }
        };

        if self.last_seen_track_id.as_deref() == Some(track.id.as_str()) {
            debug!(track_id = %track.id, "sync: no change");
            return CycleOutcome::Unchanged;
        }
        info!(track_id = %track.id, "sync: new track {}", track);

        let art_mode = probe_art_mode(self.tv.as_ref()).await;
        self.last_seen_track_id = Some(track.id.clone());
        if !art_mode {
            info!(track_id = %track.id, "sync: art mode is off, skipping update");
            return CycleOutcome::ArtModeOff;
        }

        let Some(cover_url) = self.lookup_cover(&track).await else {
            return CycleOutcome::NoCover;
        };

        let path = match self
            .composer
            .compose(&track.artist, &track.title, &cover_url)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                error!(track_id = %track.id, "sync: composition failed: {}", e);
                return CycleOutcome::CompositionFailed;
            }
        };
        let image = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("sync: cannot read rendered image {}: {}", path.display(), e);
                return CycleOutcome::CompositionFailed;
            }
        };
        let format = ImageFormat::from_path(&path).unwrap_or(ImageFormat::Jpg);

        match replace_artwork(self.tv.as_ref(), &image, format, &self.replace).await {
            Ok(done) => {
                info!(track_id = %track.id, content_id = %done.handle, "sync: artwork updated");
                CycleOutcome::Replaced(done)
            }
            Err(e) => {
                let stage = e.stage().map(|s| s.to_string()).unwrap_or_else(|| "connect".into());
                error!(track_id = %track.id, stage = %stage, "sync: artwork not updated: {}", e);
                CycleOutcome::ReplaceFailed(e)
            }
        }
    }

    async fn lookup_cover(&self, track: &TrackEvent) -> Option<String> {
        match self.covers.resolve_cover(&track.artist, &track.title).await {
            Ok(CoverLookup::Found(url)) => {
                debug!("sync: cover {}", url);
                return Some(url);
            }
            Ok(CoverLookup::Missing(reason)) => {
                info!(track_id = %track.id, "sync: no album art found: {}", reason);
            }
            Err(e) => {
                warn!(track_id = %track.id, "sync: cover lookup failed: {}", e);
            }
        }
        if self.use_station_cover {
            if let Some(url) = &track.cover_url {
                info!(track_id = %track.id, "sync: falling back to station cover");
                return Some(url.clone());
            }
        }
        None
    }
}

/// Open a session just long enough to ask for art mode. Any failure reads
/// as "off".
pub async fn probe_art_mode(tv: &dyn TvConnector) -> bool {
    let session = match tv.open().await {
        Ok(session) => session,
        Err(e) => {
            warn!("sync: cannot reach television, assuming art mode off: {}", e);
            return false;
        }
    };
    let on = match session.art_mode().await {
        Ok(on) => on,
        Err(e) => {
            warn!("sync: art mode query failed, assuming off: {}", e);
            false
        }
    };
    session.close().await;
    on
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tv::mock::{Call, MockTv, Op};
    use crate::tv::ArtworkHandle;
    use frame_proto::cover::MissReason;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn track(id: &str) -> TrackEvent {
        TrackEvent {
            id: id.into(),
            artist: "Eagles".into(),
            title: "Hotel California".into(),
            from: "2024-12-27T14:02:11+01:00".into(),
            until: "2024-12-27T14:06:40+01:00".into(),
            cover_url: Some("https://station/cover.jpg".into()),
        }
    }

    /// Replays scripted results; the last one repeats.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<TrackEvent, SourceError>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<TrackEvent, SourceError>>) -> (Self, Arc<Mutex<usize>>) {
            let calls = Arc::new(Mutex::new(0));
            (
                Self {
                    script: Mutex::new(script.into()),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl TrackSource for ScriptedSource {
        async fn fetch_current_track(&self, _channel: &str) -> Result<TrackEvent, SourceError> {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(|r| match r {
                    Ok(t) => Ok(t.clone()),
                    Err(_) => Err(SourceError::Parse("scripted".into())),
                })
            };
            next.unwrap_or(Err(SourceError::Parse("script exhausted".into())))
        }
    }

    /// Records, per call, how many television calls had happened so far.
    struct StubCovers {
        result: fn() -> Result<CoverLookup, SourceError>,
        tv: MockTv,
        seen: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl CoverSource for StubCovers {
        async fn resolve_cover(&self, _a: &str, _t: &str) -> Result<CoverLookup, SourceError> {
            self.seen.lock().unwrap().push(self.tv.calls().len());
            (self.result)()
        }
    }

    struct StubComposer {
        dir: tempfile::TempDir,
        fail: bool,
        tv: MockTv,
        seen: Arc<Mutex<Vec<(String, usize)>>>,
    }

    #[async_trait]
    impl Composer for StubComposer {
        async fn compose(
            &self,
            artist: &str,
            title: &str,
            cover_url: &str,
        ) -> Result<PathBuf, CompositionError> {
            self.seen
                .lock()
                .unwrap()
                .push((format!("{} - {} @ {}", artist, title, cover_url), self.tv.calls().len()));
            if self.fail {
                return Err(CompositionError::Font(0));
            }
            let path = self.dir.path().join("now_playing.jpg");
            std::fs::write(&path, b"jpegbytes")?;
            Ok(path)
        }
    }

    struct Harness {
        sync: SyncLoop,
        tv: MockTv,
        source_calls: Arc<Mutex<usize>>,
        cover_calls: Arc<Mutex<Vec<usize>>>,
        compose_calls: Arc<Mutex<Vec<(String, usize)>>>,
    }

    fn found() -> Result<CoverLookup, SourceError> {
        Ok(CoverLookup::Found("https://lastfm/xl.png".into()))
    }

    fn missing() -> Result<CoverLookup, SourceError> {
        Ok(CoverLookup::Missing(MissReason::NoAlbum))
    }

    fn harness_with(
        tv: MockTv,
        script: Vec<Result<TrackEvent, SourceError>>,
        covers: fn() -> Result<CoverLookup, SourceError>,
        compose_fails: bool,
        config: Config,
    ) -> Harness {
        let (source, source_calls) = ScriptedSource::new(script);
        let cover_calls = Arc::new(Mutex::new(Vec::new()));
        let compose_calls = Arc::new(Mutex::new(Vec::new()));
        let sync = SyncLoop::new(
            &config,
            Box::new(source),
            Box::new(StubCovers {
                result: covers,
                tv: tv.clone(),
                seen: cover_calls.clone(),
            }),
            Box::new(StubComposer {
                dir: tempfile::tempdir().unwrap(),
                fail: compose_fails,
                tv: tv.clone(),
                seen: compose_calls.clone(),
            }),
            Box::new(tv.clone()),
        );
        Harness {
            sync,
            tv,
            source_calls,
            cover_calls,
            compose_calls,
        }
    }

    fn harness(
        tv: MockTv,
        script: Vec<Result<TrackEvent, SourceError>>,
        covers: fn() -> Result<CoverLookup, SourceError>,
    ) -> Harness {
        harness_with(tv, script, covers, false, Config::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_change_runs_full_sequence_in_order() {
        let tv = MockTv::new().with_current(Some("A1"));
        let mut h = harness(tv, vec![Ok(track("T1")), Ok(track("T2"))], found);

        h.sync.tick().await;
        h.tv.clear_calls();
        h.cover_calls.lock().unwrap().clear();
        h.compose_calls.lock().unwrap().clear();

        let outcome = h.sync.tick().await;
        assert!(matches!(outcome, CycleOutcome::Replaced(_)), "{:?}", outcome);
        assert_eq!(h.sync.last_seen_track_id(), Some("T2"));

        let calls = h.tv.calls();
        // Art-mode probe session, then the replacement session
        assert_eq!(&calls[..3], &[Call::Open, Call::ArtMode, Call::Close]);
        let uploaded = match &calls[6] {
            Call::Upload(n) => *n,
            other => panic!("expected upload, got {:?}", other),
        };
        assert_eq!(uploaded, b"jpegbytes".len());
        let new_handle = h.tv.displayed().unwrap();
        assert_eq!(
            &calls[3..],
            &[
                Call::Open,
                Call::Supported,
                Call::Current,
                Call::Upload(uploaded),
                Call::Select(new_handle.clone()),
                Call::Delete(vec![ArtworkHandle::new("MY_F0002")]),
                Call::Close,
            ]
        );
        // Cover and compose run between the probe and the replacement
        assert_eq!(*h.cover_calls.lock().unwrap(), vec![3]);
        let compose = h.compose_calls.lock().unwrap().clone();
        assert_eq!(
            compose,
            vec![("Eagles - Hotel California @ https://lastfm/xl.png".to_string(), 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_artwork_deleted_after_select() {
        let tv = MockTv::new().with_current(Some("A1"));
        let mut h = harness(tv, vec![Ok(track("T2"))], found);

        let outcome = h.sync.tick().await;
        let CycleOutcome::Replaced(done) = outcome else {
            panic!("expected replacement");
        };
        assert_eq!(done.previous, Some(ArtworkHandle::new("A1")));
        assert!(done.previous_deleted);

        let calls = h.tv.calls();
        let select = calls.iter().position(|c| matches!(c, Call::Select(_))).unwrap();
        let delete = calls
            .iter()
            .position(|c| *c == Call::Delete(vec![ArtworkHandle::new("A1")]))
            .unwrap();
        assert!(select < delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_track_is_idempotent() {
        let mut h = harness(MockTv::new(), vec![Ok(track("T1"))], found);

        assert!(matches!(h.sync.tick().await, CycleOutcome::Replaced(_)));
        h.tv.clear_calls();

        assert!(matches!(h.sync.tick().await, CycleOutcome::Unchanged));
        assert!(h.tv.calls().is_empty());
        assert_eq!(h.cover_calls.lock().unwrap().len(), 1);
        assert_eq!(h.compose_calls.lock().unwrap().len(), 1);
        assert_eq!(*h.source_calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_device_still_records_track() {
        let tv = MockTv::new().unsupported();
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        let outcome = h.sync.tick().await;
        assert!(matches!(
            outcome,
            CycleOutcome::ReplaceFailed(ReplaceFailure::Unsupported)
        ));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        assert!(!h
            .tv
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Upload(_) | Call::Select(_) | Call::Delete(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cover_skips_television() {
        let mut h = harness(MockTv::new(), vec![Ok(track("T1"))], missing);

        assert!(matches!(h.sync.tick().await, CycleOutcome::NoCover));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        assert_eq!(h.tv.calls(), vec![Call::Open, Call::ArtMode, Call::Close]);
        assert!(h.compose_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cover_lookup_error_counts_as_missing() {
        fn fails() -> Result<CoverLookup, SourceError> {
            Err(SourceError::MissingCredentials)
        }
        let mut h = harness(MockTv::new(), vec![Ok(track("T1"))], fails);

        assert!(matches!(h.sync.tick().await, CycleOutcome::NoCover));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_station_cover_fallback() {
        let mut config = Config::default();
        config.cover.use_station_cover = true;
        let mut h = harness_with(MockTv::new(), vec![Ok(track("T1"))], missing, false, config);

        assert!(matches!(h.sync.tick().await, CycleOutcome::Replaced(_)));
        let compose = h.compose_calls.lock().unwrap().clone();
        assert!(compose[0].0.ends_with("@ https://station/cover.jpg"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_art_mode_off_updates_last_seen() {
        let tv = MockTv::new().with_art_mode(false);
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        assert!(matches!(h.sync.tick().await, CycleOutcome::ArtModeOff));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        assert!(h.cover_calls.lock().unwrap().is_empty());

        // Turning art mode on later does not resurrect the same play
        h.tv.set_art_mode(true);
        assert!(matches!(h.sync.tick().await, CycleOutcome::Unchanged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_art_mode_error_fails_closed() {
        let tv = MockTv::new().failing(Op::ArtMode);
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        assert!(matches!(h.sync.tick().await, CycleOutcome::ArtModeOff));
        assert_eq!(h.tv.calls(), vec![Call::Open, Call::ArtMode, Call::Close]);
        assert!(h.cover_calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_television_fails_closed() {
        let tv = MockTv::new().failing(Op::Open);
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        assert!(matches!(h.sync.tick().await, CycleOutcome::ArtModeOff));
        assert_eq!(h.tv.calls(), vec![Call::Open]);
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_failure_keeps_last_seen() {
        let mut h = harness(
            MockTv::new(),
            vec![
                Ok(track("T1")),
                Err(SourceError::Parse("boom".into())),
                Ok(track("T1")),
            ],
            found,
        );

        assert!(matches!(h.sync.tick().await, CycleOutcome::Replaced(_)));
        assert!(matches!(h.sync.tick().await, CycleOutcome::SourceUnavailable));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        assert!(matches!(h.sync.tick().await, CycleOutcome::Unchanged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_composition_failure_not_retried() {
        let mut h = harness_with(
            MockTv::new(),
            vec![Ok(track("T1"))],
            found,
            true,
            Config::default(),
        );

        assert!(matches!(h.sync.tick().await, CycleOutcome::CompositionFailed));
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        assert!(matches!(h.sync.tick().await, CycleOutcome::Unchanged));
        assert_eq!(h.compose_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_failure_not_retried() {
        let tv = MockTv::new().failing(Op::Select);
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        assert!(matches!(
            h.sync.tick().await,
            CycleOutcome::ReplaceFailed(ReplaceFailure::Select { .. })
        ));
        h.tv.clear_calls();
        assert!(matches!(h.sync.tick().await, CycleOutcome::Unchanged));
        assert!(h.tv.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        // Art mode off keeps every cycle on the timer, away from the filesystem
        let tv = MockTv::new().with_art_mode(false);
        let mut h = harness(tv, vec![Ok(track("T1")), Ok(track("T2"))], found);
        let cancel = CancellationToken::new();
        let source_calls = h.source_calls.clone();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            // Cycles start at 0s, 10s and 20s
            tokio::time::sleep(Duration::from_secs(25)).await;
            stopper.cancel();
        });
        h.sync.run(cancel).await;

        assert_eq!(*source_calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_cycle_finishes_sequence() {
        let tv = MockTv::new().with_current(Some("A1"));
        let mut h = harness(tv, vec![Ok(track("T1"))], found);
        let cancel = CancellationToken::new();
        cancel.cancel();

        h.sync.run(cancel).await;

        assert_eq!(*h.source_calls.lock().unwrap(), 1);
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
        let calls = h.tv.calls();
        assert_eq!(
            &calls[calls.len() - 2..],
            &[Call::Delete(vec![ArtworkHandle::new("A1")]), Call::Close]
        );
        assert!(calls.contains(&Call::Select(ArtworkHandle::new("MY_F0002"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capability_error_is_sequence_fatal() {
        let tv = MockTv::new().failing(Op::Supported);
        let mut h = harness(tv, vec![Ok(track("T1"))], found);

        assert!(matches!(
            h.sync.tick().await,
            CycleOutcome::ReplaceFailed(ReplaceFailure::Capability(_))
        ));
        assert_eq!(
            h.tv.calls(),
            vec![
                Call::Open,
                Call::ArtMode,
                Call::Close,
                Call::Open,
                Call::Supported,
                Call::Close,
            ]
        );
        assert_eq!(h.sync.last_seen_track_id(), Some("T1"));
    }
}
