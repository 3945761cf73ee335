//! Scripted in-memory television for exercising the sync loop and the
//! replacement sequence without a network.

use async_trait::async_trait;
use frame_proto::protocol::{ImageFormat, MatteSpec};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::{ArtSession, ArtworkHandle, TvConnector, TvError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open,
    ArtMode,
    Supported,
    Current,
    Upload(usize),
    Select(ArtworkHandle),
    Delete(Vec<ArtworkHandle>),
    Close,
}

/// Operation that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Open,
    ArtMode,
    Supported,
    Current,
    Upload,
    Select,
    Delete,
}

impl Op {
    fn request(self) -> &'static str {
        match self {
            Op::Open => "open",
            Op::ArtMode => "get_artmode_status",
            Op::Supported => "device_info",
            Op::Current => "get_current_artwork",
            Op::Upload => "send_image",
            Op::Select => "select_image",
            Op::Delete => "delete_image_list",
        }
    }
}

struct MockState {
    calls: Vec<Call>,
    art_mode: bool,
    supported: bool,
    current: Option<ArtworkHandle>,
    stored: Vec<ArtworkHandle>,
    failures: HashSet<Op>,
    next_id: u32,
}

#[derive(Clone)]
pub struct MockTv {
    state: Arc<Mutex<MockState>>,
}

impl MockTv {
    /// Art mode on, Frame support advertised, `MY_F0001` on display.
    pub fn new() -> Self {
        let first = ArtworkHandle::new("MY_F0001");
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                art_mode: true,
                supported: true,
                current: Some(first.clone()),
                stored: vec![first],
                failures: HashSet::new(),
                next_id: 2,
            })),
        }
    }

    pub fn with_art_mode(self, on: bool) -> Self {
        self.state.lock().unwrap().art_mode = on;
        self
    }

    pub fn with_current(self, current: Option<&str>) -> Self {
        self.state.lock().unwrap().current = current.map(ArtworkHandle::new);
        self
    }

    pub fn unsupported(self) -> Self {
        self.state.lock().unwrap().supported = false;
        self
    }

    pub fn failing(self, op: Op) -> Self {
        self.state.lock().unwrap().failures.insert(op);
        self
    }

    pub fn set_art_mode(&self, on: bool) {
        self.state.lock().unwrap().art_mode = on;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Artwork the set is currently showing.
    pub fn displayed(&self) -> Option<ArtworkHandle> {
        self.state.lock().unwrap().current.clone()
    }

    pub fn stored(&self) -> Vec<ArtworkHandle> {
        self.state.lock().unwrap().stored.clone()
    }
}

#[async_trait]
impl TvConnector for MockTv {
    async fn open(&self) -> Result<Box<dyn ArtSession>, TvError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Open);
        if state.failures.contains(&Op::Open) {
            return Err(TvError::Connect("connection refused".into()));
        }
        Ok(Box::new(MockSession {
            state: self.state.clone(),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn record(&self, call: Call, op: Op) -> Result<std::sync::MutexGuard<'_, MockState>, TvError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failures.contains(&op) {
            return Err(TvError::Device {
                request: op.request(),
                code: "-1".into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ArtSession for MockSession {
    async fn art_mode(&self) -> Result<bool, TvError> {
        Ok(self.record(Call::ArtMode, Op::ArtMode)?.art_mode)
    }

    async fn is_supported(&self) -> Result<bool, TvError> {
        Ok(self.record(Call::Supported, Op::Supported)?.supported)
    }

    async fn current_artwork(&self) -> Result<Option<ArtworkHandle>, TvError> {
        Ok(self.record(Call::Current, Op::Current)?.current.clone())
    }

    async fn upload(
        &self,
        image: &[u8],
        _format: ImageFormat,
        _matte: &MatteSpec,
    ) -> Result<ArtworkHandle, TvError> {
        let mut state = self.record(Call::Upload(image.len()), Op::Upload)?;
        let handle = ArtworkHandle::new(format!("MY_F{:04}", state.next_id));
        state.next_id += 1;
        state.stored.push(handle.clone());
        Ok(handle)
    }

    async fn select(&self, handle: &ArtworkHandle) -> Result<(), TvError> {
        let mut state = self.record(Call::Select(handle.clone()), Op::Select)?;
        state.current = Some(handle.clone());
        Ok(())
    }

    async fn delete_artwork(&self, handles: &[ArtworkHandle]) -> Result<(), TvError> {
        let mut state = self.record(Call::Delete(handles.to_vec()), Op::Delete)?;
        state.stored.retain(|h| !handles.contains(h));
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().calls.push(Call::Close);
    }
}
