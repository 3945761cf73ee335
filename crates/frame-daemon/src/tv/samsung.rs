/// Samsung Frame art-channel session with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   SamsungSession::connect()
///         │  (handshake: ms.channel.connect → ms.channel.ready)
///         ├── writer_task   ← receives Outbound via mpsc, writes text frames → socket
///         └── reader_task   ← reads frames from socket
///                                └── d2d_service_message → matching Waiter
///                                       (by request id, else by event name)
/// ```
///
/// Image bytes go through a separate one-shot data socket (see `transfer`).
/// The session is dropped after each logical operation; dropping it without
/// `close()` aborts both tasks.
use async_trait::async_trait;
use frame_proto::config::TvConfig;
use frame_proto::protocol::{
    self, ArtEvent, ArtRequest, ChannelFrame, ImageFormat, MatteSpec, EV_ARTMODE_STATUS,
    EV_CURRENT_ARTWORK, EV_IMAGE_ADDED, EV_IMAGE_DELETED, EV_READY_TO_USE,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{transfer, ArtSession, ArtworkHandle, TvConnector, TvError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = oneshot::Sender<Result<ArtEvent, TvError>>;
type Waiters = Arc<Mutex<Vec<Waiter>>>;

static NEXT_WAITER: AtomicU64 = AtomicU64::new(1);

const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ── internal channel types ────────────────────────────────────────────────────

/// A caller parked until a matching art event arrives.
struct Waiter {
    token: u64,
    request: &'static str,
    id: Option<String>,
    event: Option<&'static str>,
    reply: Reply,
}

enum Outbound {
    Frame { id: String, text: String },
    Close,
}

/// The television presents a self-signed certificate on both the channel
/// and the data socket.
pub(super) fn insecure_tls() -> Result<native_tls::TlsConnector, TvError> {
    native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| TvError::Connect(format!("tls setup: {}", e)))
}

// ── connector ─────────────────────────────────────────────────────────────────

pub struct SamsungConnector {
    config: TvConfig,
    http: reqwest::Client,
}

impl SamsungConnector {
    pub fn new(config: TvConfig) -> Result<Self, TvError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl TvConnector for SamsungConnector {
    async fn open(&self) -> Result<Box<dyn ArtSession>, TvError> {
        let session = SamsungSession::connect(&self.config, self.http.clone()).await?;
        Ok(Box::new(session))
    }
}

// ── session ───────────────────────────────────────────────────────────────────

pub struct SamsungSession {
    device_info_url: String,
    http: reqwest::Client,
    out_tx: mpsc::Sender<Outbound>,
    waiters: Waiters,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    request_timeout: Duration,
    upload_timeout: Duration,
    select_ack: Duration,
}

impl SamsungSession {
    pub async fn connect(config: &TvConfig, http: reqwest::Client) -> Result<Self, TvError> {
        let url = protocol::channel_url(
            &config.host,
            config.port,
            config.secure,
            &config.client_name,
            config.token.as_deref(),
        );
        debug!("tv: connecting to {}", url);

        let connector = if config.secure {
            Some(Connector::NativeTls(insecure_tls()?))
        } else {
            None
        };

        let (ws, _) = tokio::time::timeout(
            config.connect_timeout(),
            connect_async_tls_with_config(url.as_str(), None, false, connector),
        )
        .await
        .map_err(|_| TvError::Timeout("websocket connect"))?
        .map_err(|e| TvError::Connect(e.to_string()))?;

        let (sink, mut stream) = ws.split();

        tokio::time::timeout(config.connect_timeout(), handshake(&mut stream))
            .await
            .map_err(|_| TvError::Timeout("ms.channel.ready"))??;
        info!("tv: art channel ready on {}:{}", config.host, config.port);

        let waiters: Waiters = Arc::new(Mutex::new(Vec::new()));
        let (out_tx, out_rx) = mpsc::channel::<Outbound>(16);

        let writer = tokio::spawn(writer_task(sink, out_rx, waiters.clone()));
        let reader = tokio::spawn(reader_task(stream, waiters.clone()));

        Ok(Self {
            device_info_url: protocol::device_info_url(&config.host, config.port, config.secure),
            http,
            out_tx,
            waiters,
            reader,
            writer,
            request_timeout: config.request_timeout(),
            upload_timeout: config.upload_timeout(),
            select_ack: config.select_ack_window(),
        })
    }

    async fn register(
        &self,
        request: &'static str,
        id: Option<String>,
        event: Option<&'static str>,
    ) -> (u64, oneshot::Receiver<Result<ArtEvent, TvError>>) {
        let token = NEXT_WAITER.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.waiters.lock().await.push(Waiter {
            token,
            request,
            id,
            event,
            reply,
        });
        (token, rx)
    }

    async fn forget(&self, token: u64) {
        self.waiters.lock().await.retain(|w| w.token != token);
    }

    /// Register a waiter for the request id, then hand the frame to the writer.
    async fn send(
        &self,
        req: &ArtRequest,
        expect: Option<&'static str>,
    ) -> Result<(u64, oneshot::Receiver<Result<ArtEvent, TvError>>), TvError> {
        let id = protocol::new_request_id();
        let text = req.encode(&id)?;
        let (token, rx) = self.register(req.name(), Some(id.clone()), expect).await;
        debug!("tv: send {} id={}", req.name(), id);
        if self.out_tx.send(Outbound::Frame { id, text }).await.is_err() {
            self.forget(token).await;
            return Err(TvError::Disconnected);
        }
        Ok((token, rx))
    }

    async fn wait(
        &self,
        token: u64,
        rx: oneshot::Receiver<Result<ArtEvent, TvError>>,
        what: &'static str,
        limit: Duration,
    ) -> Result<ArtEvent, TvError> {
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TvError::Disconnected),
            Err(_) => {
                self.forget(token).await;
                Err(TvError::Timeout(what))
            }
        }
    }

    async fn request(
        &self,
        req: ArtRequest,
        expect: Option<&'static str>,
    ) -> Result<ArtEvent, TvError> {
        let (token, rx) = self.send(&req, expect).await?;
        self.wait(token, rx, req.name(), self.request_timeout).await
    }
}

#[async_trait]
impl ArtSession for SamsungSession {
    async fn art_mode(&self) -> Result<bool, TvError> {
        let reply = self
            .request(ArtRequest::GetArtmodeStatus, Some(EV_ARTMODE_STATUS))
            .await?;
        let on = reply
            .art_mode_on()
            .ok_or(TvError::UnexpectedReply("get_artmode_status"))?;
        info!("tv: art mode status: {}", if on { "on" } else { "off" });
        Ok(on)
    }

    async fn is_supported(&self) -> Result<bool, TvError> {
        let response = self.http.get(&self.device_info_url).send().await?;
        let info: serde_json::Value = response.error_for_status()?.json().await?;
        let supported = protocol::parse_frame_support(&info);
        debug!("tv: FrameTVSupport={}", supported);
        Ok(supported)
    }

    async fn current_artwork(&self) -> Result<Option<ArtworkHandle>, TvError> {
        let reply = self
            .request(ArtRequest::GetCurrentArtwork, Some(EV_CURRENT_ARTWORK))
            .await?;
        Ok(reply.content_id().map(ArtworkHandle::new))
    }

    async fn upload(
        &self,
        image: &[u8],
        format: ImageFormat,
        matte: &MatteSpec,
    ) -> Result<ArtworkHandle, TvError> {
        let req = ArtRequest::SendImage {
            file_type: format,
            matte: matte.clone(),
            file_size: image.len(),
            connection_id: rand::thread_rng().gen_range(0..(1u64 << 32)),
        };
        let ready = self.request(req, Some(EV_READY_TO_USE)).await?;
        if ready.event != EV_READY_TO_USE {
            return Err(TvError::UnexpectedReply("send_image"));
        }
        let conn = ready.conn_info()?;

        // Park for image_added before the bytes land so the event can't race us
        let (token, added_rx) = self.register("send_image", None, Some(EV_IMAGE_ADDED)).await;

        info!(
            "tv: uploading {} bytes as {} to {}:{}",
            image.len(),
            format.as_str(),
            conn.ip,
            conn.port
        );
        if let Err(e) = transfer::push_image(&conn, format, image, self.upload_timeout).await {
            self.forget(token).await;
            return Err(e);
        }

        let added = self
            .wait(token, added_rx, EV_IMAGE_ADDED, self.upload_timeout)
            .await?;
        let handle = added
            .content_id()
            .map(ArtworkHandle::new)
            .ok_or(TvError::UnexpectedReply("send_image"))?;
        info!("tv: uploaded as {}", handle);
        Ok(handle)
    }

    async fn select(&self, handle: &ArtworkHandle) -> Result<(), TvError> {
        let req = ArtRequest::SelectImage {
            content_id: handle.as_str().to_string(),
            show: true,
        };
        let (token, rx) = self.send(&req, None).await?;

        // Most firmware never acknowledges a selection; only errors come back.
        match tokio::time::timeout(self.select_ack, rx).await {
            Ok(Ok(Ok(_))) => Ok(()),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(TvError::Disconnected),
            Err(_) => {
                self.forget(token).await;
                debug!("tv: no reply to select_image, assuming accepted");
                Ok(())
            }
        }
    }

    async fn delete_artwork(&self, handles: &[ArtworkHandle]) -> Result<(), TvError> {
        let req = ArtRequest::DeleteImageList {
            content_ids: handles.iter().map(|h| h.as_str().to_string()).collect(),
        };
        self.request(req, Some(EV_IMAGE_DELETED)).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let mut this = self;
        let _ = this.out_tx.send(Outbound::Close).await;
        if tokio::time::timeout(CLOSE_GRACE, &mut this.writer).await.is_err() {
            debug!("tv: writer did not finish closing in time");
        }
        debug!("tv: session closed");
        // Drop aborts the reader
    }
}

impl Drop for SamsungSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

// ── handshake ─────────────────────────────────────────────────────────────────

async fn handshake(stream: &mut SplitStream<WsStream>) -> Result<(), TvError> {
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return Err(TvError::Disconnected),
            Ok(_) => continue,
            Err(e) => return Err(TvError::Connect(e.to_string())),
        };
        match ChannelFrame::parse(&text) {
            Ok(ChannelFrame::Connect { token }) => {
                if let Some(token) = token {
                    info!("tv: television issued pairing token {} (set tv.token to reuse it)", token);
                }
            }
            Ok(ChannelFrame::Ready) => return Ok(()),
            Ok(ChannelFrame::Unauthorized) => return Err(TvError::Unauthorized),
            Ok(other) => debug!("tv: ignoring {:?} during handshake", other),
            Err(e) => debug!("tv: unparseable handshake frame '{}': {}", text, e),
        }
    }
    Err(TvError::Disconnected)
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task(mut stream: SplitStream<WsStream>, waiters: Waiters) {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match ChannelFrame::parse(&text) {
                Ok(ChannelFrame::Art(event)) => dispatch(&waiters, event).await,
                Ok(other) => debug!("tv reader: ignoring {:?}", other),
                Err(e) => debug!("tv reader: invalid frame '{}': {}", text, e),
            },
            Some(Ok(Message::Close(_))) | None => {
                debug!("tv reader: connection closed");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("tv reader: read error: {}", e);
                break;
            }
        }
    }
    // Fail everyone still waiting
    for waiter in waiters.lock().await.drain(..) {
        let _ = waiter.reply.send(Err(TvError::Disconnected));
    }
}

async fn dispatch(waiters: &Waiters, event: ArtEvent) {
    let mut list = waiters.lock().await;

    let by_id = event
        .request_id
        .as_deref()
        .and_then(|rid| list.iter().position(|w| w.id.as_deref() == Some(rid)));
    let pos = by_id.or_else(|| {
        list.iter()
            .position(|w| w.event == Some(event.event.as_str()))
    });

    let Some(pos) = pos else {
        if event.is_error() {
            warn!("tv reader: unmatched error event code={}", event.error_code());
        } else {
            debug!("tv reader: unsolicited event {}", event.event);
        }
        return;
    };

    let waiter = list.remove(pos);
    let result = if event.is_error() {
        Err(TvError::Device {
            request: waiter.request,
            code: event.error_code(),
        })
    } else {
        debug!("tv reader: {} -> {}", waiter.request, event.event);
        Ok(event)
    };
    let _ = waiter.reply.send(result);
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    waiters: Waiters,
) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Frame { id, text } => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("tv writer: write error: {}", e);
                    let mut list = waiters.lock().await;
                    if let Some(pos) = list.iter().position(|w| w.id.as_deref() == Some(id.as_str())) {
                        let waiter = list.remove(pos);
                        let _ = waiter.reply.send(Err(TvError::Disconnected));
                    }
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = sink.close().await;
                break;
            }
        }
    }
    debug!("tv writer: task exiting");
}
