//! Wire format of the Frame television's `com.samsung.art-app` channel.
//!
//! Requests go out as `ms.channel.emit` envelopes whose `data` field is itself
//! a JSON *string*. Replies come back as `d2d_service_message` events, again
//! with a stringified `data` payload carrying the originating request id.
//!
//! ```text
//!   → {"method":"ms.channel.emit","params":{"event":"art_app_request","to":"host",
//!        "data":"{\"request\":\"get_artmode_status\",\"id\":\"<uuid>\",...}"}}
//!   ← {"event":"d2d_service_message",
//!        "data":"{\"event\":\"artmode_status\",\"value\":\"on\",\"request_id\":\"<uuid>\"}"}
//! ```
//!
//! Image bytes do not travel over the WebSocket: `send_image` is answered with
//! `ready_to_use` + connection info for a one-shot data socket, framed as a
//! 4-byte big-endian header length, a JSON header, then the raw file.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use crate::error::ProtocolError;

pub const ART_CHANNEL: &str = "com.samsung.art-app";

pub const EV_CHANNEL_CONNECT: &str = "ms.channel.connect";
pub const EV_CHANNEL_READY: &str = "ms.channel.ready";
pub const EV_CHANNEL_UNAUTHORIZED: &str = "ms.channel.unauthorized";
pub const EV_D2D_MESSAGE: &str = "d2d_service_message";

pub const EV_ARTMODE_STATUS: &str = "artmode_status";
pub const EV_CURRENT_ARTWORK: &str = "current_artwork";
pub const EV_READY_TO_USE: &str = "ready_to_use";
pub const EV_IMAGE_ADDED: &str = "image_added";
pub const EV_IMAGE_DELETED: &str = "image_deleted";
pub const EV_ERROR: &str = "error";

const UPLOAD_HEADER_VERSION: &str = "0.0.1";

// ── endpoints ─────────────────────────────────────────────────────────────────

/// WebSocket URL of the art channel. The client name is base64 encoded.
pub fn channel_url(host: &str, port: u16, secure: bool, name: &str, token: Option<&str>) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    let name = base64::engine::general_purpose::STANDARD.encode(name.as_bytes());
    let mut url = format!(
        "{}://{}:{}/api/v2/channels/{}?name={}",
        scheme, host, port, ART_CHANNEL, name
    );
    if let Some(token) = token.filter(|t| !t.is_empty()) {
        url.push_str("&token=");
        url.push_str(token);
    }
    url
}

/// REST device-info URL, served on the same port as the channel.
pub fn device_info_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "https" } else { "http" };
    format!("{}://{}:{}/api/v2/", scheme, host, port)
}

/// `true` when the device-info document advertises Frame art support.
pub fn parse_frame_support(device_info: &Value) -> bool {
    device_info["device"]["FrameTVSupport"].as_str() == Some("true")
}

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ── image metadata ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpg,
    Png,
}

impl ImageFormat {
    /// Derive the format from a file extension (`jpeg` is sent as `jpg`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Border style the television draws around the artwork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatteSpec {
    pub style: String,
    pub color: String,
}

impl MatteSpec {
    pub fn none() -> Self {
        Self {
            style: "none".into(),
            color: String::new(),
        }
    }

    pub fn new(style: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            color: color.into(),
        }
    }

    /// `none`, or `<style>_<color>` such as `shadowbox_polar`.
    pub fn matte_id(&self) -> String {
        if self.style.is_empty() || self.style == "none" {
            "none".to_string()
        } else {
            format!("{}_{}", self.style, self.color)
        }
    }
}

// ── requests ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ArtRequest {
    GetArtmodeStatus,
    GetCurrentArtwork,
    SendImage {
        file_type: ImageFormat,
        matte: MatteSpec,
        file_size: usize,
        connection_id: u64,
    },
    SelectImage {
        content_id: String,
        show: bool,
    },
    DeleteImageList {
        content_ids: Vec<String>,
    },
}

impl ArtRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetArtmodeStatus => "get_artmode_status",
            Self::GetCurrentArtwork => "get_current_artwork",
            Self::SendImage { .. } => "send_image",
            Self::SelectImage { .. } => "select_image",
            Self::DeleteImageList { .. } => "delete_image_list",
        }
    }

    fn data(&self, id: &str) -> Value {
        let mut data = match self {
            Self::GetArtmodeStatus | Self::GetCurrentArtwork => json!({}),
            Self::SendImage {
                file_type,
                matte,
                file_size,
                connection_id,
            } => {
                let matte_id = matte.matte_id();
                json!({
                    "file_type": file_type.as_str(),
                    "conn_info": {
                        "d2d_mode": "socket",
                        "connection_id": connection_id,
                        "id": id,
                    },
                    "image_date": chrono::Local::now().format("%Y:%m:%d %H:%M:%S").to_string(),
                    "matte_id": matte_id,
                    "portrait_matte_id": matte_id,
                    "file_size": file_size,
                })
            }
            Self::SelectImage { content_id, show } => json!({
                "category_id": Value::Null,
                "content_id": content_id,
                "show": show,
            }),
            Self::DeleteImageList { content_ids } => json!({
                "content_id_list": content_ids
                    .iter()
                    .map(|id| json!({ "content_id": id }))
                    .collect::<Vec<_>>(),
            }),
        };
        data["request"] = json!(self.name());
        data["id"] = json!(id);
        data["request_id"] = json!(id);
        data
    }

    /// Serialise into the `ms.channel.emit` text frame sent over the socket.
    pub fn encode(&self, id: &str) -> Result<String, ProtocolError> {
        let data = serde_json::to_string(&self.data(id))?;
        let envelope = json!({
            "method": "ms.channel.emit",
            "params": {
                "event": "art_app_request",
                "to": "host",
                "data": data,
            }
        });
        Ok(serde_json::to_string(&envelope)?)
    }
}

// ── incoming frames ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ChannelFrame {
    /// First frame after the socket opens; may carry a pairing token.
    Connect { token: Option<String> },
    Ready,
    Unauthorized,
    Art(ArtEvent),
    /// Anything else (`ms.channel.clientConnect`, ...).
    Other(String),
}

impl ChannelFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let event = value["event"]
            .as_str()
            .ok_or(ProtocolError::MissingField("event"))?;

        let frame = match event {
            EV_CHANNEL_CONNECT => ChannelFrame::Connect {
                token: value["data"]["token"].as_str().map(str::to_string),
            },
            EV_CHANNEL_READY => ChannelFrame::Ready,
            EV_CHANNEL_UNAUTHORIZED => ChannelFrame::Unauthorized,
            EV_D2D_MESSAGE => ChannelFrame::Art(ArtEvent::from_payload(&value["data"])?),
            other => ChannelFrame::Other(other.to_string()),
        };
        Ok(frame)
    }
}

/// Decoded `d2d_service_message` payload.
#[derive(Debug, Clone)]
pub struct ArtEvent {
    pub event: String,
    pub request_id: Option<String>,
    pub data: Value,
}

impl ArtEvent {
    fn from_payload(payload: &Value) -> Result<Self, ProtocolError> {
        // Firmware sends the payload stringified; tolerate a plain object too.
        let data: Value = match payload {
            Value::String(s) => serde_json::from_str(s)?,
            Value::Object(_) => payload.clone(),
            _ => return Err(ProtocolError::MissingField("data")),
        };
        let event = data["event"]
            .as_str()
            .ok_or(ProtocolError::MissingField("data.event"))?
            .to_string();
        let request_id = data["request_id"]
            .as_str()
            .or_else(|| data["id"].as_str())
            .map(str::to_string);
        Ok(Self {
            event,
            request_id,
            data,
        })
    }

    pub fn is_error(&self) -> bool {
        self.event == EV_ERROR
    }

    pub fn error_code(&self) -> String {
        match &self.data["error_code"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => "unknown".to_string(),
        }
    }

    pub fn content_id(&self) -> Option<&str> {
        self.data["content_id"].as_str().filter(|s| !s.is_empty())
    }

    /// Art mode from an `artmode_status` reply. `value` is either `"on"`
    /// or an object `{"value": "on"}` depending on firmware.
    pub fn art_mode_on(&self) -> Option<bool> {
        let value = match &self.data["value"] {
            Value::Object(inner) => inner.get("value")?.as_str()?.to_string(),
            Value::String(s) => s.clone(),
            _ => return None,
        };
        Some(value.eq_ignore_ascii_case("on"))
    }

    pub fn conn_info(&self) -> Result<ConnInfo, ProtocolError> {
        let raw = &self.data["conn_info"];
        let info: Value = match raw {
            Value::String(s) => serde_json::from_str(s)?,
            Value::Object(_) => raw.clone(),
            _ => return Err(ProtocolError::MissingField("conn_info")),
        };
        ConnInfo::from_value(&info)
    }
}

/// Where to push the image bytes after `ready_to_use`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub ip: String,
    pub port: u16,
    pub key: String,
    pub secured: bool,
}

impl ConnInfo {
    fn from_value(info: &Value) -> Result<Self, ProtocolError> {
        let ip = info["ip"]
            .as_str()
            .ok_or(ProtocolError::MissingField("conn_info.ip"))?
            .to_string();
        let port = match &info["port"] {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.parse::<u16>().ok(),
            _ => None,
        }
        .ok_or(ProtocolError::MissingField("conn_info.port"))?;
        let key = info["key"]
            .as_str()
            .ok_or(ProtocolError::MissingField("conn_info.key"))?
            .to_string();
        let secured = match &info["secured"] {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Ok(Self {
            ip,
            port,
            key,
            secured,
        })
    }
}

// ── data socket framing ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHeader {
    pub num: u32,
    pub total: u32,
    pub file_length: usize,
    pub file_name: String,
    pub file_type: String,
    pub sec_key: String,
    pub version: String,
}

impl UploadHeader {
    pub fn new(info: &ConnInfo, file_type: ImageFormat, file_length: usize) -> Self {
        Self {
            num: 0,
            total: 1,
            file_length,
            file_name: "dummy".to_string(),
            file_type: file_type.as_str().to_string(),
            sec_key: info.key.clone(),
            version: UPLOAD_HEADER_VERSION.to_string(),
        }
    }

    /// Length-prefixed header bytes; the image bytes follow on the wire.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> Result<(Self, usize), ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::MissingField("header length"));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            return Err(ProtocolError::MissingField("header"));
        }
        let header: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((header, 4 + len))
    }
}
