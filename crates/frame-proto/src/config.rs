use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tv: TvConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub cover: CoverConfig,
    #[serde(default)]
    pub compose: ComposeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for the Frame television.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_tv_port")]
    pub port: u16,
    /// `wss://` + `https://` when true. Port 8002 on real sets.
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Name shown in the television's device list when pairing.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Pairing token issued by the television, if it requires one.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_matte")]
    pub matte: String,
    #[serde(default = "default_matte_color")]
    pub matte_color: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// How long to wait for an error reply to `select_image` before
    /// treating the selection as accepted.
    #[serde(default = "default_select_ack_ms")]
    pub select_ack_ms: u64,
    /// Pause between upload and select so the set can index the image.
    #[serde(default = "default_upload_settle_ms")]
    pub upload_settle_ms: u64,
    /// Pause between select and deleting the previous artwork.
    #[serde(default = "default_delete_settle_ms")]
    pub delete_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_channel")]
    pub channel: String,
}

/// Now-playing GraphQL endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverConfig {
    #[serde(default = "default_lastfm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Fall back to the station's own (smaller) cover when Last.fm has none.
    #[serde(default)]
    pub use_station_cover: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontFace {
    pub path: PathBuf,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    #[serde(default = "default_background")]
    pub background: PathBuf,
    /// Logo drawn in the top right corner. `None` skips it.
    #[serde(default = "default_station_logo")]
    pub station_logo: Option<PathBuf>,
    /// Logo drawn bottom left, next to the title bar. `None` skips it.
    #[serde(default = "default_show_logo")]
    pub show_logo: Option<PathBuf>,
    #[serde(default = "default_fonts")]
    pub fonts: Vec<FontFace>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Mirror logs into this file (no ANSI colours) in addition to stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl TvConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn select_ack_window(&self) -> Duration {
        Duration::from_millis(self.select_ack_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }

    pub fn delete_settle(&self) -> Duration {
        Duration::from_millis(self.delete_settle_ms)
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for TvConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_tv_port(),
            secure: default_true(),
            client_name: default_client_name(),
            token: None,
            matte: default_matte(),
            matte_color: default_matte_color(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            select_ack_ms: default_select_ack_ms(),
            upload_settle_ms: default_upload_settle_ms(),
            delete_settle_ms: default_delete_settle_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            channel: default_channel(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_source_endpoint(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            endpoint: default_lastfm_endpoint(),
            api_key: None,
            use_station_cover: false,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            background: default_background(),
            station_logo: default_station_logo(),
            show_logo: default_show_logo(),
            fonts: default_fonts(),
            output: default_output(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_tv_port() -> u16 {
    8002
}

fn default_client_name() -> String {
    "FrameSync".to_string()
}

fn default_matte() -> String {
    "none".to_string()
}

fn default_matte_color() -> String {
    "black".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_upload_timeout_secs() -> u64 {
    60
}

fn default_select_ack_ms() -> u64 {
    1500
}

fn default_upload_settle_ms() -> u64 {
    2000
}

fn default_delete_settle_ms() -> u64 {
    1000
}

fn default_interval_secs() -> u64 {
    10
}

fn default_channel() -> String {
    "npo-radio-2".to_string()
}

fn default_source_endpoint() -> String {
    "https://ios-luister.api.nporadio.nl/graphql".to_string()
}

fn default_lastfm_endpoint() -> String {
    "http://ws.audioscrobbler.com/2.0/".to_string()
}

fn default_http_timeout_secs() -> u64 {
    15
}

fn default_background() -> PathBuf {
    platform::resources_dir().join("background_cafe.jpg")
}

fn default_station_logo() -> Option<PathBuf> {
    Some(platform::resources_dir().join("npo_radio2_logo.png"))
}

fn default_show_logo() -> Option<PathBuf> {
    Some(platform::resources_dir().join("top2000_logo.png"))
}

fn default_fonts() -> Vec<FontFace> {
    platform::default_font_candidates()
        .into_iter()
        .map(|(path, index)| FontFace { path, index })
        .collect()
}

fn default_output() -> PathBuf {
    platform::data_dir().join("now_playing.jpg")
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file is created with defaults. A missing explicit
    /// file is an error. Environment overrides are left to the caller, see
    /// [`Config::apply_env_overrides`].
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("cannot read config {}: {}", path.display(), e)
                })?;
                toml::from_str(&content)?
            }
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    let content = std::fs::read_to_string(&config_path)?;
                    toml::from_str(&content)?
                } else {
                    let config = Self::default();
                    config.save()?;
                    config
                }
            }
        };
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Apply the add-on environment variables (`TV_IP`, `CHECK_INTERVAL`,
    /// `LASTFM_API_KEY`). Unparseable values leave the setting untouched and
    /// are returned as `NAME=value: reason` so they can be logged once logging
    /// is up.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();
        if let Some(host) = lookup("TV_IP").filter(|v| !v.trim().is_empty()) {
            self.tv.host = host.trim().to_string();
        }
        if let Some(raw) = lookup("CHECK_INTERVAL") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.sync.interval_secs = secs,
                Err(e) => rejected.push(format!("CHECK_INTERVAL={:?}: {}", raw, e)),
            }
        }
        if let Some(key) = lookup("LASTFM_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.cover.api_key = Some(key.trim().to_string());
        }
        rejected
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tv.host.trim().is_empty() {
            anyhow::bail!("tv.host is not set (config file or TV_IP)");
        }
        if self.sync.interval_secs == 0 {
            anyhow::bail!("sync.interval_secs must be at least 1");
        }
        if self.sync.channel.trim().is_empty() {
            anyhow::bail!("sync.channel must not be empty");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tv: TvConfig::default(),
            sync: SyncConfig::default(),
            source: SourceConfig::default(),
            cover: CoverConfig::default(),
            compose: ComposeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
