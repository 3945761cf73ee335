//! Renders the 4K now-playing artwork: background, cover, logos, and a
//! title bar.
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────┐
//!   │ background (cover-fit)   ┌──────────┐     [station]  │
//!   │                          │  cover   │                │
//!   │                          │ (full h) │                │
//!   │ [show]  ███ artist - title ██████████████████████████│
//!   └──────────────────────────────────────────────────────┘
//! ```
use ab_glyph::{FontVec, PxScale};
use frame_proto::config::{ComposeConfig, FontFace};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const CANVAS_WIDTH: u32 = 3840;
pub const CANVAS_HEIGHT: u32 = 2160;

const STATION_LOGO_WIDTH: u32 = 320;
const STATION_LOGO_MARGIN: u32 = 80;
const SHOW_LOGO_WIDTH: u32 = 600;
const SHOW_LOGO_X: u32 = 40;
const BOTTOM_PADDING: u32 = 80;
const BAR_GAP: u32 = 60;
const BAR_PADDING_Y: u32 = 15;
const TEXT_PADDING_X: u32 = 50;
const TEXT_PX: f32 = 85.0;
const JPEG_QUALITY: u8 = 100;

const BAR_COLOR: Rgba<u8> = Rgba([0xDA, 0x0D, 0x14, 0xFF]);
const TEXT_COLOR: Rgba<u8> = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);

const COVER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("missing asset {}", .0.display())]
    MissingAsset(PathBuf),
    #[error("no usable font among {0} candidates")]
    Font(usize),
    #[error("cover download failed: {0}")]
    Cover(#[from] reqwest::Error),
    #[error("cover could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

struct Assets {
    background: DynamicImage,
    station_logo: Option<DynamicImage>,
    show_logo: Option<DynamicImage>,
    font: FontVec,
}

impl Assets {
    fn load(config: &ComposeConfig) -> Result<Self, CompositionError> {
        let background = open_asset(&config.background)?;
        let station_logo = config.station_logo.as_deref().map(open_asset).transpose()?;
        let show_logo = config.show_logo.as_deref().map(open_asset).transpose()?;
        let font = load_font(&config.fonts)?;
        Ok(Self {
            background,
            station_logo,
            show_logo,
            font,
        })
    }
}

fn open_asset(path: &Path) -> Result<DynamicImage, CompositionError> {
    if !path.is_file() {
        return Err(CompositionError::MissingAsset(path.to_path_buf()));
    }
    Ok(image::open(path)?)
}

/// First candidate that reads and parses wins.
fn load_font(candidates: &[FontFace]) -> Result<FontVec, CompositionError> {
    for face in candidates {
        let data = match std::fs::read(&face.path) {
            Ok(data) => data,
            Err(_) => continue,
        };
        match FontVec::try_from_vec_and_index(data, face.index) {
            Ok(font) => {
                debug!("compose: using font {} (face {})", face.path.display(), face.index);
                return Ok(font);
            }
            Err(e) => debug!("compose: skipping font {}: {}", face.path.display(), e),
        }
    }
    Err(CompositionError::Font(candidates.len()))
}

pub struct ImageComposer {
    config: ComposeConfig,
    http: reqwest::Client,
}

impl ImageComposer {
    pub fn new(config: ComposeConfig) -> Result<Self, CompositionError> {
        let http = reqwest::Client::builder().timeout(COVER_TIMEOUT).build()?;
        Ok(Self { config, http })
    }

    /// Render `artist - title` over the cover at `cover_url` and write the
    /// result to the configured output path.
    pub async fn compose(
        &self,
        artist: &str,
        title: &str,
        cover_url: &str,
    ) -> Result<PathBuf, CompositionError> {
        // Assets first: a broken install should not cost a download per cycle
        let config = self.config.clone();
        let assets = tokio::task::spawn_blocking(move || Assets::load(&config)).await??;

        let cover = self.fetch_cover(cover_url).await?;
        let text = format!("{} - {}", artist, title);
        let output = self.config.output.clone();

        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf, CompositionError> {
            let canvas = render(&assets, &cover, &text)?;
            save_jpeg(canvas, &output)?;
            Ok(output)
        })
        .await??;

        info!("compose: wrote {}", path.display());
        Ok(path)
    }

    async fn fetch_cover(&self, url: &str) -> Result<Vec<u8>, CompositionError> {
        debug!("compose: downloading cover {}", url);
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

// ── rendering ─────────────────────────────────────────────────────────────────

fn render(assets: &Assets, cover: &[u8], text: &str) -> Result<RgbaImage, CompositionError> {
    let mut canvas = assets
        .background
        .resize_to_fill(CANVAS_WIDTH, CANVAS_HEIGHT, FilterType::Lanczos3)
        .to_rgba8();

    let cover = image::load_from_memory(cover).map_err(CompositionError::Decode)?;
    let cover = flatten_onto_white(&cover.to_rgba8());
    let cover_width = scaled_width(cover.width(), cover.height(), CANVAS_HEIGHT);
    let cover = imageops::resize(&cover, cover_width, CANVAS_HEIGHT, FilterType::Lanczos3);
    let cover_x = (i64::from(CANVAS_WIDTH) - i64::from(cover_width)) / 2;
    imageops::overlay(&mut canvas, &cover, cover_x, 0);

    if let Some(logo) = &assets.station_logo {
        let logo = resize_to_width(logo, STATION_LOGO_WIDTH);
        let x = CANVAS_WIDTH - STATION_LOGO_WIDTH - STATION_LOGO_MARGIN;
        imageops::overlay(&mut canvas, &logo, i64::from(x), i64::from(STATION_LOGO_MARGIN));
    }

    let mut show_height = 0;
    if let Some(logo) = &assets.show_logo {
        let logo = resize_to_width(logo, SHOW_LOGO_WIDTH);
        show_height = logo.height();
        let y = i64::from(CANVAS_HEIGHT) - i64::from(show_height) - i64::from(BOTTOM_PADDING);
        imageops::overlay(&mut canvas, &logo, i64::from(SHOW_LOGO_X), y);
    }

    let scale = PxScale::from(TEXT_PX);
    let (_, text_height) = text_size(scale, &assets.font, text);
    let bar = bar_layout(show_height, text_height);
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(bar.x, bar.y).of_size(bar.width, bar.height),
        BAR_COLOR,
    );
    draw_text_mut(
        &mut canvas,
        TEXT_COLOR,
        bar.text_x,
        bar.text_y,
        scale,
        &assets.font,
        text,
    );

    Ok(canvas)
}

fn save_jpeg(canvas: RgbaImage, path: &Path) -> Result<(), CompositionError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut writer = BufWriter::new(std::fs::File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(())
}

fn resize_to_width(img: &DynamicImage, width: u32) -> RgbaImage {
    let height = scaled_height(img.width(), img.height(), width);
    imageops::resize(&img.to_rgba8(), width, height, FilterType::Lanczos3)
}

/// Composite transparent pixels onto white, leaving an opaque image.
fn flatten_onto_white(img: &RgbaImage) -> RgbaImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let blend = |c: u8| -> u8 {
            let a = u32::from(a);
            ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8
        };
        *pixel = Rgba([blend(r), blend(g), blend(b), 0xFF]);
    }
    out
}

fn scaled_width(width: u32, height: u32, target_height: u32) -> u32 {
    let w = u64::from(width) * u64::from(target_height) / u64::from(height.max(1));
    (w as u32).max(1)
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let h = u64::from(height) * u64::from(target_width) / u64::from(width.max(1));
    (h as u32).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BarLayout {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    text_x: i32,
    text_y: i32,
}

/// Red bar right of the show logo, vertically centred on it. Without a show
/// logo the bar centres on the logo's bottom line.
fn bar_layout(show_logo_height: u32, text_height: u32) -> BarLayout {
    let height = text_height + 2 * BAR_PADDING_Y;
    let logo_y = CANVAS_HEIGHT as i32 - show_logo_height as i32 - BOTTOM_PADDING as i32;
    let y = logo_y + (show_logo_height as i32 - height as i32) / 2;
    let x = SHOW_LOGO_X + SHOW_LOGO_WIDTH + BAR_GAP;
    BarLayout {
        x: x as i32,
        y,
        width: CANVAS_WIDTH - x,
        height,
        text_x: (x + TEXT_PADDING_X) as i32,
        text_y: y + BAR_PADDING_Y as i32,
    }
}
