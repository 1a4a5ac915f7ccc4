//! Preview rendering.
//!
//! A [`Renderer`] turns a `(target, width, height, quality)` request into an
//! encoded image. The scheduling and caching layers only see this trait, so
//! any backend (software rasterizer, headless GPU surface, remote image
//! service) can sit behind it.
//!
//! # Raster Renderer
//!
//! [`RasterRenderer`] is the software backend. It allocates an RGB surface,
//! dispatches by target kind to a registered [`SurfaceDrawer`], and encodes
//! the surface as JPEG:
//!
//! ```text
//! RenderRequest ──► allocate surface ──► SurfaceDrawer (by kind) ──► JPEG ──► fingerprint
//!                                    └─► placeholder (no drawer)
//! ```
//!
//! Kinds without a drawer get the deterministic placeholder instead of an
//! error, so caching and UI keep working while new kinds are rolled out.
//!
//! # Error Classification
//!
//! - [`RenderError::RenderingUnavailable`]: no surface could be allocated
//! - [`RenderError::Transient`] / [`RenderError::Timeout`]: retried by the queue
//! - [`RenderError::Permanent`]: reported immediately

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::error::RenderError;

use super::target::{PreviewTarget, TargetKindTag};

/// Largest surface edge the raster renderer will allocate.
pub const MAX_SURFACE_DIMENSION: u32 = 4096;

/// Number of digest bytes kept in a fingerprint (16 hex characters).
const FINGERPRINT_BYTES: usize = 8;

const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([229, 231, 235]);
const PLACEHOLDER_FRAME: Rgb<u8> = Rgb([156, 163, 175]);

// =============================================================================
// Request / Response
// =============================================================================

/// Parameters for a single render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub target: PreviewTarget,
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

/// An encoded preview image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    /// Encoded JPEG bytes
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Fingerprint of `data`
    pub content_hash: String,
}

impl RenderedImage {
    /// Wrap encoded bytes, computing the fingerprint.
    pub fn new(data: Bytes, width: u32, height: u32) -> Self {
        let content_hash = fingerprint(&data);
        Self {
            data,
            width,
            height,
            content_hash,
        }
    }
}

// =============================================================================
// Renderer Trait
// =============================================================================

/// Turns a preview request into an encoded image.
///
/// Implementations must be safe to call concurrently and must not keep
/// target-specific state between calls.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedImage, RenderError>;
}

#[async_trait]
impl<R: Renderer + ?Sized> Renderer for Arc<R> {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedImage, RenderError> {
        (**self).render(request).await
    }
}

/// Draws one kind of target into an RGB surface.
///
/// The surface arrives already sized to the request; drawers should fill it
/// completely.
#[async_trait]
pub trait SurfaceDrawer: Send + Sync {
    async fn draw(&self, target: &PreviewTarget, surface: &mut RgbImage)
        -> Result<(), RenderError>;
}

// =============================================================================
// Raster Renderer
// =============================================================================

/// Software renderer dispatching to per-kind drawers.
///
/// # Example
///
/// ```
/// use scene_preview::preview::{RasterRenderer, Renderer, RenderRequest, PreviewTarget, SwatchDrawer, TargetKindTag};
///
/// #[tokio::main]
/// async fn main() {
///     let renderer = RasterRenderer::new().with_drawer(TargetKindTag::Slide, SwatchDrawer);
///
///     let request = RenderRequest {
///         target: PreviewTarget::slide("s1", "intro"),
///         width: 160,
///         height: 120,
///         quality: 75,
///     };
///     let image = renderer.render(&request).await.unwrap();
///     assert_eq!(&image.data[..2], &[0xFF, 0xD8]);
/// }
/// ```
#[derive(Clone, Default)]
pub struct RasterRenderer {
    drawers: HashMap<TargetKindTag, Arc<dyn SurfaceDrawer>>,
}

impl RasterRenderer {
    /// Create a renderer with no drawers; every target renders as placeholder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the drawer used for `tag`, replacing any previous one.
    pub fn with_drawer(mut self, tag: TargetKindTag, drawer: impl SurfaceDrawer + 'static) -> Self {
        self.drawers.insert(tag, Arc::new(drawer));
        self
    }

    /// Whether a drawer is registered for `tag`.
    pub fn supports(&self, tag: TargetKindTag) -> bool {
        self.drawers.contains_key(&tag)
    }
}

#[async_trait]
impl Renderer for RasterRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedImage, RenderError> {
        let mut surface = allocate_surface(request.width, request.height)?;

        match self.drawers.get(&request.target.kind.tag()) {
            Some(drawer) => drawer.draw(&request.target, &mut surface).await?,
            None => paint_placeholder(&mut surface),
        }

        let data = encode_jpeg(&surface, request.quality)?;
        Ok(RenderedImage::new(data, request.width, request.height))
    }
}

/// Deterministic drawer filling the surface with a target-derived colour.
///
/// Useful as a stand-in backend: every target gets a stable, distinct
/// swatch with a darker header band.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwatchDrawer;

#[async_trait]
impl SurfaceDrawer for SwatchDrawer {
    async fn draw(
        &self,
        target: &PreviewTarget,
        surface: &mut RgbImage,
    ) -> Result<(), RenderError> {
        let digest = Sha256::digest(target.fingerprint().as_bytes());
        let base = Rgb([digest[0], digest[1], digest[2]]);
        let band = Rgb([digest[0] / 2, digest[1] / 2, digest[2] / 2]);
        let band_height = (surface.height() / 5).max(1);

        for (_, y, pixel) in surface.enumerate_pixels_mut() {
            *pixel = if y < band_height { band } else { base };
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Short hex fingerprint of `bytes` (truncated SHA-256).
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Render the placeholder shown for unsupported targets and failed previews.
///
/// The output depends only on the arguments.
pub fn render_placeholder(width: u32, height: u32, quality: u8) -> Result<RenderedImage, RenderError> {
    let mut surface = allocate_surface(width, height)?;
    paint_placeholder(&mut surface);
    let data = encode_jpeg(&surface, quality)?;
    Ok(RenderedImage::new(data, width, height))
}

fn allocate_surface(width: u32, height: u32) -> Result<RgbImage, RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::unavailable(format!(
            "cannot allocate {}x{} surface",
            width, height
        )));
    }
    if width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
        return Err(RenderError::unavailable(format!(
            "{}x{} exceeds maximum surface dimension {}",
            width, height, MAX_SURFACE_DIMENSION
        )));
    }
    Ok(RgbImage::new(width, height))
}

/// Neutral background with an inset frame.
fn paint_placeholder(surface: &mut RgbImage) {
    let (width, height) = surface.dimensions();
    let inset_x = width / 10;
    let inset_y = height / 10;
    let (left, right) = (inset_x, width.saturating_sub(inset_x + 1));
    let (top, bottom) = (inset_y, height.saturating_sub(inset_y + 1));

    for (x, y, pixel) in surface.enumerate_pixels_mut() {
        let on_vertical = (x == left || x == right) && (top..=bottom).contains(&y);
        let on_horizontal = (y == top || y == bottom) && (left..=right).contains(&x);
        *pixel = if on_vertical || on_horizontal {
            PLACEHOLDER_FRAME
        } else {
            PLACEHOLDER_BACKGROUND
        };
    }
}

fn encode_jpeg(surface: &RgbImage, quality: u8) -> Result<Bytes, RenderError> {
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));

    encoder
        .encode_image(surface)
        .map_err(|e| RenderError::permanent(format!("JPEG encoding failed: {}", e)))?;

    Ok(Bytes::from(output))
}

// =============================================================================
// Tests
// =============================================================================
