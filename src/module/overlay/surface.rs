//! Image-backed surface.
//!
//! Rasterizes the overlay into an RGB canvas and optionally writes each finished
//! tick to disk, replacing the previous file atomically.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use image::{ImageFormat, Rgb, RgbImage};

use super::{font, OverlayStyle, Surface};

// Placeholder canvas size when no frame was ever drawn.
const PLACEHOLDER_SIZE: (u32, u32) = (640, 480);
const PLACEHOLDER_BACKGROUND: Rgb<u8> = Rgb([31, 41, 55]);
const PLACEHOLDER_TEXT: Rgb<u8> = Rgb([248, 113, 113]);
const TEXT_SCALE: u32 = 2;

/// A caption as it was requested, kept for consumers that want the text itself.
#[derive(Debug, Clone, PartialEq)]
pub struct TextMark {
    pub text: String,
    pub x: f32,
    pub y: f32,
}

/// RGB canvas surface.
///
pub struct ImageSurface {
    canvas: RgbImage,
    labels: Vec<TextMark>,
    placeholder: bool,
    mounted: bool,
    output: Option<PathBuf>,
}

impl ImageSurface {
    /// `output` is where `present` writes the composited frame, if anywhere.
    pub fn new(output: Option<PathBuf>) -> Self {
        Self {
            canvas: RgbImage::new(0, 0),
            labels: Vec::new(),
            placeholder: false,
            mounted: true,
            output,
        }
    }

    pub fn canvas(&self) -> &RgbImage {
        &self.canvas
    }

    /// Captions drawn since the last frame.
    pub fn labels(&self) -> &[TextMark] {
        &self.labels
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Detach from the display; the renderer skips this surface afterwards.
    pub fn unmount(&mut self) {
        self.mounted = false;
    }

    /// Fill `[x0, x1) x [y0, y1)`, clipped to the canvas.
    fn fill_rect(&mut self, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgb<u8>) {
        let (w, h) = (self.canvas.width() as i64, self.canvas.height() as i64);
        let (x0, x1) = (x0.clamp(0, w), x1.clamp(0, w));
        let (y0, y1) = (y0.clamp(0, h), y1.clamp(0, h));
        for y in y0..y1 {
            for x in x0..x1 {
                self.canvas.put_pixel(x as u32, y as u32, color);
            }
        }
    }
}

impl Surface for ImageSurface {
    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.canvas.dimensions() != (width, height) {
            self.canvas = RgbImage::new(width, height);
        }
        self.labels.clear();
    }

    fn draw_frame(&mut self, frame: &RgbImage) {
        if self.canvas.dimensions() == frame.dimensions() {
            self.canvas.copy_from_slice(frame.as_raw());
        } else {
            self.canvas = frame.clone();
        }
        self.labels.clear();
        self.placeholder = false;
    }

    /// Stroke centred on the box edges; a zero-width or zero-height box draws a line.
    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, style: &OverlayStyle) {
        let lw = style.line_width.max(1) as i64;
        let (lo, hi) = (lw / 2, lw - lw / 2);
        let (x0, y0) = (x.round() as i64, y.round() as i64);
        let (x1, y1) = ((x + width).round() as i64, (y + height).round() as i64);
        // top, bottom, left, right
        self.fill_rect(x0 - lo, y0 - lo, x1 + hi, y0 + hi, style.color);
        self.fill_rect(x0 - lo, y1 - lo, x1 + hi, y1 + hi, style.color);
        self.fill_rect(x0 - lo, y0 - lo, x0 + hi, y1 + hi, style.color);
        self.fill_rect(x1 - lo, y0 - lo, x1 + hi, y1 + hi, style.color);
    }

    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &OverlayStyle) {
        let top = y.round() as i64 - (font::GLYPH_HEIGHT * TEXT_SCALE) as i64;
        font::draw_text(
            &mut self.canvas,
            text,
            x.round() as i64,
            top,
            TEXT_SCALE,
            style.color,
        );
        self.labels.push(TextMark {
            text: text.to_string(),
            x,
            y,
        });
    }

    fn show_placeholder(&mut self) {
        if self.canvas.width() == 0 || self.canvas.height() == 0 {
            self.canvas = RgbImage::new(PLACEHOLDER_SIZE.0, PLACEHOLDER_SIZE.1);
        }
        let (w, h) = self.canvas.dimensions();
        self.fill_rect(0, 0, w as i64, h as i64, PLACEHOLDER_BACKGROUND);
        let text = "CAMERA OFFLINE";
        let x = (w as i64 - font::text_width(text, TEXT_SCALE) as i64) / 2;
        let y = (h as i64 - (font::GLYPH_HEIGHT * TEXT_SCALE) as i64) / 2;
        font::draw_text(&mut self.canvas, text, x, y, TEXT_SCALE, PLACEHOLDER_TEXT);
        self.labels.clear();
        self.placeholder = true;
    }

    fn present(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let Some(path) = &self.output else {
            return Ok(());
        };
        if self.canvas.width() == 0 || self.canvas.height() == 0 {
            return Ok(());
        }
        let tmp = path.with_extension("tmp");
        self.canvas.save_with_format(&tmp, ImageFormat::Jpeg)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
