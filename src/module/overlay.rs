//! Overlay Rendering
//!
//! Composites the live video frame and the current detection boxes on a surface.
//! The renderer reads the freshest frame straight from the media source on each
//! refresh, so video keeps moving while detection runs at its slower cadence.

pub mod font;
pub mod surface;

use std::error::Error;

use image::{Rgb, RgbImage};

use crate::module::util::conf;
use crate::module::vision::detector::Detection;

/// Stroke and caption settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStyle {
    pub color: Rgb<u8>,
    pub line_width: u32,
    pub label_dx: f32,
    pub label_dy: f32,
}

impl OverlayStyle {
    pub fn from_conf(conf: &conf::Overlay) -> Self {
        Self {
            line_width: conf.line_width,
            label_dx: conf.label_dx as f32,
            label_dy: conf.label_dy as f32,
            ..Self::default()
        }
    }
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            color: Rgb([0, 255, 0]), // lime
            line_width: 3,
            label_dx: 5.0,
            label_dy: 25.0,
        }
    }
}

/// Something the overlay can be drawn on.
///
/// Coordinates are surface pixels. Implementations clip anything off the surface.
pub trait Surface {
    /// Whether a visible target is attached. Unmounted surfaces are skipped.
    fn is_mounted(&self) -> bool;
    fn resize(&mut self, width: u32, height: u32);
    fn draw_frame(&mut self, frame: &RgbImage);
    fn stroke_rect(&mut self, x: f32, y: f32, width: f32, height: f32, style: &OverlayStyle);
    /// `y` is the text baseline.
    fn fill_text(&mut self, text: &str, x: f32, y: f32, style: &OverlayStyle);
    /// Shown while there is no video.
    fn show_placeholder(&mut self);
    /// Hand the finished tick to the display.
    fn present(&mut self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// What a render tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered {
    /// No surface mounted.
    Skipped,
    /// No video available.
    Placeholder,
    /// Video frame with this many boxes.
    Frame(usize),
}

/// Draws one overlay per refresh tick.
///
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    /// Render one tick.
    ///
    /// The surface follows the frame size every tick. Boxes are drawn in batch order,
    /// each with its `label confidence%` caption at the box's top-left corner.
    pub fn render<S: Surface + ?Sized>(
        &self,
        surface: &mut S,
        frame: Option<&RgbImage>,
        detections: &[Detection],
    ) -> Rendered {
        if !surface.is_mounted() {
            return Rendered::Skipped;
        }
        let rendered = match frame {
            None => {
                surface.show_placeholder();
                Rendered::Placeholder
            }
            Some(frame) => {
                surface.resize(frame.width(), frame.height());
                surface.draw_frame(frame);
                for det in detections {
                    surface.stroke_rect(det.x1, det.y1, det.width(), det.height(), &self.style);
                    surface.fill_text(
                        &det.caption(),
                        det.x1 + self.style.label_dx,
                        det.y1 + self.style.label_dy,
                        &self.style,
                    );
                }
                Rendered::Frame(detections.len())
            }
        };
        if let Err(e) = surface.present() {
            log::warn!("Overlay present failed: {}", e);
        }
        rendered
    }
}
