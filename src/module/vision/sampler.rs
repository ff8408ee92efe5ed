//! Frame Sampling
//!
//! Snapshots the freshest camera frame and compresses it for upload.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, ImageResult, RgbImage};

use super::camera::MediaSource;
use crate::module::define;
use crate::module::util::conf;

/// Upload encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy JPEG. `None` keeps the encoder's default quality.
    Jpeg(Option<u8>),
    Png,
}

impl Encoding {
    /// Build from the `[sampler]` section. Unknown formats fall back to JPEG.
    pub fn from_conf(conf: &conf::Sampler) -> Self {
        match conf.format.to_lowercase().as_str() {
            "png" => Self::Png,
            "jpeg" | "jpg" => Self::Jpeg(conf.quality.map(|q| q.clamp(1, 100))),
            other => {
                log::warn!("Unknown sampler format {:?}, using jpeg", other);
                Self::Jpeg(conf.quality.map(|q| q.clamp(1, 100)))
            }
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg(_) => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg(_) => "jpg",
            Self::Png => "png",
        }
    }

    /// File name announced in the upload, e.g. `frame.jpg`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", define::endpoint::FILE_STEM, self.extension())
    }
}

/// A compressed frame ready to be posted.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
    pub width: u32,
    pub height: u32,
}

/// An off-screen copy of one camera frame at its native resolution.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub image: RgbImage,
}

impl Snapshot {
    /// Compress the snapshot.
    pub fn encode(&self, encoding: Encoding) -> ImageResult<EncodedImage> {
        let (width, height) = self.image.dimensions();
        let mut bytes = Vec::new();
        match encoding {
            Encoding::Jpeg(Some(quality)) => {
                JpegEncoder::new_with_quality(&mut bytes, quality).encode(
                    self.image.as_raw(),
                    width,
                    height,
                    ColorType::Rgb8,
                )?;
            }
            Encoding::Jpeg(None) => {
                JpegEncoder::new(&mut bytes).encode(
                    self.image.as_raw(),
                    width,
                    height,
                    ColorType::Rgb8,
                )?;
            }
            Encoding::Png => {
                PngEncoder::new(Cursor::new(&mut bytes)).write_image(
                    self.image.as_raw(),
                    width,
                    height,
                    ColorType::Rgb8,
                )?;
            }
        }
        Ok(EncodedImage {
            bytes,
            encoding,
            width,
            height,
        })
    }
}

/// Takes snapshots from a media source.
///
pub struct FrameSampler {
    source: Arc<MediaSource>,
    dimensions: Option<(u32, u32)>,
}

impl FrameSampler {
    pub fn new(source: Arc<MediaSource>) -> Self {
        Self {
            source,
            dimensions: None,
        }
    }

    /// Copy the freshest frame into an off-screen buffer.
    ///
    /// Returns `None` while the source has no decodable frame. The buffer always has
    /// the frame's native resolution; a mode change re-sizes it, never crops or stretches.
    pub fn snapshot(&mut self) -> Option<Snapshot> {
        let frame = self.source.latest()?;
        let (width, height) = frame.dimensions();
        match self.dimensions {
            Some(dims) if dims != (width, height) => {
                log::info!("Source resolution changed {:?} -> {:?}", dims, (width, height));
            }
            None => log::debug!("First snapshot at {}x{}", width, height),
            _ => (),
        }
        self.dimensions = Some((width, height));
        let mut buffer = RgbImage::new(width, height);
        buffer.copy_from_slice(frame.as_raw());
        Some(Snapshot { image: buffer })
    }

    /// Dimensions of the last snapshot buffer.
    pub fn buffer_dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::state::DetectionStore;
    use crate::module::vision::camera::tests::ScriptedDevice;
    use image::Rgb;
    use std::time::Duration;

    fn sampler_conf(format: &str, quality: Option<u8>) -> conf::Sampler {
        conf::Sampler {
            interval_ms: 500,
            format: format.to_string(),
            quality,
        }
    }

    fn wait_for_frame(source: &MediaSource) {
        for _ in 0..200 {
            if source.latest().is_some() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("no frame arrived");
    }

    #[test]
    fn snapshot_skips_until_frames_arrive() {
        let mut sampler = FrameSampler::new(Arc::new(MediaSource::unavailable()));
        assert!(sampler.snapshot().is_none());
        assert_eq!(sampler.buffer_dimensions(), None);
    }

    #[test]
    fn snapshot_follows_resolution_changes() {
        let store = DetectionStore::new();
        let device = ScriptedDevice::new(vec![RgbImage::from_pixel(4, 3, Rgb([1, 2, 3]))]);
        let source = Arc::new(MediaSource::acquire(move || Ok(device), &store).unwrap());
        wait_for_frame(&source);
        let mut sampler = FrameSampler::new(source.clone());
        let snap = sampler.snapshot().unwrap();
        assert_eq!(snap.image.dimensions(), (4, 3));
        assert_eq!(snap.image.get_pixel(3, 2), &Rgb([1, 2, 3]));

        source.publish(RgbImage::from_pixel(8, 6, Rgb([9, 9, 9])));
        let snap = sampler.snapshot().unwrap();
        assert_eq!(snap.image.dimensions(), (8, 6));
        assert_eq!(sampler.buffer_dimensions(), Some((8, 6)));
        source.release();
    }

    #[test]
    fn encode_jpeg_keeps_dimensions() {
        let snap = Snapshot {
            image: RgbImage::from_pixel(32, 16, Rgb([200, 10, 10])),
        };
        for encoding in [Encoding::Jpeg(None), Encoding::Jpeg(Some(50))] {
            let encoded = snap.encode(encoding).unwrap();
            assert_eq!(&encoded.bytes[..2], &[0xff, 0xd8]);
            let decoded = image::load_from_memory(&encoded.bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 16));
        }
    }

    #[test]
    fn encode_png_is_lossless() {
        let snap = Snapshot {
            image: RgbImage::from_pixel(5, 7, Rgb([1, 2, 3])),
        };
        let encoded = snap.encode(Encoding::Png).unwrap();
        assert_eq!(encoded.encoding.file_name(), "frame.png");
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_rgb8();
        assert_eq!(decoded, snap.image);
    }

    #[test]
    fn encoding_from_conf() {
        assert_eq!(Encoding::from_conf(&sampler_conf("jpeg", None)), Encoding::Jpeg(None));
        assert_eq!(
            Encoding::from_conf(&sampler_conf("JPG", Some(0))),
            Encoding::Jpeg(Some(1))
        );
        assert_eq!(Encoding::from_conf(&sampler_conf("png", None)), Encoding::Png);
        assert_eq!(Encoding::from_conf(&sampler_conf("webp", None)), Encoding::Jpeg(None));
        assert_eq!(Encoding::Jpeg(None).file_name(), "frame.jpg");
        assert_eq!(Encoding::Jpeg(None).mime(), "image/jpeg");
    }
}
