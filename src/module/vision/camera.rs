//! Camera Functions
//!
//! The media source keeps exactly one decoded frame: the freshest one. A capture
//! thread overwrites it as the device delivers; readers pull it whenever they like.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{ImageFormat, RgbImage};
use rscam::{Camera, Config};

use crate::module::state::{DetectionStore, PipelineError};
use crate::module::util::conf;

/// Boxed device failure, kept opaque outside this module.
pub type DeviceError = Box<dyn Error + Send + Sync>;

/// A blocking frame producer.
///
/// `Ok(None)` means no new frame is ready yet; the capture thread asks again.
pub trait CaptureDevice {
    fn capture(&mut self) -> Result<Option<RgbImage>, DeviceError>;
}

/// Represents a V4L2 camera configuration and capture functionality.
///
pub struct V4l2Camera {
    cap: Camera,     // The camera instance for capturing frames.
    format: [u8; 4], // Negotiated pixel format.
}

impl V4l2Camera {
    /// Opens and starts a V4L2 camera with the specified settings.
    ///
    /// # Arguments
    ///
    /// * `conf` - The `[camera]` section.
    ///
    pub fn open(conf: &conf::Camera) -> Result<Self, DeviceError> {
        let format: [u8; 4] = conf
            .format
            .as_bytes()
            .try_into()
            .map_err(|_| format!("pixel format {:?} is not a fourcc", conf.format))?;
        if &format != b"MJPG" && &format != b"RGB3" {
            return Err(format!("unsupported pixel format {:?}", conf.format).into());
        }

        let mut cap = Camera::new(&conf.device)?;
        // Configure and start the camera with specified settings.
        cap.start(&Config {
            interval: (1, conf.fps.max(1)),
            resolution: (conf.width, conf.height),
            format: &format,
            nbuffers: 1,
            ..Default::default()
        })?;
        log::info!(
            "Camera {} started at {}x{} {}",
            conf.device,
            conf.width,
            conf.height,
            conf.format
        );

        Ok(Self { cap, format })
    }
}

impl CaptureDevice for V4l2Camera {
    /// Captures a frame from the camera and decodes it to RGB.
    ///
    /// Only a failing device is an error. A frame that does not decode is skipped.
    fn capture(&mut self) -> Result<Option<RgbImage>, DeviceError> {
        let frame = self.cap.capture()?;
        let (width, height) = frame.resolution;
        Ok(decode_frame(&self.format, width, height, &frame[..]))
    }
}

/// Decode one raw frame, or `None` if it is corrupt or short.
pub fn decode_frame(format: &[u8; 4], width: u32, height: u32, raw: &[u8]) -> Option<RgbImage> {
    match format {
        b"MJPG" => match image::load_from_memory_with_format(raw, ImageFormat::Jpeg) {
            Ok(image) => Some(image.to_rgb8()),
            Err(e) => {
                log::warn!("Skipping undecodable MJPG frame: {}", e);
                None
            }
        },
        _ => {
            let image = RgbImage::from_raw(width, height, raw.to_vec());
            if image.is_none() {
                log::warn!("Skipping short RGB3 frame ({} bytes)", raw.len());
            }
            image
        }
    }
}

/// Freshest-frame slot shared by the capture thread and readers.
type FrameSlot = Arc<Mutex<Option<Arc<RgbImage>>>>;

/// A live video stream.
///
pub struct MediaSource {
    latest: FrameSlot,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSource {
    /// Request the capture device and start streaming from it.
    ///
    /// `open` runs on the capture thread, so the device never has to cross threads.
    /// A failure to open is logged and reported as `CameraAccessDenied`; the store
    /// ends up `Disconnected` with that error set. No retry happens here.
    pub fn acquire<F, D>(open: F, store: &DetectionStore) -> Result<Self, PipelineError>
    where
        F: FnOnce() -> Result<D, DeviceError> + Send + 'static,
        D: CaptureDevice + 'static,
    {
        store.camera_connecting();

        let latest: FrameSlot = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel::<Result<(), String>>();

        let slot = latest.clone();
        let flag = running.clone();
        let store_clone = store.clone();
        let spawned = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                let mut device = match open() {
                    Ok(device) => {
                        let _ = tx.send(Ok(()));
                        device
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.to_string()));
                        return;
                    }
                };
                capture_loop(&mut device, &slot, &flag, &store_clone);
            });
        let worker = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("Can't spawn capture thread: {}", e);
                store.camera_failed();
                return Err(PipelineError::CameraAccessDenied);
            }
        };

        match rx.recv() {
            Ok(Ok(())) => Ok(Self {
                latest,
                running,
                worker: Mutex::new(Some(worker)),
            }),
            Ok(Err(e)) => {
                log::error!("Camera access denied: {}", e);
                store.camera_failed();
                let _ = worker.join();
                Err(PipelineError::CameraAccessDenied)
            }
            Err(_) => {
                log::error!("Capture thread ended before opening the camera");
                store.camera_failed();
                Err(PipelineError::CameraAccessDenied)
            }
        }
    }

    /// A source that never produces frames, e.g. after the camera was denied.
    pub fn unavailable() -> Self {
        Self {
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// The freshest decoded frame, or `None` before the first one.
    pub fn latest(&self) -> Option<Arc<RgbImage>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Native dimensions of the freshest frame.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.latest().map(|f| f.dimensions())
    }

    /// Whether decodable frames are available.
    pub fn is_ready(&self) -> bool {
        self.latest().is_some()
    }

    /// Replace the freshest frame.
    pub fn publish(&self, frame: RgbImage) {
        publish(&self.latest, frame);
    }

    /// Stop the capture thread. The last frame stays readable.
    ///
    /// After a device failure there is no last frame; `latest` returns `None`.
    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::warn!("Capture thread panicked");
            }
            log::info!("Camera released");
        }
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn publish(slot: &FrameSlot, frame: RgbImage) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
}

/// Pull frames until released or the device fails.
fn capture_loop<D: CaptureDevice>(
    device: &mut D,
    slot: &FrameSlot,
    running: &AtomicBool,
    store: &DetectionStore,
) {
    log::debug!("Capture Thread Started");
    let mut first = true;
    while running.load(Ordering::SeqCst) {
        match device.capture() {
            Ok(Some(frame)) => {
                publish(slot, frame);
                if first {
                    first = false;
                    store.camera_connected();
                }
            }
            Ok(None) => thread::sleep(Duration::from_millis(5)),
            Err(e) => {
                log::error!("Camera device error: {}", e);
                // a dead device has no video; drop the frozen frame
                *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
                store.camera_failed();
                break;
            }
        }
    }
    log::debug!("Capture Thread Exit Loop");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::module::state::ConnectionStatus;
    use image::Rgb;
    use std::collections::VecDeque;

    enum Step {
        Frame(RgbImage),
        Skip,
        Fail,
    }

    /// Plays back a fixed list of steps, then idles.
    pub(crate) struct ScriptedDevice {
        script: VecDeque<Step>,
    }

    impl ScriptedDevice {
        pub(crate) fn new(frames: Vec<RgbImage>) -> Self {
            Self {
                script: frames.into_iter().map(Step::Frame).collect(),
            }
        }

        /// The frames, then the device fails.
        pub(crate) fn failing_after(frames: Vec<RgbImage>) -> Self {
            let mut device = Self::new(frames);
            device.script.push_back(Step::Fail);
            device
        }

        /// The frames with an undecodable one between the first and the rest.
        pub(crate) fn with_corrupt_frame(frames: Vec<RgbImage>) -> Self {
            let mut device = Self::new(frames);
            device.script.insert(1usize.min(device.script.len()), Step::Skip);
            device
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn capture(&mut self) -> Result<Option<RgbImage>, DeviceError> {
            match self.script.pop_front() {
                Some(Step::Frame(frame)) => Ok(Some(frame)),
                Some(Step::Skip) => Ok(decode_frame(b"MJPG", 0, 0, b"\xff\xd8 not a jpeg")),
                Some(Step::Fail) => Err("device unplugged".into()),
                None => {
                    thread::sleep(Duration::from_millis(2));
                    Ok(None)
                }
            }
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..400 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn acquire_connects_on_first_frame() {
        let store = DetectionStore::new();
        let device = ScriptedDevice::new(vec![RgbImage::from_pixel(6, 4, Rgb([0, 255, 0]))]);
        let source = MediaSource::acquire(move || Ok(device), &store).unwrap();
        assert!(wait_until(|| source.is_ready()));
        assert!(wait_until(|| store.snapshot().status == ConnectionStatus::Connected));
        assert_eq!(source.dimensions(), Some((6, 4)));
        assert_eq!(store.snapshot().error, None);
        source.release();
        // the last frame stays readable after release
        assert!(source.latest().is_some());
    }

    #[test]
    fn denied_camera_stays_disconnected() {
        let store = DetectionStore::new();
        let res = MediaSource::acquire(
            || -> Result<ScriptedDevice, DeviceError> { Err("permission denied".into()) },
            &store,
        );
        assert!(matches!(res, Err(PipelineError::CameraAccessDenied)));
        let snap = store.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.error, Some(PipelineError::CameraAccessDenied));
    }

    #[test]
    fn device_error_disconnects() {
        let store = DetectionStore::new();
        let device =
            ScriptedDevice::failing_after(vec![RgbImage::from_pixel(2, 2, Rgb([1, 1, 1]))]);
        let source = MediaSource::acquire(move || Ok(device), &store).unwrap();
        assert!(wait_until(|| store.snapshot().error.is_some()));
        let snap = store.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.error, Some(PipelineError::CameraAccessDenied));
        source.release();
    }

    #[test]
    fn failed_device_leaves_no_video() {
        use crate::module::overlay::tests::RecordingSurface;
        use crate::module::overlay::{OverlayRenderer, OverlayStyle, Rendered};
        use crate::module::vision::detector::Detection;
        use crate::module::vision::sampler::FrameSampler;

        let store = DetectionStore::new();
        let device =
            ScriptedDevice::failing_after(vec![RgbImage::from_pixel(8, 8, Rgb([9, 9, 9]))]);
        let source = Arc::new(MediaSource::acquire(move || Ok(device), &store).unwrap());
        assert!(wait_until(|| store.snapshot().error.is_some()));
        assert!(source.latest().is_none());

        let mut sampler = FrameSampler::new(source.clone());
        assert!(sampler.snapshot().is_none());

        let renderer = OverlayRenderer::new(OverlayStyle::default());
        let mut surface = RecordingSurface::new();
        let det = Detection::new("person", 87.3, [1.0, 1.0, 4.0, 4.0], None).unwrap();
        let frame = source.latest();
        assert_eq!(
            renderer.render(&mut surface, frame.as_deref(), &[det]),
            Rendered::Placeholder
        );
        source.release();
    }

    #[test]
    fn corrupt_frame_is_skipped_not_fatal() {
        let store = DetectionStore::new();
        let device = ScriptedDevice::with_corrupt_frame(vec![
            RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])),
            RgbImage::from_pixel(3, 3, Rgb([2, 2, 2])),
        ]);
        let source = MediaSource::acquire(move || Ok(device), &store).unwrap();
        assert!(wait_until(|| source.dimensions() == Some((3, 3))));
        let snap = store.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Connected);
        assert_eq!(snap.error, None);
        source.release();
    }

    #[test]
    fn decode_frame_rejects_bad_input() {
        assert!(decode_frame(b"MJPG", 4, 4, b"garbage").is_none());
        assert!(decode_frame(b"RGB3", 4, 4, &[0u8; 10]).is_none());
        let rgb = decode_frame(b"RGB3", 2, 1, &[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([4, 5, 6]));

        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
            .encode(&[128u8; 4 * 4 * 3], 4, 4, image::ColorType::Rgb8)
            .unwrap();
        assert_eq!(decode_frame(b"MJPG", 0, 0, &jpeg).unwrap().dimensions(), (4, 4));
    }

    #[test]
    fn unavailable_source_has_no_frames() {
        let source = MediaSource::unavailable();
        assert!(!source.is_ready());
        assert_eq!(source.dimensions(), None);
        source.release();
    }

    #[test]
    fn bad_fourcc_is_rejected_before_opening() {
        let mut conf = crate::module::util::conf::Config::default().camera;
        conf.format = "H264X".to_string();
        assert!(V4l2Camera::open(&conf).is_err());
        conf.format = "YUYV".to_string();
        assert!(V4l2Camera::open(&conf).is_err());
    }
}
