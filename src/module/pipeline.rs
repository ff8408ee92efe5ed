//! Provide Loops for the Pipeline.
//!
//! Three independent timers drive the client:
//! - sampling: snapshot a frame and start a detection cycle,
//! - refresh: composite video and overlay,
//! - status: publish the panel lines.
//!
//! Detection cycles run as their own tasks and are never awaited by the sampler.
//! Each carries a sequence number; the store only accepts a completion that is newer
//! than every completion before it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::module::overlay::{OverlayRenderer, OverlayStyle, Surface};
use crate::module::state::{Commit, DetectionStore};
use crate::module::status;
use crate::module::util::conf::Config;
use crate::module::vision::camera::MediaSource;
use crate::module::vision::detector::{DetectionBatch, DetectionService};
use crate::module::vision::sampler::{Encoding, FrameSampler, Snapshot};

/// What the sampler does while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Keep issuing; late completions older than the newest one are dropped.
    DiscardStale,
    /// Skip ticks until the in-flight request completes.
    Coalesce,
}

impl OverlapPolicy {
    /// Convert a config string to a policy. Unknown values keep the default.
    pub fn from_string(s: &str) -> OverlapPolicy {
        match s {
            "coalesce" => OverlapPolicy::Coalesce,
            "discard_stale" => OverlapPolicy::DiscardStale,
            other => {
                log::warn!("Unknown overlap policy {:?}, using discard_stale", other);
                OverlapPolicy::DiscardStale
            }
        }
    }
}

/// Timing and drawing settings for one pipeline.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sample_interval: Duration,
    pub refresh_interval: Duration,
    pub status_interval: Duration,
    pub encoding: Encoding,
    pub overlap: OverlapPolicy,
    pub style: OverlayStyle,
}

impl Settings {
    pub fn from_conf(conf: &Config) -> Self {
        Self {
            sample_interval: Duration::from_millis(conf.sampler.interval_ms.max(1)),
            refresh_interval: Duration::from_secs_f64(1.0 / conf.overlay.refresh_hz.max(1) as f64),
            status_interval: Duration::from_millis(conf.status.interval_ms.max(1)),
            encoding: Encoding::from_conf(&conf.sampler),
            overlap: OverlapPolicy::from_string(&conf.detector.overlap),
            style: OverlayStyle::from_conf(&conf.overlay),
        }
    }
}

/// One sampled frame on its way to the detector.
#[derive(Debug)]
pub struct DetectionRequest {
    pub seq: u64,
    pub snapshot: Snapshot,
}

/// Running pipeline bound to one view.
///
pub struct Pipeline {
    store: DetectionStore,
    source: Arc<MediaSource>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the sampling, refresh and status timers.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start<C, S>(
        settings: Settings,
        source: Arc<MediaSource>,
        store: DetectionStore,
        service: C,
        surface: S,
    ) -> Self
    where
        C: DetectionService,
        S: Surface + Send + 'static,
    {
        let service = Arc::new(service);
        let sampler = tokio::spawn(sampling_loop(
            FrameSampler::new(source.clone()),
            service,
            store.clone(),
            settings.encoding,
            settings.overlap,
            settings.sample_interval,
        ));
        let render = tokio::spawn(render_loop(
            OverlayRenderer::new(settings.style.clone()),
            surface,
            source.clone(),
            store.clone(),
            settings.refresh_interval,
        ));
        let panel = tokio::spawn(status_loop(store.clone(), settings.status_interval));
        log::info!(
            "Pipeline started: sample every {:?}, refresh every {:?}, {:?}",
            settings.sample_interval,
            settings.refresh_interval,
            settings.overlap
        );
        Self {
            store,
            source,
            tasks: vec![sampler, render, panel],
        }
    }

    pub fn store(&self) -> &DetectionStore {
        &self.store
    }

    /// Tear the view down.
    ///
    /// Detaches the store first so no late completion can land, then cancels the
    /// timers and releases the camera. In-flight requests are abandoned, not awaited.
    pub fn teardown(self) {
        self.store.detach();
        for task in &self.tasks {
            task.abort();
        }
        self.source.release();
        log::info!("Pipeline torn down");
    }
}

/// Decrements the in-flight counter when a cycle ends, however it ends.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn sampling_loop<C: DetectionService>(
    mut sampler: FrameSampler,
    service: Arc<C>,
    store: DetectionStore,
    encoding: Encoding,
    overlap: OverlapPolicy,
    period: Duration,
) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut seq: u64 = 0;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if overlap == OverlapPolicy::Coalesce && in_flight.load(Ordering::SeqCst) > 0 {
            log::debug!("Request in flight, skipping tick");
            continue;
        }
        let Some(snapshot) = sampler.snapshot() else {
            continue;
        };
        seq += 1;
        let request = DetectionRequest { seq, snapshot };
        let guard = InFlight::enter(&in_flight);
        let service = service.clone();
        let store = store.clone();
        tokio::spawn(async move {
            let _guard = guard;
            run_cycle(request, service.as_ref(), &store, encoding).await;
        });
    }
}

/// Encode, submit and commit one request.
///
/// Returns `None` when the frame could not be encoded; the store is not touched then.
pub async fn run_cycle<C: DetectionService + ?Sized>(
    request: DetectionRequest,
    service: &C,
    store: &DetectionStore,
    encoding: Encoding,
) -> Option<Commit> {
    let DetectionRequest { seq, snapshot } = request;
    let encoded = match tokio::task::spawn_blocking(move || snapshot.encode(encoding)).await {
        Ok(Ok(encoded)) => encoded,
        Ok(Err(e)) => {
            log::error!("Frame {} encoding failed: {}", seq, e);
            return None;
        }
        Err(e) => {
            log::error!("Frame {} encoding task failed: {}", seq, e);
            return None;
        }
    };
    let outcome = service.submit(encoded).await;
    let commit = store.commit(seq, outcome);
    match commit {
        Commit::Applied => log::debug!("Cycle {} committed", seq),
        Commit::Stale => log::debug!("Cycle {} completed late, discarded", seq),
        Commit::Detached => log::debug!("Cycle {} completed after teardown", seq),
    }
    Some(commit)
}

/// Inputs of the last drawn tick, compared by identity.
struct Drawn {
    frame: Option<Arc<RgbImage>>,
    detections: Arc<DetectionBatch>,
}

impl Drawn {
    fn matches(&self, frame: &Option<Arc<RgbImage>>, detections: &Arc<DetectionBatch>) -> bool {
        let same_frame = match (&self.frame, frame) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_frame && Arc::ptr_eq(&self.detections, detections)
    }
}

/// Redraw when the frame or the batch changed.
///
/// Compositing and `present` run on the blocking pool; the surface moves there and back.
async fn render_loop<S: Surface + Send + 'static>(
    renderer: OverlayRenderer,
    mut surface: S,
    source: Arc<MediaSource>,
    store: DetectionStore,
    period: Duration,
) {
    let renderer = Arc::new(renderer);
    let mut drawn: Option<Drawn> = None;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let frame = source.latest();
        let detections = store.detections();
        if drawn
            .as_ref()
            .map_or(false, |d| d.matches(&frame, &detections))
        {
            continue;
        }
        let task = {
            let renderer = renderer.clone();
            let (frame, detections) = (frame.clone(), detections.clone());
            tokio::task::spawn_blocking(move || {
                renderer.render(&mut surface, frame.as_deref(), &detections);
                surface
            })
        };
        surface = match task.await {
            Ok(surface) => surface,
            Err(e) => {
                log::error!("Render task failed: {}", e);
                return;
            }
        };
        drawn = Some(Drawn { frame, detections });
    }
}

async fn status_loop(store: DetectionStore, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last: Vec<String> = Vec::new();
    loop {
        ticker.tick().await;
        let lines = status::render(&store.snapshot());
        if lines != last {
            for line in &lines {
                log::info!("{}", line);
            }
            last = lines;
        }
    }
}
