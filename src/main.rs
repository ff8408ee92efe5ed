//! Watchtower, a live camera view with boxes from a remote object detector.

pub mod module; // Import the module submodule that contains other modules
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::module::define; // Import the define module that contains constants and types
use crate::module::overlay::surface::ImageSurface;
use crate::module::pipeline::{Pipeline, Settings};
use crate::module::state::DetectionStore;
use crate::module::util::init::resource::init; // Import the resource initialization function
use crate::module::vision::camera::{MediaSource, V4l2Camera};
use crate::module::vision::detector::http::DetectionClient;

// The main function of Watchtower
pub fn main() -> Result<(), Box<dyn Error>> {
    // Prepare the resources by initializing the property struct
    let property = init()?;

    // Initialize the logging system with the data directory and the system name
    init_log(
        property.path.dir.data.as_str(),
        define::system::NAME,
        &property.conf.system.log_level,
    )?;
    log::info!("Starting Watchtower..."); // Log an info message

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    // Request the camera; without one the view shows the placeholder
    let store = DetectionStore::new();
    let camera_conf = property.conf.camera.clone();
    let source = match MediaSource::acquire(move || V4l2Camera::open(&camera_conf), &store) {
        Ok(source) => source,
        Err(e) => {
            log::warn!("Running without video: {}", e);
            MediaSource::unavailable()
        }
    };

    let client = DetectionClient::new(&property.conf.detector);
    log::info!("Detection endpoint: {}", client.endpoint());
    let output = property
        .conf
        .overlay
        .write_image
        .then(|| PathBuf::from(&property.path.img.overlay));
    let surface = ImageSurface::new(output);
    let settings = Settings::from_conf(&property.conf);

    // Run until interrupted
    let pipeline = runtime.block_on(async {
        let pipeline = Pipeline::start(settings, Arc::new(source), store, client, surface);
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Can't listen for shutdown signal: {}", e);
        }
        pipeline
    });

    pipeline.teardown();
    runtime.shutdown_timeout(Duration::from_millis(500));
    log::info!("Watchtower stopped");
    Ok(())
}

/// This function initializes the logger system using the log4rs crate.
///
/// # Arguments
/// * `dir` - A string slice that holds the directory where the log file will be stored
/// * `name` - A string slice that holds the name of the logger and the log file
/// * `level` - Root level, e.g. `INFO`. Unknown values fall back to `INFO`
///
/// # Example
/// ```ignore
/// init_log("./log_dir", "logger_name", "INFO")?;
/// ```
///
/// # Log Example
/// ```
/// log::debug!("Debug Message"); // Log a debug message
/// log::info!("Info Message"); // Log an info message
/// log::warn!("Warning Message"); // Log a warning message
/// log::error!("Error Message"); // Log an error message
/// ```
fn init_log(dir: &str, name: &str, level: &str) -> Result<(), Box<dyn Error>> {
    use crate::module::util::path::join;
    use log::LevelFilter;
    use log4rs::append::console::ConsoleAppender;
    use log4rs::append::file::FileAppender;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let pattern = "{h({d} - {l}: {m}{n})}";
    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build(join(&[dir, define::path::LOG_DIR, &format!("{}.log", name)]))?;
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(pattern)))
        .build();

    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("console", Box::new(console)))
        .build(
            Root::builder()
                .appender("logfile")
                .appender("console")
                .build(level),
        )?;
    log4rs::init_config(config)?;
    Ok(())
}
