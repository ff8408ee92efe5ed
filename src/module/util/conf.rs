//! Config Handler.

use serde::{Deserialize, Serialize};

/// Provides TOML config file handling.
pub mod toml {

    use super::DEFAULT_CONFIG;
    use crate::module::define;
    use std::error::Error;
    use std::fs::File;
    use std::io::prelude::*;
    use std::path::Path;

    /// Loads a configuration file from the given directory.
    /// If not found, generates a default config file.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file is located or should be created.
    ///
    pub fn load(dir: &str) -> Result<super::Config, Box<dyn Error>> {
        // Check if the config file exists
        let path = Path::new(dir).join(define::path::CONF_FILE);

        if !path.is_file() {
            // Create the default config if it doesn't exist
            let config: super::Config = toml::from_str(DEFAULT_CONFIG)?;
            let toml_str = toml::to_string(&config)?;
            let mut file = File::create(&path)?;
            file.write_all(toml_str.as_bytes())?;
            log::info!("Default config written to {:?}", path);
        }

        // Load the config
        let conf_str: String = std::fs::read_to_string(&path)?;
        let conf: super::Config = toml::from_str(&conf_str)?;
        Ok(conf)
    }

    /// Saves a configuration file to the given directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory where the configuration file should be saved.
    /// * `conf` - The configuration data to be saved.
    ///
    pub fn save(dir: &str, conf: &super::Config) -> Result<(), Box<dyn Error>> {
        let toml_str = toml::to_string(conf)?;
        let path = crate::module::util::path::join(&[dir, define::path::CONF_FILE]);
        let mut file = File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }
}

/// Represents the configuration data structure.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub system: System,
    pub camera: Camera,
    pub sampler: Sampler,
    pub detector: Detector,
    pub overlay: Overlay,
    pub status: Status,
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default is covered by tests, so parsing cannot fail at runtime.
        ::toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|e| panic!("Broken default config: {}", e))
    }
}

/// Represents system-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct System {
    pub log_level: String,
}

/// Represents camera-related configuration parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Camera {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: String,
}

/// Represents frame sampling parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Sampler {
    pub interval_ms: u64,
    pub format: String,
    pub quality: Option<u8>,
}

/// Represents detection endpoint parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Detector {
    pub base_url: String,
    pub timeout_ms: u64,
    pub overlap: String,
}

/// Represents overlay drawing parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Overlay {
    pub refresh_hz: u32,
    pub line_width: u32,
    pub label_dx: i32,
    pub label_dy: i32,
    pub write_image: bool,
}

/// Represents status panel parameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Status {
    pub interval_ms: u64,
}

// Default configuration data in TOML format
const DEFAULT_CONFIG: &str = r#"
[system]
  log_level = 'INFO' # Log level (e.g., 'INFO', 'DEBUG')

[camera]
  device = '/dev/video0' # V4L2 capture node
  width = 640 # Requested frame width
  height = 480 # Requested frame height
  fps = 30 # Requested capture rate
  format = 'MJPG' # Pixel format ('MJPG', 'RGB3')

[sampler]
  interval_ms = 500 # Period between detection requests
  format = 'jpeg' # Upload encoding ('jpeg', 'png')
  # quality = 80 # JPEG quality (1-100), encoder default when absent

[detector]
  base_url = 'http://localhost:8000' # Detection service base url
  timeout_ms = 5000 # Request timeout
  overlap = 'discard_stale' # In-flight policy ('discard_stale', 'coalesce')

[overlay]
  refresh_hz = 30 # Redraw rate
  line_width = 3 # Box stroke width in pixels
  label_dx = 5 # Label offset from the box's left edge
  label_dy = 25 # Label baseline offset from the box's top edge
  write_image = true # Write the composited frame to the tmp directory

[status]
  interval_ms = 1000 # Status panel refresh period
"#;
