//! Module for Constants and Paths Definitions
//!
//! This module defines various constants and paths used throughout the application.

/// System Constants
pub mod system {
    /// Name of the system
    pub const NAME: &str = "watchtower";
}

/// File Paths
pub mod path {

    // Persistent Data Directory
    pub const PERSISTENT_DIR: &str = "/data/";

    // Ephemeral Data Directory
    pub const EPHEMERAL_DIR: &str = "/run/user/1000/";

    // Log Directory
    pub const LOG_DIR: &str = "log";

    // Configuration File
    pub const CONF_FILE: &str = "conf.toml";

    // Composited overlay written by the image surface
    pub const OVERLAY_IMAGE: &str = "overlay.jpg";
}

/// Detection endpoint wire constants
pub mod endpoint {
    // Route appended to the configured base url
    pub const DETECT_ROUTE: &str = "/detect";

    // Multipart field carrying the frame
    pub const FILE_FIELD: &str = "file";

    // File name stem announced for the frame
    pub const FILE_STEM: &str = "frame";
}
