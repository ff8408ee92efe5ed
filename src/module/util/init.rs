//! This module is responsible for preparing the resources needed by the application, such as directories, configurations, logs, etc.
//!

pub mod resource {
    use super::WatchtowerProperty;
    use std::error::Error;

    /// Initialize the application resources and return a WatchtowerProperty instance containing paths and configurations.
    ///
    pub fn init() -> Result<WatchtowerProperty, Box<dyn Error>> {
        // Prepare the app data directory
        let paths = crate::module::util::path::dir::create_default_app_sub_dir()?;

        // Load the app configuration file, writing the defaults on first run
        let conf = crate::module::util::conf::toml::load(&paths.dir.data)?;

        Ok(WatchtowerProperty { path: paths, conf })
    }
}

/// This struct represents the properties of the app, such as paths and configurations.
///
#[derive(Debug, Clone)]
pub struct WatchtowerProperty {
    pub path: crate::module::util::path::WatchtowerPath, // The paths of the app resources
    pub conf: crate::module::util::conf::Config,         // The configurations of the app
}
