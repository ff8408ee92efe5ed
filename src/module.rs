//! This module contains all the sub-modules of the project.

pub mod define; // Definition module: Contains definitions and constants used throughout the project.
pub mod overlay; // Overlay module: Draws video and detection boxes on a surface.
pub mod pipeline; // Pipeline module: Runs the sampling, refresh and status timers.
pub mod state; // State module: Holds the detection results and connection state.
pub mod status; // Status module: Formats the operator panel.
pub mod util; // Utility module: Provides various utility functions and helpers.
pub mod vision; // Vision module: Handles the camera, frame sampling and the detection service.
