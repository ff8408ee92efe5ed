//! Processing related to visual information.
//!
//! Capture, sampling and remote detection: the left half of the pipeline.

pub mod camera;
pub mod detector;
pub mod sampler;
