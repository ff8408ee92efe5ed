//! Status Panel
//!
//! Read-only view of the store, formatted as the text lines an operator panel shows.

use crate::module::state::{ConnectionStatus, StoreSnapshot};

/// Format a store snapshot as panel lines.
///
/// # Example
///
/// ```text
/// ONLINE | AI ENGINE: ACTIVE | FPS: 2 | OBJECTS: 1
/// PERSON  CONF: 87.3%  12:00:01  CROP: 2048 B
/// ```
pub fn render(snapshot: &StoreSnapshot) -> Vec<String> {
    let online = match snapshot.status {
        ConnectionStatus::Connected => "ONLINE",
        ConnectionStatus::Connecting | ConnectionStatus::Disconnected => "OFFLINE",
    };
    let engine = match snapshot.error {
        Some(_) => "ERROR",
        None => "ACTIVE",
    };
    let mut lines = vec![format!(
        "{} | AI ENGINE: {} | FPS: {} | OBJECTS: {}",
        online,
        engine,
        snapshot.fps.round() as u64,
        snapshot.detections.len()
    )];
    if let Some(e) = snapshot.error {
        lines.push(format!("ERROR: {}", e));
    }
    if snapshot.detections.is_empty() {
        lines.push("NO OBJECTS DETECTED".to_string());
        return lines;
    }
    let seen = snapshot
        .updated_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    for det in snapshot.detections.iter() {
        let mut line = format!(
            "{}  CONF: {:.1}%  {}",
            det.label.to_uppercase(),
            det.confidence,
            seen
        );
        if let Some(crop) = &det.cropped_img {
            line.push_str(&format!("  CROP: {} B", crop.len()));
        }
        lines.push(line);
    }
    lines
}
