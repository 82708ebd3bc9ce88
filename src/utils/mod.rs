/// Utility functions and helpers
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate a unique ID based on timestamp and random component
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let random: u32 = rand::thread_rng().gen();
    format!("{}-{}-{:x}", prefix, timestamp, random)
}

/// Format duration for human-readable output
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 && duration.subsec_millis() > 0 {
        format!("{}ms", duration.subsec_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{}h{}m{}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Strip characters that would break the `id:timestamp|id:timestamp` record
pub fn sanitize_proxy_id(id: &str) -> String {
    id.chars().filter(|c| *c != '|' && *c != ':').collect()
}
