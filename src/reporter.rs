use chrono::Utc;
use serde_json::{Value, json};

/// Emit one bus event as a single JSON line to stdout, tagged with the
/// channel it arrived on. Downstream dashboard processes consume these lines.
pub fn report_event(channel: &str, payload: &Value) {
    let line = json!({
        "at": Utc::now(),
        "channel": channel,
        "payload": payload,
    });
    if let Ok(json) = serde_json::to_string(&line) {
        println!("{json}");
    }
}
