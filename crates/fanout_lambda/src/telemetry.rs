//! Structured JSON log lines on stderr.
//!
//! Every line is one object with `component`, `event`, `timestamp` and a free
//! form `details` payload. Warnings and errors also carry `level`.

use serde_json::{json, Value};

pub fn log_info(component: &str, event: &str, details: Value) {
    emit(component, None, event, details);
}

pub fn log_warn(component: &str, event: &str, details: Value) {
    emit(component, Some("warn"), event, details);
}

pub fn log_error(component: &str, event: &str, details: Value) {
    emit(component, Some("error"), event, details);
}

fn emit(component: &str, level: Option<&str>, event: &str, details: Value) {
    eprintln!("{}", render_line(component, level, event, details));
}

fn render_line(component: &str, level: Option<&str>, event: &str, details: Value) -> Value {
    let mut line = json!({
        "component": component,
        "event": event,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "details": details,
    });
    if let (Some(level), Some(object)) = (level, line.as_object_mut()) {
        object.insert("level".to_string(), Value::from(level));
    }
    line
}
