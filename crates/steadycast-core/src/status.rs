// crates/steadycast-core/src/status.rs
//
// Newline-delimited JSON status events on stderr. One object per line;
// every object carries `event`, `ts` (integer seconds since epoch) and
// `stream_id`. Both threads emit through a cloned StatusLog.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

#[derive(Clone)]
pub struct StatusLog {
    stream_id: String,
}

impl StatusLog {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self { stream_id: stream_id.into() }
    }

    /// Emit an event with no extra fields.
    pub fn emit(&self, event: &str) {
        self.emit_fields(event, &[]);
    }

    /// Emit an event with event-specific fields appended to the envelope.
    pub fn emit_fields(&self, event: &str, fields: &[(&str, Value)]) {
        let mut line = self.render(event, fields, epoch_secs());
        line.push('\n');
        // One locked write per event so lines from the two threads never
        // interleave mid-object.
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }

    fn render(&self, event: &str, fields: &[(&str, Value)], ts: i64) -> String {
        let mut obj = Map::new();
        obj.insert("event".into(), json!(event));
        obj.insert("ts".into(), json!(ts));
        obj.insert("stream_id".into(), json!(self.stream_id));
        for (key, value) in fields {
            obj.insert((*key).into(), value.clone());
        }
        Value::Object(obj).to_string()
    }
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_one_well_formed_object() {
        let log = StatusLog::new("ch-1");
        let line = log.render("started", &[], 1_700_000_000);
        assert!(!line.contains('\n'));
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["event"], "started");
        assert_eq!(v["ts"], 1_700_000_000i64);
        assert_eq!(v["stream_id"], "ch-1");
    }

    #[test]
    fn extra_fields_are_included() {
        let log = StatusLog::new("");
        let line = log.render(
            "srt_dropped",
            &[("reason", json!("timeout"))],
            0,
        );
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["reason"], "timeout");
    }

    #[test]
    fn stats_fields_keep_their_types() {
        let log = StatusLog::new("ch-1");
        let line = log.render(
            "stats",
            &[
                ("fps", json!(30)),
                ("srt_connected", json!(false)),
                ("audio_mode", json!("bg")),
            ],
            7,
        );
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["fps"], 30);
        assert_eq!(v["srt_connected"], false);
        assert_eq!(v["audio_mode"], "bg");
    }
}
