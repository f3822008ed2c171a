//! Append-only JSONL log files.
//!
//! [`JsonlLayer`] is a `tracing_subscriber::Layer` that serializes every
//! tracing event into one JSON record per line (`{ts, level, event, …}`) and
//! appends it to a log file (`logs/router.log`, `logs/watchdog.log`). Write
//! failures (a vanished pipe, a full disk) are reported once to stderr and
//! then swallowed; logging must never take the process down.

use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::field::{Field, Visit},
    tracing_subscriber::{Layer, layer::Context},
};

// ── LogRecord ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
    pub level: String,
    pub target: String,
    pub event: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

// ── Visitor (extracts fields from tracing events) ───────────────────────────

struct FieldVisitor {
    message: String,
    fields: serde_json::Map<String, Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: String::new(),
            fields: serde_json::Map::new(),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().into(), Value::String(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.into();
        } else {
            self.fields
                .insert(field.name().into(), Value::String(value.into()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().into(), Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().into(), Value::Bool(value));
    }
}

// ── JsonlLayer ──────────────────────────────────────────────────────────────

pub struct JsonlLayer {
    writer: Mutex<Option<File>>,
    path: PathBuf,
    write_failed: AtomicBool,
}

impl JsonlLayer {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(Some(file)),
            path,
            write_failed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &LogRecord) {
        let Ok(json) = serde_json::to_string(record) else {
            return;
        };
        if let Ok(mut w) = self.writer.lock()
            && let Some(ref mut file) = *w
            && writeln!(file, "{json}").is_err()
            && !self.write_failed.swap(true, Ordering::Relaxed)
        {
            eprintln!("log file {} is not writable, dropping records", self.path.display());
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for JsonlLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        self.append(&LogRecord {
            ts,
            level: meta.level().to_string(),
            target: meta.target().into(),
            event: visitor.message,
            fields: visitor.fields,
        });
    }
}

// ── Tail reads ──────────────────────────────────────────────────────────────

/// Read the last `limit` records from a JSONL log file. Unparseable lines are
/// skipped; a missing file yields an empty list.
pub fn read_last(path: &Path, limit: usize) -> Vec<LogRecord> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return vec![],
    };

    let reader = BufReader::new(file);
    let mut ring = VecDeque::with_capacity(limit);
    for line in reader.lines() {
        let Ok(line) = line else {
            continue;
        };
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<LogRecord>(&line) else {
            continue;
        };
        if ring.len() >= limit {
            ring.pop_front();
        }
        ring.push_back(record);
    }
    ring.into()
}

/// Byte length of the file, or 0 when absent. Used by `logs tail` to follow
/// appends without re-reading the whole file.
pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read everything after `offset`, returning the new offset and any complete
/// lines that appeared.
pub fn read_from(path: &Path, offset: u64) -> (u64, Vec<String>) {
    use std::io::{Seek, SeekFrom};

    let Ok(mut file) = File::open(path) else {
        return (offset, vec![]);
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    // Truncated (rotated) file: start over.
    let start = if len < offset { 0 } else { offset };
    if file.seek(SeekFrom::Start(start)).is_err() {
        return (offset, vec![]);
    }

    let reader = BufReader::new(&mut file);
    let lines: Vec<String> = reader.lines().map_while(|l| l.ok()).collect();
    (len, lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event: &str) -> LogRecord {
        LogRecord {
            ts: 1,
            level: "INFO".into(),
            target: "test".into(),
            event: event.into(),
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_append_and_read_last() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("router.log");
        let layer = JsonlLayer::open(&path).unwrap();

        for i in 0..5 {
            layer.append(&record(&format!("event-{i}")));
        }

        let records = read_last(&path, 3);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].event, "event-2");
        assert_eq!(records[2].event, "event-4");
    }

    #[test]
    fn test_read_last_missing_file() {
        let records = read_last(Path::new("/nonexistent/router.log"), 10);
        assert!(records.is_empty());
    }

    #[test]
    fn test_read_last_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.log");
        std::fs::write(
            &path,
            "not json\n{\"ts\":1,\"level\":\"INFO\",\"target\":\"t\",\"event\":\"ok\"}\n",
        )
        .unwrap();

        let records = read_last(&path, 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, "ok");
    }

    #[test]
    fn test_read_from_tracks_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.log");
        std::fs::write(&path, "one\n").unwrap();

        let (offset, lines) = read_from(&path, 0);
        assert_eq!(lines, vec!["one"]);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "two").unwrap();

        let (_, lines) = read_from(&path, offset);
        assert_eq!(lines, vec!["two"]);
    }

    #[test]
    fn test_jsonl_record_roundtrip() {
        let mut fields = serde_json::Map::new();
        fields.insert("agent".into(), Value::String("demo".into()));
        let rec = LogRecord {
            ts: 42,
            level: "WARN".into(),
            target: "router".into(),
            event: "probe failed".into(),
            fields,
        };
        let json = serde_json::to_string(&rec).unwrap();
        let parsed: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.ts, 42);
        assert_eq!(parsed.fields["agent"], "demo");
    }
}
