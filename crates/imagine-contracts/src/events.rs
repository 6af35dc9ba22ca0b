use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    pub percent: f64,
}

impl Progress {
    pub fn new(message: impl Into<String>, percent: f64) -> Self {
        Self {
            message: message.into(),
            percent,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.message.is_empty() && self.percent == 0.0
    }
}

/// Change notifications published by the stores and the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    GalleryChanged { count: usize },
    StatsChanged(Stats),
    Busy { in_flight: bool },
    Progress(Progress),
    Notice(Notice),
}

impl ChangeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::GalleryChanged { .. } => "gallery_changed",
            ChangeEvent::StatsChanged(_) => "stats_changed",
            ChangeEvent::Busy { .. } => "busy",
            ChangeEvent::Progress(_) => "progress",
            ChangeEvent::Notice(_) => "notice",
        }
    }
}

type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Shared fan-out of [`ChangeEvent`]s to the presentation layer.
///
/// Clones share the same listener list, so a store and the session that owns it
/// publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(Box::new(listener)),
            Err(_) => tracing::error!("event bus lock poisoned; listener dropped"),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        let Ok(listeners) = self.listeners.lock() else {
            tracing::error!(kind = event.kind(), "event bus lock poisoned; event dropped");
            return;
        };
        for listener in listeners.iter() {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|rows| rows.len()).unwrap_or(0)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Append-only activity log (`events.jsonl`).
///
/// - default fields are `type`, `session_id`, `ts`
/// - the event payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &ChangeEvent) -> anyhow::Result<Value> {
        let mut line_payload = Map::new();
        line_payload.insert("type".to_string(), Value::String(event.kind().to_string()));
        line_payload.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        line_payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        match serde_json::to_value(event)? {
            Value::Object(fields) => {
                for (key, value) in fields {
                    line_payload.insert(key, value);
                }
            }
            other => {
                line_payload.insert("payload".to_string(), other);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&line_payload)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line_payload))
    }

    /// Subscribe this writer to `bus`; write failures are logged, never raised.
    pub fn attach(&self, bus: &EventBus) {
        let writer = self.clone();
        bus.subscribe(move |event| {
            if let Err(err) = writer.emit(event) {
                tracing::warn!(
                    path = %writer.path().display(),
                    "activity log write failed: {err:#}"
                );
            }
        });
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
