//! Engine observability for the view shell.
//!
//! The engine reports state through a small event stream instead of assuming
//! any particular front end: status text, a progress fraction, transcript
//! mutations, and corpus counters. Sinks write to stderr (human or JSON
//! lines) so stdout stays reserved for the streamed answer; the null sink
//! drops everything.

use std::io::Write;

use crate::models::ChatRole;

/// A single engine event.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Free-form status line ("3개 문서, 41개 청크", "임베딩 모델 로딩…").
    Status(String),
    /// Progress fraction in `[0, 1]` for the running operation.
    Progress(f32),
    /// A message was appended to the transcript.
    MessageAppended {
        index: usize,
        role: ChatRole,
        content: String,
    },
    /// A streamed delta was appended to the message at `index`.
    MessageDelta { index: usize, delta: String },
    /// The meta line of the message at `index` was replaced.
    MessageMeta { index: usize, meta: String },
    /// Document or chunk counters changed.
    CorpusChanged { docs: usize, chunks: usize },
}

/// Receives engine events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EngineEvent);
}

/// Human-friendly sink: status and progress on stderr, answer deltas on
/// stdout.
pub struct HumanSink;

impl EventSink for HumanSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Status(text) => {
                let _ = writeln!(std::io::stderr().lock(), "{}", text);
            }
            EngineEvent::Progress(fraction) => {
                let _ = write!(
                    std::io::stderr().lock(),
                    "\r  {:>5.1}%",
                    fraction * 100.0
                );
                let _ = std::io::stderr().lock().flush();
            }
            EngineEvent::MessageDelta { delta, .. } => {
                let mut out = std::io::stdout().lock();
                let _ = out.write_all(delta.as_bytes());
                let _ = out.flush();
            }
            EngineEvent::MessageMeta { meta, .. } => {
                let _ = writeln!(std::io::stderr().lock(), "{}", meta);
            }
            EngineEvent::MessageAppended { .. } | EngineEvent::CorpusChanged { .. } => {}
        }
    }
}

/// Machine-readable sink: one JSON object per line on stderr.
pub struct JsonSink;

impl EventSink for JsonSink {
    fn emit(&self, event: &EngineEvent) {
        let obj = match event {
            EngineEvent::Status(text) => serde_json::json!({"event": "status", "text": text}),
            EngineEvent::Progress(fraction) => {
                serde_json::json!({"event": "progress", "fraction": fraction})
            }
            EngineEvent::MessageAppended {
                index,
                role,
                content,
            } => serde_json::json!({
                "event": "message.appended",
                "index": index,
                "role": role,
                "content": content,
            }),
            EngineEvent::MessageDelta { index, delta } => serde_json::json!({
                "event": "message.deltaAppended",
                "index": index,
                "delta": delta,
            }),
            EngineEvent::MessageMeta { index, meta } => serde_json::json!({
                "event": "message.metaReplaced",
                "index": index,
                "meta": meta,
            }),
            EngineEvent::CorpusChanged { docs, chunks } => serde_json::json!({
                "event": "corpus.changed",
                "docs": docs,
                "chunks": chunks,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// Drops every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) {}
}

/// Output mode for the CLI shell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventMode {
    Off,
    Human,
    Json,
}

impl EventMode {
    /// Default: human events when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            EventMode::Human
        } else {
            EventMode::Off
        }
    }

    pub fn sink(&self) -> Box<dyn EventSink> {
        match self {
            EventMode::Off => Box::new(NullSink),
            EventMode::Human => Box::new(HumanSink),
            EventMode::Json => Box::new(JsonSink),
        }
    }
}
