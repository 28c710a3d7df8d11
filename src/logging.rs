//! Dual-destination structured logging.
//!
//! Every log record is mirrored to two places:
//!
//! - a live [`LogSink`] (normally [`StreamSink`] writing to stderr), filtered
//!   by the configured level;
//! - an in-memory replay buffer owned by [`LogTee`], which keeps every record
//!   at every level and can be flushed to any writer (the `/_/logs` endpoint).
//!
//! # Architecture
//!
//! ```text
//!   tracing macros (info!, warn!, ...)
//!            │
//!            ▼
//!   ┌──────────────────┐
//!   │     TeeLayer     │ ← event + enclosing span fields → LogRecord
//!   └────────┬─────────┘
//!            ▼
//!   ┌──────────────────┐     1. forward (no lock held)   ┌────────────┐
//!   │      LogTee      │ ──────────────────────────────▶ │  LogSink   │
//!   │                  │                                 └────────────┘
//!   │  Mutex<String>   │ ← 2. append logfmt line (always, under lock)
//!   └──────────────────┘
//! ```
//!
//! The replay buffer is never truncated. It grows for the lifetime of the
//! process, which is acceptable for a short-lived diagnostic server.

use std::fmt::{self, Write as _};
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use nu_ansi_term::{Color, Style};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::metrics;

/// Errors reported by [`LogTee::handle`].
#[derive(Error, Debug)]
pub enum LogError {
    /// The live sink failed. The record was still appended to the replay buffer.
    #[error("live log sink failed: {0}")]
    Sink(#[from] io::Error),
}

/// A single structured log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub message: String,
    /// Attributes in insertion order (span fields root first, then event fields).
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    /// Create a record stamped with the current local time.
    pub fn new(level: Level, message: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
            fields,
        }
    }

    /// Render as a single logfmt line (without the trailing newline).
    pub fn to_logfmt(&self) -> String {
        let mut line = format!(
            "time={} level={} msg={}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.level,
            quote_value(&self.message)
        );
        for (key, value) in &self.fields {
            let _ = write!(line, " {key}={}", quote_value(value));
        }
        line
    }
}

/// Quote a logfmt value when it would otherwise be ambiguous.
fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '"' || c == '=');
    if needs_quotes {
        format!("{value:?}")
    } else {
        value.to_string()
    }
}

/// Destination for the live log stream.
pub trait LogSink: Send + Sync {
    /// Write one record. Sinks apply their own level threshold.
    fn write_record(&self, record: &LogRecord) -> io::Result<()>;
}

/// Console-style sink writing one human-readable line per record.
///
/// ```text
/// 2025-01-15 10:30:00 INF Request received method=GET url=/_/version
/// ```
pub struct StreamSink<W> {
    make_writer: W,
    level: LevelFilter,
    ansi: bool,
}

impl StreamSink<fn() -> io::Stderr> {
    /// Sink writing to stderr, coloured when stderr is a terminal.
    pub fn stderr(level: LevelFilter) -> Self {
        Self {
            make_writer: io::stderr,
            level,
            ansi: io::stderr().is_terminal(),
        }
    }
}

impl<W> StreamSink<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    pub fn new(make_writer: W, level: LevelFilter, ansi: bool) -> Self {
        Self {
            make_writer,
            level,
            ansi,
        }
    }

    fn render(&self, record: &LogRecord) -> String {
        let (tag, colour) = match record.level {
            Level::ERROR => ("ERR", Style::new().fg(Color::LightRed)),
            Level::WARN => ("WRN", Style::new().fg(Color::LightYellow)),
            Level::INFO => ("INF", Style::new().fg(Color::LightGreen)),
            Level::DEBUG => ("DBG", Style::new().fg(Color::LightBlue)),
            Level::TRACE => ("TRC", Style::new().dimmed()),
        };
        let (colour, dimmed) = if self.ansi {
            (colour, Style::new().dimmed())
        } else {
            (Style::new(), Style::new())
        };
        let time = record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();

        let mut line = format!(
            "{} {} {}",
            dimmed.paint(time),
            colour.paint(tag),
            record.message
        );
        for (key, value) in &record.fields {
            let _ = write!(
                line,
                " {}{}",
                dimmed.paint(format!("{key}=")),
                quote_value(value)
            );
        }
        line.push('\n');
        line
    }
}

impl<W> LogSink for StreamSink<W>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    fn write_record(&self, record: &LogRecord) -> io::Result<()> {
        if record.level > self.level {
            return Ok(());
        }
        let line = self.render(record);
        self.make_writer.make_writer().write_all(line.as_bytes())
    }
}

/// The dual-sink log handler.
///
/// Forwards each record to the live sink and mirrors it into the replay
/// buffer. The buffer lock is never held while the live sink is written.
pub struct LogTee {
    sink: Box<dyn LogSink>,
    buffer: Mutex<String>,
}

impl fmt::Debug for LogTee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTee").finish_non_exhaustive()
    }
}

impl LogTee {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            buffer: Mutex::new(String::new()),
        }
    }

    /// Forward `record` to the live sink, then append it to the replay buffer.
    ///
    /// The buffer append happens even when the live sink fails; the sink
    /// error is returned afterwards.
    pub fn handle(&self, record: &LogRecord) -> Result<(), LogError> {
        let forwarded = self.sink.write_record(record);

        let line = record.to_logfmt();
        {
            let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            buffer.push_str(&line);
            buffer.push('\n');
        }

        forwarded.map_err(LogError::from)
    }

    /// Write everything buffered so far to `destination`.
    ///
    /// Repeatable: the buffer is not cleared, so consecutive calls with no
    /// intervening records write identical output.
    pub fn flush<W: Write + ?Sized>(&self, destination: &mut W) -> io::Result<()> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        destination.write_all(buffer.as_bytes())
    }

    /// Snapshot of the replay buffer.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// =============================================================================
// tracing integration
// =============================================================================

/// Fields recorded on a span, stored in the span's extensions.
#[derive(Debug, Default)]
struct SpanFields(Vec<(String, String)>);

/// Collects the fields of an event or span in declaration order.
struct FieldCollector<'a> {
    message: Option<String>,
    fields: &'a mut Vec<(String, String)>,
}

impl Visit for FieldCollector<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields
                .push((field.name().to_string(), format!("{value:?}")));
        }
    }
}

/// `tracing` layer feeding every event into a [`LogTee`].
///
/// Span fields (such as the request `id`) are inherited by all events
/// emitted inside the span, which is what makes a span a scoped logger.
pub struct TeeLayer {
    tee: Arc<LogTee>,
}

impl TeeLayer {
    pub fn new(tee: Arc<LogTee>) -> Self {
        Self { tee }
    }
}

impl<S> Layer<S> for TeeLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = SpanFields::default();
        attrs.record(&mut FieldCollector {
            message: None,
            fields: &mut fields.0,
        });
        span.extensions_mut().insert(fields);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            values.record(&mut FieldCollector {
                message: None,
                fields: &mut fields.0,
            });
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    fields.extend(span_fields.0.iter().cloned());
                }
            }
        }

        let mut collector = FieldCollector {
            message: None,
            fields: &mut fields,
        };
        event.record(&mut collector);
        let message = collector.message.take().unwrap_or_default();

        let record = LogRecord::new(*event.metadata().level(), message, fields);
        if self.tee.handle(&record).is_err() {
            metrics::record_log_sink_error();
        }
    }
}

/// Install the global subscriber and return the replay handle.
///
/// `level` only applies to the live stream; the replay buffer receives
/// everything.
pub fn init_logging(level: LevelFilter) -> Arc<LogTee> {
    let tee = Arc::new(LogTee::new(StreamSink::stderr(level)));

    tracing_subscriber::registry()
        .with(TeeLayer::new(tee.clone()))
        .init();

    tee
}
