//! Leveled key/value logging capability.
//!
//! Components receive an `Arc<dyn Logger>` at construction; nothing reads a
//! process-wide logger. [`TracingLogger`] is the default and forwards records
//! to `tracing`, [`StdLogger`] writes `LEVEL k=v` lines to any writer.
//!
//! [`with`] binds leading key/value pairs to a logger. A bound [`Value`] may be
//! a [`Valuer`], evaluated again for every record.

use std::borrow::Cow;
use std::fmt::{self, Display, Write as _};
use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;

/// Value appended when a record ends with a key that has no value.
pub const UNPAIRED_SENTINEL: &str = "KEYVALS UNPAIRED";

/// Record severity, ordered `Debug < Info < Warn < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    /// Parses a level name case-insensitively. Unknown names map to `Info`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "WARN" => Self::Warn,
            "ERROR" => Self::Error,
            "FATAL" => Self::Fatal,
            _ => Self::Info,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sink for leveled key/value records.
///
/// `key_vals` alternates keys and values. An odd-length slice is valid: the
/// trailing key is paired with [`UNPAIRED_SENTINEL`].
pub trait Logger: Send + Sync {
    /// Writes one record.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the sink cannot be written.
    fn log(&self, level: Level, key_vals: &[&dyn Display]) -> io::Result<()>;
}

/// Renders `key_vals` as ` k1=v1 k2=v2`, tagging an unpaired trailing key.
fn render_pairs(key_vals: &[&dyn Display]) -> String {
    let mut out = String::new();
    for pair in key_vals.chunks(2) {
        let _ = match pair {
            [k, v] => write!(out, " {k}={v}"),
            [k] => write!(out, " {k}={UNPAIRED_SENTINEL}"),
            _ => Ok(()),
        };
    }
    out
}

// ---------------------------------------------------------------------------
// StdLogger
// ---------------------------------------------------------------------------

/// Line-oriented logger over any writer. Writes are serialized.
pub struct StdLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> StdLogger<W> {
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the logger and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> Logger for StdLogger<W> {
    fn log(&self, level: Level, key_vals: &[&dyn Display]) -> io::Result<()> {
        if key_vals.is_empty() {
            return Ok(());
        }
        let line = format!("{level}{}\n", render_pairs(key_vals));
        self.writer.lock().write_all(line.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// TracingLogger
// ---------------------------------------------------------------------------

/// Forwards records to `tracing` events. `Fatal` is emitted at `ERROR`
/// with `fatal = true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, key_vals: &[&dyn Display]) -> io::Result<()> {
        if key_vals.is_empty() {
            return Ok(());
        }
        let fields = render_pairs(key_vals);
        let fields = fields.trim_start();
        match level {
            Level::Debug => tracing::debug!(target: "strato", "{fields}"),
            Level::Info => tracing::info!(target: "strato", "{fields}"),
            Level::Warn => tracing::warn!(target: "strato", "{fields}"),
            Level::Error => tracing::error!(target: "strato", "{fields}"),
            Level::Fatal => tracing::error!(target: "strato", fatal = true, "{fields}"),
        }
        Ok(())
    }
}

/// Drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardLogger;

impl Logger for DiscardLogger {
    fn log(&self, _level: Level, _key_vals: &[&dyn Display]) -> io::Result<()> {
        Ok(())
    }
}

/// The logger used when none is configured.
#[must_use]
pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}

/// Writes one record. A sink failure is reported through `tracing` instead
/// of being returned, for callers with nowhere to propagate it.
pub fn log_or_warn(logger: &dyn Logger, level: Level, key_vals: &[&dyn Display]) {
    if let Err(err) = logger.log(level, key_vals) {
        tracing::warn!(error = %err, %level, "log record dropped");
    }
}

// ---------------------------------------------------------------------------
// Bound values
// ---------------------------------------------------------------------------

/// Computes a value at the moment a record is written.
pub type Valuer = Arc<dyn Fn() -> String + Send + Sync>;

/// A bound key or value: fixed text, or a [`Valuer`].
#[derive(Clone)]
pub enum Value {
    Static(String),
    Dynamic(Valuer),
}

impl Value {
    pub fn valuer<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    fn resolve(&self) -> Cow<'_, str> {
        match self {
            Self::Static(s) => Cow::Borrowed(s.as_str()),
            Self::Dynamic(f) => Cow::Owned(f()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(s) => f.debug_tuple("Static").field(s).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Static(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Static(s)
    }
}

/// Logger that writes `bound` ahead of every record's own pairs.
struct Bound {
    inner: Arc<dyn Logger>,
    bound: Vec<Value>,
}

impl Logger for Bound {
    fn log(&self, level: Level, key_vals: &[&dyn Display]) -> io::Result<()> {
        let resolved: Vec<Cow<'_, str>> = self.bound.iter().map(Value::resolve).collect();
        let mut all: Vec<&dyn Display> = Vec::with_capacity(resolved.len() + key_vals.len());
        all.extend(resolved.iter().map(|v| v as &dyn Display));
        all.extend_from_slice(key_vals);
        self.inner.log(level, &all)
    }
}

/// Returns a logger that prefixes every record with `bound` (alternating keys
/// and values). Nested calls keep the outer binding first.
#[must_use]
pub fn with(logger: Arc<dyn Logger>, bound: Vec<Value>) -> Arc<dyn Logger> {
    if bound.is_empty() {
        return logger;
    }
    Arc::new(Bound { inner: logger, bound })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn output(logger: StdLogger<Vec<u8>>) -> String {
        String::from_utf8(logger.into_inner()).unwrap()
    }

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn parse_is_case_insensitive_and_defaults_to_info() {
        assert_eq!(Level::parse("debug"), Level::Debug);
        assert_eq!(Level::parse("Warn"), Level::Warn);
        assert_eq!(Level::parse("FATAL"), Level::Fatal);
        assert_eq!(Level::parse("verbose"), Level::Info);
        assert_eq!(Level::parse(""), Level::Info);
    }

    #[test]
    fn std_logger_writes_pairs() {
        let logger = StdLogger::new(Vec::new());
        logger
            .log(Level::Warn, &[&"msg", &"slow call", &"ms", &120])
            .unwrap();
        assert_eq!(output(logger), "WARN msg=slow call ms=120\n");
    }

    #[test]
    fn std_logger_tags_unpaired_key() {
        let logger = StdLogger::new(Vec::new());
        logger.log(Level::Info, &[&"a", &1, &"dangling"]).unwrap();
        assert_eq!(output(logger), "INFO a=1 dangling=KEYVALS UNPAIRED\n");
    }

    #[test]
    fn std_logger_skips_empty_records() {
        let logger = StdLogger::new(Vec::new());
        logger.log(Level::Error, &[]).unwrap();
        assert_eq!(output(logger), "");
    }

    /// Writer appending into a buffer shared with the test.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn bound_pairs_lead_every_record() {
        let sink = Shared::default();
        let base: Arc<dyn Logger> = Arc::new(StdLogger::new(sink.clone()));
        let logger = with(base, vec!["service".into(), "greeter".into()]);
        let logger = with(logger, vec!["instance".into(), "i-1".into()]);

        logger.log(Level::Info, &[&"msg", &"up"]).unwrap();
        assert_eq!(sink.text(), "INFO service=greeter instance=i-1 msg=up\n");
    }

    #[test]
    fn valuer_is_evaluated_per_record() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let sink = Shared::default();
        let counter = Arc::new(AtomicU32::new(0));
        let seq = {
            let counter = Arc::clone(&counter);
            Value::valuer(move || (counter.fetch_add(1, Ordering::SeqCst) + 1).to_string())
        };
        let logger = with(Arc::new(StdLogger::new(sink.clone())), vec!["seq".into(), seq]);

        logger.log(Level::Info, &[&"msg", &"a"]).unwrap();
        logger.log(Level::Warn, &[&"msg", &"b"]).unwrap();
        assert_eq!(sink.text(), "INFO seq=1 msg=a\nWARN seq=2 msg=b\n");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn log_or_warn_swallows_sink_failures() {
        struct Closed;

        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let logger = StdLogger::new(Closed);
        assert!(logger.log(Level::Info, &[&"k", &"v"]).is_err());
        log_or_warn(&logger, Level::Info, &[&"k", &"v"]);
    }

    #[test]
    fn tracing_and_discard_loggers_accept_records() {
        TracingLogger.log(Level::Fatal, &[&"k", &"v"]).unwrap();
        DiscardLogger.log(Level::Info, &[&"k"]).unwrap();
    }
}
