//! Explicit logging context for transport-layer diagnostics.
//!
//! Every [`NetChannel`](crate::channel::NetChannel) captures a [`NetLog`] at
//! initialization time and stamps each record with the subsystem identifier
//! it was configured with. Records are handed to a pluggable [`LogSink`];
//! the default sink forwards them into `tracing` events carrying a `subsys`
//! field. A host embedding the protocol engine supplies its own sink to
//! route transport diagnostics into its logging system.

use std::fmt;
use std::sync::Arc;

/// Severity of a transport-layer diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Developer-facing detail
    Debug,
    /// Normal but significant events (transport selection, shutdown)
    Notice,
    /// Degraded but recoverable conditions
    Warning,
    /// Failures surfaced to the upper layer
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// Destination for diagnostic records: `(level, subsystem, message)`.
pub type LogSink = Arc<dyn Fn(LogLevel, &str, &str) + Send + Sync>;

/// A sink that forwards records into `tracing` events.
///
/// The subsystem identifier is recorded as a `subsys` field so records from
/// several channels can be told apart by any `tracing` subscriber.
#[must_use]
pub fn tracing_sink() -> LogSink {
    Arc::new(|level, subsys, message| match level {
        LogLevel::Debug => tracing::debug!(subsys, "{message}"),
        LogLevel::Notice => tracing::info!(subsys, "{message}"),
        LogLevel::Warning => tracing::warn!(subsys, "{message}"),
        LogLevel::Error => tracing::error!(subsys, "{message}"),
    })
}

/// Logging configuration carried inside the transport configuration.
#[derive(Clone)]
pub struct LogConfig {
    /// Subsystem identifier stamped on every record from the channel
    pub subsys: String,
    /// Sink receiving the records
    pub sink: LogSink,
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("subsys", &self.subsys)
            .finish_non_exhaustive()
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            subsys: "NET".to_string(),
            sink: tracing_sink(),
        }
    }
}

/// Logging context bound into a channel at initialization time.
///
/// Cheap to clone; clones share the sink.
///
/// # Examples
/// ```
/// use ringlink_net::{LogConfig, NetLog};
///
/// let log = NetLog::new(&LogConfig::default());
/// log.notice("transport up");
/// ```
#[derive(Clone)]
pub struct NetLog {
    subsys: Arc<str>,
    sink: LogSink,
}

impl NetLog {
    /// Capture a context from the configured sink and subsystem identifier.
    #[must_use]
    pub fn new(config: &LogConfig) -> Self {
        Self {
            subsys: Arc::from(config.subsys.as_str()),
            sink: Arc::clone(&config.sink),
        }
    }

    /// The subsystem identifier this context stamps on records.
    #[must_use]
    pub fn subsys(&self) -> &str {
        &self.subsys
    }

    /// Emit one record at the given severity.
    pub fn emit(&self, level: LogLevel, message: &str) {
        (self.sink)(level, &self.subsys, message);
    }

    /// Emit at [`LogLevel::Debug`].
    pub fn debug(&self, message: &str) {
        self.emit(LogLevel::Debug, message);
    }

    /// Emit at [`LogLevel::Notice`].
    pub fn notice(&self, message: &str) {
        self.emit(LogLevel::Notice, message);
    }

    /// Emit at [`LogLevel::Warning`].
    pub fn warning(&self, message: &str) {
        self.emit(LogLevel::Warning, message);
    }

    /// Emit at [`LogLevel::Error`].
    pub fn error(&self, message: &str) {
        self.emit(LogLevel::Error, message);
    }
}

impl fmt::Debug for NetLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetLog")
            .field("subsys", &self.subsys)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capture_sink() -> (LogSink, Arc<Mutex<Vec<(LogLevel, String, String)>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&records);
        let sink: LogSink = Arc::new(move |level, subsys, message| {
            captured
                .lock()
                .unwrap()
                .push((level, subsys.to_string(), message.to_string()));
        });
        (sink, records)
    }

    #[test]
    fn test_records_carry_subsystem_and_level() {
        let (sink, records) = capture_sink();
        let log = NetLog::new(&LogConfig {
            subsys: "RING".to_string(),
            sink,
        });

        log.notice("transport up");
        log.warning("interface flapped");

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            (
                LogLevel::Notice,
                "RING".to_string(),
                "transport up".to_string()
            )
        );
        assert_eq!(records[1].0, LogLevel::Warning);
    }

    #[test]
    fn test_clones_share_sink() {
        let (sink, records) = capture_sink();
        let log = NetLog::new(&LogConfig {
            subsys: "NET".to_string(),
            sink,
        });
        let clone = log.clone();

        log.debug("one");
        clone.error("two");

        assert_eq!(records.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_default_config_routes_through_tracing() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let log = NetLog::new(&LogConfig::default());
            log.notice("transport selection goes through tracing");
            assert_eq!(log.subsys(), "NET");
        });
    }

    #[test]
    fn test_default_sink_is_safe_without_a_subscriber() {
        let log = NetLog::new(&LogConfig::default());
        log.debug("no subscriber installed");
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Notice);
        assert!(LogLevel::Notice < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }
}
