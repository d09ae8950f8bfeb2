//! Statement and error logging.
//!
//! A [`Logger`] receives [`LogEntry`] values. What reaches it depends on the
//! handle's [`LogMode`]:
//!
//! | Mode | SQL statements | Errors |
//! |------|----------------|--------|
//! | `Silent` | never | never |
//! | `Errors` | never | on a shared background thread |
//! | `Verbose` | synchronously | synchronously |
//!
//! Background error logging is fire-and-forget: the chain does not wait for
//! it, and entries from separate errors may arrive in any order.

use crossbeam_channel::{Sender, TrySendError, bounded};
use sqlscope_core::{Error, Value};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// How much a handle logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    /// Log nothing.
    Silent,
    /// Log errors other than record-not-found, off the calling thread.
    #[default]
    Errors,
    /// Log every statement and every error on the calling thread.
    Verbose,
}

impl FromStr for LogMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" | "off" | "false" | "0" => Ok(LogMode::Silent),
            "errors" | "error" => Ok(LogMode::Errors),
            "verbose" | "debug" | "true" | "1" => Ok(LogMode::Verbose),
            other => Err(Error::Custom(format!("unknown log mode: {}", other))),
        }
    }
}

/// One thing worth logging.
#[derive(Debug, Clone)]
pub enum LogEntry {
    /// An executed statement.
    Sql {
        sql: String,
        vars: Vec<Value>,
        elapsed: Duration,
        rows_affected: u64,
    },
    /// An error recorded on a handle.
    Error(Error),
    /// A free-form message.
    Info(String),
}

/// Receives log entries.
pub trait Logger: Send + Sync {
    fn print(&self, entry: &LogEntry);
}

/// The default logger: emits `tracing` events.
///
/// Statements go to target `sqlscope::sql` at DEBUG, errors to
/// `sqlscope::error` at ERROR, and messages to `sqlscope` at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn print(&self, entry: &LogEntry) {
        match entry {
            LogEntry::Sql {
                sql,
                vars,
                elapsed,
                rows_affected,
            } => {
                tracing::debug!(
                    target: "sqlscope::sql",
                    sql = %sql,
                    vars = %format_vars(vars),
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    rows_affected = *rows_affected,
                    "executed statement"
                );
            }
            LogEntry::Error(error) => {
                tracing::error!(target: "sqlscope::error", error = %error, "operation failed");
            }
            LogEntry::Info(message) => {
                tracing::info!(target: "sqlscope", "{}", message);
            }
        }
    }
}

fn format_vars(vars: &[Value]) -> String {
    let parts: Vec<String> = vars.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

/// Dispatch an error entry per `mode`.
pub(crate) fn log_error(logger: &Arc<dyn Logger>, mode: LogMode, error: &Error) {
    match mode {
        LogMode::Silent => {}
        LogMode::Errors => {
            let job = (Arc::clone(logger), LogEntry::Error(error.clone()));
            match background() {
                Some(tx) => {
                    if let Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) =
                        tx.try_send(job)
                    {
                        job.0.print(&job.1);
                    }
                }
                None => job.0.print(&job.1),
            }
        }
        LogMode::Verbose => logger.print(&LogEntry::Error(error.clone())),
    }
}

type LogJob = (Arc<dyn Logger>, LogEntry);

/// Entries queued beyond this are printed on the calling thread.
const BACKGROUND_QUEUE: usize = 1024;

/// The shared error-logging thread, started on first use.
fn background() -> Option<&'static Sender<LogJob>> {
    static WORKER: OnceLock<Option<Sender<LogJob>>> = OnceLock::new();
    WORKER
        .get_or_init(|| {
            let (tx, rx) = bounded::<LogJob>(BACKGROUND_QUEUE);
            let spawned = std::thread::Builder::new()
                .name("sqlscope-log".into())
                .spawn(move || {
                    while let Ok((logger, entry)) = rx.recv() {
                        logger.print(&entry);
                    }
                });
            match spawned {
                Ok(_) => Some(tx),
                Err(e) => {
                    tracing::warn!(target: "sqlscope", error = %e, "logging thread unavailable");
                    None
                }
            }
        })
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<String>>);

    impl Logger for Capture {
        fn print(&self, entry: &LogEntry) {
            if let Ok(mut lines) = self.0.lock() {
                lines.push(format!("{:?}", entry));
            }
        }
    }

    /// Forwards each error message with the name of the printing thread.
    struct Notify(Sender<(String, Option<String>)>);

    impl Logger for Notify {
        fn print(&self, entry: &LogEntry) {
            if let LogEntry::Error(e) = entry {
                let thread = std::thread::current().name().map(String::from);
                let _ = self.0.send((e.to_string(), thread));
            }
        }
    }

    #[test]
    fn parses_modes() {
        assert_eq!("silent".parse::<LogMode>().unwrap(), LogMode::Silent);
        assert_eq!(" Verbose ".parse::<LogMode>().unwrap(), LogMode::Verbose);
        assert_eq!("errors".parse::<LogMode>().unwrap(), LogMode::Errors);
        assert!("loud".parse::<LogMode>().is_err());
    }

    #[test]
    fn silent_and_verbose_are_synchronous() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let logger: Arc<dyn Logger> = capture.clone();
        log_error(&logger, LogMode::Silent, &Error::Custom("quiet".into()));
        assert!(capture.0.lock().unwrap().is_empty());
        log_error(&logger, LogMode::Verbose, &Error::Custom("loud".into()));
        assert_eq!(capture.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn errors_mode_logs_in_background() {
        let (tx, rx) = unbounded();
        let logger: Arc<dyn Logger> = Arc::new(Notify(tx));
        log_error(&logger, LogMode::Errors, &Error::Custom("later".into()));
        let (got, _) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(got, "later");
    }

    #[test]
    fn error_bursts_share_one_thread() {
        let (tx, rx) = unbounded();
        let logger: Arc<dyn Logger> = Arc::new(Notify(tx));
        for i in 0..64 {
            log_error(&logger, LogMode::Errors, &Error::Custom(format!("e{i}")));
        }
        let mut seen = Vec::new();
        for _ in 0..64 {
            let (message, thread) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(thread.as_deref(), Some("sqlscope-log"));
            seen.push(message);
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 64);
    }
}
