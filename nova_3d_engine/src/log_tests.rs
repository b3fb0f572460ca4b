//! Unit tests for the logging system
//!
//! The logger slot is global state, so tests that replace it run serially.

use std::sync::{Arc, Mutex};

use serial_test::serial;

use crate::log::{self, LogEntry, LogSeverity, Logger};

/// Logger that captures entries for inspection.
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

fn install_capture() -> Arc<Mutex<Vec<LogEntry>>> {
    let entries = Arc::new(Mutex::new(Vec::new()));
    log::set_logger(CaptureLogger {
        entries: Arc::clone(&entries),
    });
    entries
}

#[test]
#[serial]
fn macros_dispatch_with_severity_and_source() {
    let entries = install_capture();

    crate::engine_trace!("nova3d::test", "trace {}", 1);
    crate::engine_debug!("nova3d::test", "debug");
    crate::engine_info!("nova3d::test", "info");
    crate::engine_warn!("nova3d::test", "warn");

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 4);
    assert_eq!(captured[0].severity, LogSeverity::Trace);
    assert_eq!(captured[0].message, "trace 1");
    assert_eq!(captured[1].severity, LogSeverity::Debug);
    assert_eq!(captured[2].severity, LogSeverity::Info);
    assert_eq!(captured[3].severity, LogSeverity::Warn);
    assert!(captured.iter().all(|e| e.source == "nova3d::test"));
    assert!(captured.iter().all(|e| e.file.is_none() && e.line.is_none()));

    drop(captured);
    log::reset_logger();
}

#[test]
#[serial]
fn error_macro_records_file_and_line() {
    let entries = install_capture();

    crate::engine_error!("nova3d::test", "broken: {}", 42);

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);
    assert_eq!(captured[0].message, "broken: 42");
    assert!(captured[0].file.is_some());
    assert!(captured[0].line.is_some());

    drop(captured);
    log::reset_logger();
}

#[test]
#[serial]
fn engine_err_logs_and_returns_the_error_value() {
    let entries = install_capture();

    let error = crate::engine_err!("nova3d::test", "fence wait failed: {}", "TIMEOUT");
    assert!(matches!(error, crate::nova3d::Error::BackendError(_)));
    assert!(error.to_string().contains("fence wait failed"));

    let captured = entries.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].severity, LogSeverity::Error);

    drop(captured);
    log::reset_logger();
}

#[test]
#[serial]
fn engine_bail_early_returns() {
    fn failing() -> crate::nova3d::Result<u32> {
        crate::engine_bail!("nova3d::test", "index {} out of range", 7);
    }

    let entries = install_capture();
    let result = failing();
    assert!(result.is_err());
    assert_eq!(entries.lock().unwrap().len(), 1);

    log::reset_logger();
}

#[test]
#[serial]
fn severity_levels_are_ordered() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}
