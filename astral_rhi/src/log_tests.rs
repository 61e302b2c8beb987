use super::*;

use std::sync::Mutex;

use serial_test::serial;

struct CaptureLogger {
    entries: Mutex<Vec<(LogSeverity, &'static str, String)>>,
}

impl CaptureLogger {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    fn entries(&self) -> Vec<(LogSeverity, &'static str, String)> {
        self.entries.lock().unwrap().clone()
    }
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap()
            .push((entry.severity, entry.source, entry.message.clone()));
    }
}

#[test]
#[serial]
fn custom_logger_receives_entries() {
    let capture = CaptureLogger::new();
    set_logger(capture.clone());

    crate::rhi_info!("rhi::test", "device ready: {}", "mock");
    crate::rhi_warn!("rhi::test", "something odd");

    reset_logger();

    let entries = capture.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0], (LogSeverity::Info, "rhi::test", "device ready: mock".into()));
    assert_eq!(entries[1].0, LogSeverity::Warn);
}

#[test]
#[serial]
fn error_macro_attaches_file_and_line() {
    struct FileCheck(Mutex<Option<(Option<&'static str>, Option<u32>)>>);
    impl Logger for FileCheck {
        fn log(&self, entry: &LogEntry) {
            *self.0.lock().unwrap() = Some((entry.file, entry.line));
        }
    }

    let logger = Arc::new(FileCheck(Mutex::new(None)));
    set_logger(logger.clone());
    crate::rhi_error!("rhi::test", "boom");
    reset_logger();

    let (file, line) = logger.0.lock().unwrap().take().unwrap();
    assert!(file.unwrap().ends_with("log_tests.rs"));
    assert!(line.unwrap() > 0);
}

#[test]
fn severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}
