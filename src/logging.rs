//! Asynchronous log sink with daily and line-count based rotation.
//!
//! Unlike the lazy `Log::instance()` singleton this was grounded on, a
//! `Logger` here is an explicit value: callers build one from `LogConfig`
//! and hand an `Arc<Logger>` to whatever needs to log. This keeps the sink
//! out of global mutable state and makes it trivial to swap in a
//! throwaway logger in tests.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{Datelike, Local};

use crate::blocking_queue::BlockingQueue;
use crate::config::LogConfig;

const MAX_LINES: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Debug => "[DEBUG]: ",
            Level::Info => "[INFO] : ",
            Level::Warn => "[WARN] : ",
            Level::Error => "[ERROR]: ",
        }
    }

    pub fn parse(s: &str) -> Level {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Level::Debug,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }
}

struct FileState {
    file: File,
    today: u32,
    line_count: u64,
}

struct Shared {
    state: Mutex<FileState>,
    dirname: PathBuf,
    filename: String,
}

impl Shared {
    fn path_for(&self, suffix: Option<u64>) -> PathBuf {
        let now = Local::now();
        let stem = now.format("%Y_%m_%d").to_string();
        match suffix {
            Some(n) => self.dirname.join(format!("{stem}{}-{n}", self.filename)),
            None => self.dirname.join(format!("{stem}{}", self.filename)),
        }
    }

    fn rotate(&self, state: &mut FileState, suffix: Option<u64>) {
        let path = self.path_for(suffix);
        let _ = state.file.flush();
        if let Ok(f) = OpenOptions::new().create(true).append(true).open(&path) {
            state.file = f;
        }
    }

    fn write_line(&self, line: &str) {
        let mut state = self.state.lock().unwrap();
        let today = Local::now().day();
        let rolled_by_day = today != state.today;
        let rolled_by_size = state.line_count != 0 && state.line_count % MAX_LINES == 0;
        if rolled_by_day {
            state.today = today;
            state.line_count = 0;
            self.rotate(&mut state, None);
        } else if rolled_by_size {
            let suffix = state.line_count / MAX_LINES;
            self.rotate(&mut state, Some(suffix));
        }
        state.line_count += 1;
        let _ = state.file.write_all(line.as_bytes());
    }
}

enum Sink {
    Sync,
    Async {
        queue: Arc<BlockingQueue<String>>,
        writer: Mutex<Option<JoinHandle<()>>>,
    },
}

/// An open, rotating log sink.
pub struct Logger {
    level: Level,
    shared: Arc<Shared>,
    sink: Sink,
}

impl Logger {
    /// Opens (or creates) the log directory and today's log file and, if
    /// `config.queue_capacity > 0`, starts a background writer thread.
    pub fn new(config: &LogConfig, filename: &str) -> std::io::Result<Arc<Logger>> {
        std::fs::create_dir_all(&config.directory)?;
        let now = Local::now();
        let stem = now.format("%Y_%m_%d").to_string();
        let path = config.directory.join(format!("{stem}{filename}"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let shared = Arc::new(Shared {
            state: Mutex::new(FileState {
                file,
                today: now.day(),
                line_count: 0,
            }),
            dirname: config.directory.clone(),
            filename: filename.to_string(),
        });

        let sink = if config.queue_capacity > 0 {
            let queue: Arc<BlockingQueue<String>> = Arc::new(BlockingQueue::new(config.queue_capacity));
            let worker_shared = Arc::clone(&shared);
            let worker_queue = Arc::clone(&queue);
            let handle = std::thread::Builder::new()
                .name("log-writer".into())
                .spawn(move || {
                    while let Some(line) = worker_queue.pop() {
                        worker_shared.write_line(&line);
                    }
                })
                .expect("spawn log writer thread");
            Sink::Async {
                queue,
                writer: Mutex::new(Some(handle)),
            }
        } else {
            Sink::Sync
        };

        Ok(Arc::new(Logger {
            level: Level::parse(&config.level),
            shared,
            sink,
        }))
    }

    /// Builds a logger that writes to a throwaway temp-dir file, for tests
    /// and benches that need an `Arc<Logger>` but don't care about output.
    pub fn discard() -> Arc<Logger> {
        let dir = std::env::temp_dir().join(format!("edgeweb-test-log-{:p}", &()));
        let cfg = LogConfig {
            enabled: true,
            level: "debug".into(),
            directory: dir,
            queue_capacity: 0,
        };
        Logger::new(&cfg, "-test.log").unwrap()
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Formats and writes one log line if `level` meets the configured
    /// threshold. Below threshold this is a no-op (the format arguments are
    /// still evaluated by the caller's macro, matching the original's
    /// behavior).
    pub fn log(&self, level: Level, args: std::fmt::Arguments<'_>) {
        if level < self.level {
            return;
        }
        let now = Local::now();
        let line = format!(
            "{} {}{}\n",
            now.format("%Y-%m-%d %H:%M:%S%.6f"),
            level.tag(),
            args
        );
        match &self.sink {
            Sink::Sync => self.shared.write_line(&line),
            Sink::Async { queue, .. } => {
                if !queue.push(line.clone()) {
                    self.shared.write_line(&line);
                }
            }
        }
    }

    /// Flushes the underlying file, waking the async writer first if one
    /// is running.
    pub fn flush(&self) {
        if let Sink::Async { queue, .. } = &self.sink {
            queue.flush();
        }
        let mut state = self.shared.state.lock().unwrap();
        let _ = state.file.flush();
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if let Sink::Async { queue, writer } = &self.sink {
            queue.close();
            if let Some(handle) = writer.lock().unwrap().take() {
                let _ = handle.join();
            }
        }
        self.flush();
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::logging::Level::Debug, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::logging::Level::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::logging::Level::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.log($crate::logging::Level::Error, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_logger_writes_a_readable_file() {
        let dir = std::env::temp_dir().join(format!("edgeweb-test-sync-{}", std::process::id()));
        let cfg = LogConfig {
            enabled: true,
            level: "info".into(),
            directory: dir.clone(),
            queue_capacity: 0,
        };
        let logger = Logger::new(&cfg, "-test.log").unwrap();
        log_info!(logger, "hello {}", 42);
        logger.flush();
        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert!(!entries.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn below_threshold_messages_are_dropped() {
        let logger = Logger::discard();
        assert_eq!(logger.level(), Level::Debug);
        log_debug!(logger, "kept");
    }

    #[test]
    fn async_logger_drains_queue_on_drop() {
        let dir = std::env::temp_dir().join(format!("edgeweb-test-async-{}", std::process::id()));
        let cfg = LogConfig {
            enabled: true,
            level: "debug".into(),
            directory: dir.clone(),
            queue_capacity: 8,
        };
        {
            let logger = Logger::new(&cfg, "-test.log").unwrap();
            for i in 0..20 {
                log_debug!(logger, "line {i}");
            }
        }
        let entries: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert!(!entries.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }
}
