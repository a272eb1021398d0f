use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::{Lazy, OnceCell};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload};
use zkbind_native_core::{
    ZOO_LOG_LEVEL_DEBUG, ZOO_LOG_LEVEL_ERROR, ZOO_LOG_LEVEL_INFO, ZOO_LOG_LEVEL_WARN,
};

use crate::config::BindConfig;

#[derive(Debug)]
pub enum LogTarget {
    Stderr,
    Stdout,
    File(String),
}

impl LogTarget {
    /// `None`, empty and "stderr" all mean stderr.
    pub fn parse(target: Option<&str>) -> LogTarget {
        match target.map(str::trim) {
            None | Some("") | Some("stderr") => LogTarget::Stderr,
            Some("stdout") => LogTarget::Stdout,
            Some(path) => LogTarget::File(path.to_string()),
        }
    }
}

enum LogSink {
    Stderr,
    Stdout,
    File(File),
}

#[derive(Clone)]
struct SinkWriter(Arc<Mutex<LogSink>>);

impl SinkWriter {
    fn sink(&self) -> MutexGuard<'_, LogSink> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.sink() {
            LogSink::Stderr => io::stderr().write(buf),
            LogSink::Stdout => io::stdout().write(buf),
            LogSink::File(f) => f.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.sink() {
            LogSink::Stderr => io::stderr().flush(),
            LogSink::Stdout => io::stdout().flush(),
            LogSink::File(f) => f.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for SinkWriter {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> SinkWriter {
        self.clone()
    }
}

type FilterHandle = reload::Handle<LevelFilter, tracing_subscriber::Registry>;

static SINK: Lazy<SinkWriter> = Lazy::new(|| SinkWriter(Arc::new(Mutex::new(LogSink::Stderr))));
static FILTER: OnceCell<Option<FilterHandle>> = OnceCell::new();
static LEVEL: AtomicI32 = AtomicI32::new(ZOO_LOG_LEVEL_INFO);

/// Maps a client-library log level onto a tracing filter. Zero turns
/// logging off; everything else clamps into ERROR..=DEBUG.
pub fn level_filter(level: i32) -> LevelFilter {
    if level == 0 {
        return LevelFilter::OFF;
    }
    match level.clamp(ZOO_LOG_LEVEL_ERROR, ZOO_LOG_LEVEL_DEBUG) {
        ZOO_LOG_LEVEL_ERROR => LevelFilter::ERROR,
        ZOO_LOG_LEVEL_WARN => LevelFilter::WARN,
        ZOO_LOG_LEVEL_INFO => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

fn effective_level(level: i32) -> i32 {
    if level == 0 {
        0
    } else {
        level.clamp(ZOO_LOG_LEVEL_ERROR, ZOO_LOG_LEVEL_DEBUG)
    }
}

/// Installs the global subscriber once. Returns false when another
/// subscriber was already in place; level and stream changes then only
/// update the local state.
pub fn install(config: &BindConfig) -> bool {
    let installed = FILTER.get_or_init(|| {
        let level = effective_level(config.log_level);
        LEVEL.store(level, Ordering::Release);
        if let Some(path) = &config.log_file {
            if let Err(err) = set_stream(LogTarget::File(path.clone())) {
                eprintln!("zkbind: cannot open log file {path}: {err}");
            }
        }
        let (filter, handle) = reload::Layer::new(level_filter(level));
        let layer = fmt::layer()
            .with_writer(SINK.clone())
            .with_ansi(false)
            .with_thread_names(true);
        match tracing_subscriber::registry().with(filter).with(layer).try_init() {
            Ok(()) => Some(handle),
            Err(_) => None,
        }
    });
    installed.is_some()
}

pub fn set_level(level: i32) -> i32 {
    let level = effective_level(level);
    LEVEL.store(level, Ordering::Release);
    if let Some(Some(handle)) = FILTER.get() {
        if let Err(err) = handle.reload(level_filter(level)) {
            eprintln!("zkbind: cannot change log level: {err}");
        }
    }
    level
}

pub fn level() -> i32 {
    LEVEL.load(Ordering::Acquire)
}

pub fn set_stream(target: LogTarget) -> io::Result<()> {
    let sink = match target {
        LogTarget::Stderr => LogSink::Stderr,
        LogTarget::Stdout => LogSink::Stdout,
        LogTarget::File(path) => {
            LogSink::File(OpenOptions::new().create(true).append(true).open(path)?)
        }
    };
    *SINK.sink() = sink;
    Ok(())
}
