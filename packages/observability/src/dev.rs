//! JSONL file sink.
//!
//! Each `profile-sync` invocation is short-lived, so every run appends to the
//! same file and tags its lines with the active command span.

use crate::LogConfig;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// `~/.profile-sync/logs/profile-sync.jsonl`, or the temp dir without a home.
fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".profile-sync")
        .join("logs")
        .join("profile-sync.jsonl")
}

/// Append-only log file shared by every writer handed out to the subscriber.
#[derive(Clone)]
pub struct LogFile {
    inner: Arc<Mutex<LineWriter<File>>>,
}

impl LogFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(LineWriter::new(file))),
        })
    }
}

impl io::Write for LogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// One JSON object per event: event fields flattened, plus the innermost span.
pub(crate) fn jsonl_layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_ansi(false)
        .with_writer(make_writer)
}

/// Install the JSONL file layer, plus compact stderr output when requested.
pub fn init_dev_subscriber(config: &LogConfig) {
    let log_path = config.log_path.clone().unwrap_or_else(default_log_path);

    let log_file = match LogFile::open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("failed to open log file {}: {}", log_path.display(), e);
            crate::init_stderr_subscriber(config);
            return;
        }
    };

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(jsonl_layer(log_file).with_filter(crate::env_filter(&config.default_level)))
        .with(stderr_layer.map(|l| l.with_filter(crate::env_filter(&config.default_level))))
        .try_init();

    if installed.is_err() {
        return;
    }

    tracing::debug!(
        service = %config.service_name,
        pid = std::process::id(),
        log_path = %log_path.display(),
        "Logging initialized"
    );
}
