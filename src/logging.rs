//! Logging configuration using the tracing ecosystem.
//!
//! This module configures structured logging with:
//! - File-based output with daily rotation
//! - Environment-based log level configuration
//! - Credential masking on everything written to the log
//!
//! Libraries normally leave subscriber setup to the application; [`init`] is
//! here for scripts and tools that want jiraone's defaults.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Default log level if RUST_LOG is not set.
pub const DEFAULT_LOG_FILTER: &str = "jiraone=info,warn";

/// Replacement for masked values.
pub const MASK: &str = "***MASKED***";

const LOG_FILE_PREFIX: &str = "jiraone.log";

/// Initialize the logging system in the default log directory.
///
/// Sets up tracing with:
/// - Daily rotating file appender in the user's local data directory
/// - Log level configuration via `RUST_LOG`, falling back to `filter` and
///   then to [`DEFAULT_LOG_FILTER`]
/// - Structured output with file/line numbers and thread IDs
///
/// # Log Directory
///
/// - Linux: `~/.local/share/jiraone/logs/`
/// - macOS: `~/Library/Application Support/jiraone/logs/`
/// - Windows: `C:\Users\<User>\AppData\Local\jiraone\logs\`
///
/// # Errors
///
/// Returns an error if:
/// - The log directory cannot be determined or created
/// - A global subscriber is already set
///
/// # Example
///
/// ```no_run
/// use jiraone::logging;
///
/// logging::init(None).expect("Failed to initialize logging");
/// ```
pub fn init(filter: Option<&str>) -> anyhow::Result<()> {
    init_in(&get_log_directory()?, filter)
}

/// Like [`init`], writing logs under `log_dir`.
pub fn init_in(log_dir: &Path, filter: Option<&str>) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(MaskingMakeWriter::new(file_appender))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter);

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "jiraone logging started");
    tracing::debug!(log_dir = %log_dir.display(), "Log directory");

    Ok(())
}

/// Get the log directory path.
fn get_log_directory() -> anyhow::Result<PathBuf> {
    let base_dir = dirs::data_local_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine local data directory"))?;

    Ok(base_dir.join("jiraone").join("logs"))
}

/// Get the path where logs are stored.
pub fn log_directory() -> Option<PathBuf> {
    get_log_directory().ok()
}

fn sensitive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r#"(?i)((?:api[_-]?token|apitoken)["\s:=]+["']?)([A-Za-z0-9_\-.]+)"#,
            r#"(?i)(bearer\s+)([A-Za-z0-9_\-.~+/]+=*)"#,
            r#"(?i)(basic\s+)([A-Za-z0-9+/]+=*)"#,
            r#"(?i)((?:password|passwd|pwd)["\s:=]+["']?)([^\s"',]+)"#,
            r#"(?i)((?:access[_-]?token|refresh[_-]?token)["\s:=]+["']?)([A-Za-z0-9_\-.]+)"#,
            r#"(?i)((?:client[_-]?secret)["\s:=]+["']?)([A-Za-z0-9_\-.]+)"#,
            r#"(?i)((?:secret|private[_-]?key|api[_-]?key)["\s:=]+["']?)([A-Za-z0-9_\-.]+)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid masking regex"))
        .collect()
    })
}

/// Replace passwords, tokens and keys in `text` with [`MASK`], keeping the
/// label in front of each value.
pub fn mask_sensitive(text: &str) -> String {
    let mut masked = text.to_string();
    for pattern in sensitive_patterns() {
        if pattern.is_match(&masked) {
            masked = pattern
                .replace_all(&masked, format!("${{1}}{}", MASK).as_str())
                .into_owned();
        }
    }
    masked
}

/// Shorten a secret for display: `abcdef89` becomes `ab***89`.
///
/// Values of four characters or fewer are hidden entirely.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

/// A [`MakeWriter`] that masks credentials before they reach `inner`.
#[derive(Debug)]
pub struct MaskingMakeWriter<M> {
    inner: M,
}

impl<M> MaskingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for MaskingMakeWriter<M> {
    type Writer = MaskingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        MaskingWriter {
            inner: self.inner.make_writer(),
        }
    }
}

/// Writer half of [`MaskingMakeWriter`].
///
/// The fmt layer hands over one formatted event per write, so each event is
/// masked as a whole.
#[derive(Debug)]
pub struct MaskingWriter<W> {
    inner: W,
}

impl<W: io::Write> io::Write for MaskingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner.write_all(mask_sensitive(&text).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
