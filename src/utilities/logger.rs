//! Crew-run console logging.
//!
//! Two pieces live here: the [`Logger`] used by crews when `verbose = true`
//! (timestamped, colored progress lines), and [`init_logging`], which installs
//! a minimal `log` facade backend for binaries. Library code always logs
//! through the `log` macros; the console logger is presentation only.

use chrono::Local;
use log::{Level, Metadata, Record};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::utilities::printer::{Printer, PrinterColor};

/// Verbose progress logger attached to crews and agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    /// Enables timestamped output. When false, `log()` is a no-op.
    pub verbose: bool,
    #[serde(skip)]
    printer: Printer,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            verbose: false,
            printer: Printer,
        }
    }
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            printer: Printer,
        }
    }

    /// Log a progress message with a timestamp if verbose mode is enabled.
    pub fn log(&self, level: &str, message: &str, color: Option<PrinterColor>) {
        if !self.verbose {
            return;
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let color = color.unwrap_or(PrinterColor::BoldYellow);
        self.printer.print(
            &format!("[{}][{}]: {}", timestamp, level.to_uppercase(), message),
            color,
        );
    }
}

struct ConsoleBackend {
    max_level: Level,
}

impl log::Log for ConsoleBackend {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        eprintln!(
            "{} {:5} [{}] {}",
            timestamp,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static BACKEND: OnceCell<ConsoleBackend> = OnceCell::new();

/// Install the console backend for the `log` facade.
///
/// Reads `OKAMI_LOG_LEVEL` (debug|info|warn|error, default info). Safe to
/// call more than once; only the first call installs.
pub fn init_logging() {
    let level = std::env::var("OKAMI_LOG_LEVEL")
        .ok()
        .and_then(|v| v.to_lowercase().parse::<Level>().ok())
        .unwrap_or(Level::Info);

    let backend = BACKEND.get_or_init(|| ConsoleBackend { max_level: level });
    if log::set_logger(backend).is_ok() {
        log::set_max_level(level.to_level_filter());
    }
}
