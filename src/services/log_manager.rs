// LogManager Service
// Log file sink, retention cleanup and reading

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

pub const LOG_FILE_NAME: &str = "spiritstream-failover.log";

/// `log` backend appending `[date][time][target][level] message` lines to
/// a file and echoing them to stderr
pub struct FileLogger {
    file: Mutex<fs::File>,
    level: LevelFilter,
}

impl FileLogger {
    pub fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, String> {
        fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {e}"))?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))
            .map_err(|e| format!("Failed to open log file: {e}"))?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

fn format_line(record: &Record) -> String {
    let timestamp = Local::now();
    let date = timestamp.format("%Y-%m-%d");
    let time = timestamp.format("%H:%M:%S");
    format!(
        "[{date}][{time}][{}][{}] {}",
        record.target(),
        record.level(),
        record.args()
    )
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(record);
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
        eprintln!("{line}");
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

/// Install the file logger as the global `log` backend
pub fn init_logger(log_dir: &Path, level: LevelFilter) -> Result<(), String> {
    let logger = FileLogger::new(log_dir, level)?;
    log::set_boxed_logger(Box::new(logger)).map_err(|e| format!("Failed to set logger: {e}"))?;
    log::set_max_level(level);
    Ok(())
}

/// Delete `.log` files older than the retention window. Zero keeps everything.
pub fn prune_logs(log_dir: &Path, retention_days: u32) -> Result<usize, String> {
    if retention_days == 0 || !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = fs::read_dir(log_dir).map_err(|e| format!("Failed to read log dir: {e}"))?;
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("log") {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|metadata| metadata.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

/// Last `max_lines` non-empty lines of the newest log file
pub fn read_recent_logs(log_dir: &Path, max_lines: usize) -> Result<Vec<String>, String> {
    let Some(log_file) = find_latest_log_file(log_dir) else {
        return Ok(Vec::new());
    };

    let bytes = fs::read(&log_file).map_err(|e| format!("Failed to read log file: {e}"))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();

    let start = lines.len().saturating_sub(max_lines);
    Ok(lines[start..].to_vec())
}

fn find_latest_log_file(log_dir: &Path) -> Option<PathBuf> {
    fs::read_dir(log_dir)
        .ok()?
        .flatten()
        .filter(|entry| entry.path().extension().and_then(|ext| ext.to_str()) == Some("log"))
        .max_by_key(|entry| {
            entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
        .map(|entry| entry.path())
}
