use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1B[31m", // Red
        Level::Warn => "\x1B[33m",  // Yellow
        Level::Info => "\x1B[32m",  // Green
        Level::Debug => "\x1B[36m", // Cyan
        Level::Trace => "\x1B[35m", // Magenta
    }
}

pub fn setup_logging() {
    let colored = atty::is(atty::Stream::Stderr);

    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_env("RUST_LOG")
        .format(move |buf, record| {
            let timestamp = humantime::format_rfc3339_millis(SystemTime::now());
            let level = record.level();

            if colored {
                write!(buf, "{}{:>5}\x1B[0m", level_color(level), level)?;
            } else {
                write!(buf, "{:>5}", level)?;
            }
            write!(buf, " [{}] {}", timestamp, record.args())?;

            // Only include file and line for debug/trace levels
            if level >= Level::Debug {
                write!(
                    buf,
                    " - {}:{}",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )?;
            }
            writeln!(buf)
        })
        .init();
}

#[macro_export]
macro_rules! log_request {
    ($method:expr, $target:expr) => {
        log::info!("→ {} {}", $method, $target)
    };
}

#[macro_export]
macro_rules! log_response {
    ($status:expr, $duration:expr, $bytes:expr) => {
        log::info!("← {} ({:?}) - {} bytes", $status, $duration, $bytes)
    };
}

#[macro_export]
macro_rules! log_error {
    ($error:expr, $context:expr) => {
        log::error!("❌ {} - {}", $context, $error)
    };
}

pub trait Loggable {
    fn log_description(&self) -> String;
}

impl Loggable for Path {
    fn log_description(&self) -> String {
        self.display().to_string()
    }
}

pub trait LoggingExt: Loggable {
    /// Runs a fallible filesystem operation, logging its outcome against `self`.
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display;
}

impl<S: ?Sized + Loggable> LoggingExt for S {
    fn log_operation<F, T, E>(&self, operation: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::fmt::Display,
    {
        log::debug!("Starting {} on {}", operation, self.log_description());
        match f() {
            Ok(result) => {
                log::debug!("Completed {} on {}", operation, self.log_description());
                Ok(result)
            }
            Err(e) => {
                log::warn!("Failed {} on {}: {}", operation, self.log_description(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn log_operation_passes_results_through() {
        let path = Path::new("/var/logs/a.log");
        let ok: io::Result<u32> = path.log_operation("stat", || Ok(7));
        assert_eq!(ok.unwrap(), 7);

        let err: io::Result<u32> =
            path.log_operation("stat", || Err(io::ErrorKind::NotFound.into()));
        assert_eq!(err.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn describes_paths() {
        assert_eq!(Path::new("/a/b").log_description(), "/a/b");
    }
}
