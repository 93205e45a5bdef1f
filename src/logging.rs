use chrono::Utc;
use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Async, colored logger writing to stdout.
pub fn stdout_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}

/// Async logger writing plain text to a new file under `directory`, named after the current time.
pub fn file_logger<P: AsRef<Path>>(directory: P, name: &str) -> io::Result<slog::Logger> {
    let directory = directory.as_ref();
    fs::create_dir_all(directory)?;

    let now = Utc::now().format("%Y-%m-%dT%H-%M-%SZ");
    let log_path = directory.join(format!("{}_{}.log", name, now));
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logger_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = file_logger(dir.path().join("logs"), "node-1").unwrap();
            slog::info!(logger, "hello");
        }

        let files: Vec<_> = fs::read_dir(dir.path().join("logs")).unwrap().collect();
        assert_eq!(files.len(), 1);
        let name = files[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().starts_with("node-1_"));
    }
}
