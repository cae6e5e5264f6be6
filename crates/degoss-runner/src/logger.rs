use chrono::Local;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{Dispatch, Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

pub const LOG_TARGET: &str = "degoss";
const DISK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

#[derive(Clone)]
pub struct RunLogger {
    dispatch: Dispatch,
    buffer: SharedBuffer,
    disk: DiskSink,
    debug: bool,
}

impl RunLogger {
    pub fn new(debug: bool) -> Self {
        let buffer = SharedBuffer::default();
        let disk = DiskSink::default();
        let level = if debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let subscriber = tracing_subscriber::registry()
            .with(level)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .event_format(LineFormat::Buffer)
                    .with_writer(buffer.clone()),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .event_format(LineFormat::Disk)
                    .with_writer(disk.clone()),
            );
        Self {
            dispatch: Dispatch::new(subscriber),
            buffer,
            disk,
            debug,
        }
    }

    pub fn attach_file(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.disk.0) = Some(file);
        self.debug(format_args!(
            "Logging configuration: debug={}, log_file={}",
            self.debug,
            path.display()
        ));
        Ok(())
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.emit(Level::DEBUG, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.emit(Level::INFO, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.emit(Level::WARN, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.emit(Level::ERROR, message);
    }

    fn emit(&self, level: Level, message: impl fmt::Display) {
        tracing::dispatcher::with_default(&self.dispatch, || {
            if level == Level::ERROR {
                tracing::error!(target: LOG_TARGET, "{}", message);
            } else if level == Level::WARN {
                tracing::warn!(target: LOG_TARGET, "{}", message);
            } else if level == Level::INFO {
                tracing::info!(target: LOG_TARGET, "{}", message);
            } else {
                tracing::debug!(target: LOG_TARGET, "{}", message);
            }
        });
    }

    pub fn buffered_lines(&self) -> Vec<String> {
        let bytes = lock(&self.buffer.0).clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn level_name(level: &Level) -> &'static str {
    if *level == Level::ERROR {
        "ERROR"
    } else if *level == Level::WARN {
        "WARN"
    } else if *level == Level::INFO {
        "INFO"
    } else if *level == Level::DEBUG {
        "DEBUG"
    } else {
        "TRACE"
    }
}

#[derive(Clone, Copy)]
enum LineFormat {
    Buffer,
    Disk,
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        match self {
            LineFormat::Buffer => {
                write!(writer, "[{:<5}] ", level_name(meta.level()))?;
            }
            LineFormat::Disk => {
                write!(
                    writer,
                    "{} [{:<5}] {}: ",
                    Local::now().format(DISK_TIME_FORMAT),
                    level_name(meta.level()),
                    meta.target()
                )?;
            }
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = SharedBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// File sink that discards output until a file is attached. Write errors are
/// swallowed: logging never fails a run.
#[derive(Clone, Default)]
struct DiskSink(Arc<Mutex<Option<File>>>);

impl io::Write for DiskSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = lock(&self.0).as_mut() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = lock(&self.0).as_mut() {
            let _ = file.flush();
        }
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for DiskSink {
    type Writer = DiskSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::unique_test_dir;
    use std::fs;

    #[test]
    fn buffer_uses_short_level_names() {
        let logger = RunLogger::new(false);
        logger.warn("disk is getting full");
        logger.info(format_args!("{} of {}", 1, 2));
        assert_eq!(
            logger.buffered_lines(),
            vec![
                "[WARN ] disk is getting full".to_string(),
                "[INFO ] 1 of 2".to_string()
            ]
        );
    }

    #[test]
    fn info_threshold_drops_debug() {
        let quiet = RunLogger::new(false);
        let verbose = RunLogger::new(true);
        quiet.debug("hidden");
        verbose.debug("shown");
        assert!(quiet.buffered_lines().is_empty());
        assert_eq!(verbose.buffered_lines(), vec!["[DEBUG] shown".to_string()]);
    }

    #[test]
    fn loggers_do_not_share_buffers() {
        let a = RunLogger::new(false);
        let b = RunLogger::new(false);
        a.error("only in a");
        assert_eq!(a.buffered_lines().len(), 1);
        assert!(b.buffered_lines().is_empty());
    }

    #[test]
    fn attached_file_receives_subsequent_lines() {
        let root = unique_test_dir("logger_file");
        fs::create_dir_all(&root).expect("root");
        let path = root.join("degoss.log");

        let logger = RunLogger::new(false);
        logger.info("before attach");
        logger.attach_file(&path).expect("attach");
        logger.error("after attach");

        let text = fs::read_to_string(&path).expect("read log");
        assert!(!text.contains("before attach"), "unexpected: {}", text);
        assert!(text.contains("[ERROR] degoss: after attach"), "got: {}", text);
        assert_eq!(logger.buffered_lines().len(), 2);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn level_names_cover_all_levels() {
        assert_eq!(level_name(&Level::WARN), "WARN");
        assert_eq!(level_name(&Level::ERROR), "ERROR");
        assert_eq!(level_name(&Level::TRACE), "TRACE");
    }
}
