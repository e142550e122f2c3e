//! `log` facade backend with a pluggable byte sink.
//!
//! The embedder decides where records go (serial port, debug console); the
//! core only formats. Records written at `Info` and above are also copied
//! into the kernel log ring so `log_read` handles can observe them.

use core::fmt::Write as _;

use log::{Level, LevelFilter, Metadata, Record};
use spin::Once;

/// Byte sink provided by the embedder.
pub type Sink = fn(&str);

static SINK: Once<Sink> = Once::new();

struct CoreLogger;

static LOGGER: CoreLogger = CoreLogger;

impl log::Log for CoreLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut line = heapless_line();
        let _ = write!(line, "[{}] {}", level_str, record.args());

        if let Some(sink) = SINK.get() {
            sink(line.as_str());
        }
        if record.level() <= Level::Info {
            crate::object::log::klog_write_kernel(line.as_bytes());
        }
    }

    fn flush(&self) {}
}

// Fixed-size formatting buffer; log lines never allocate.
struct Line {
    buf: [u8; 256],
    len: usize,
}

impl Line {
    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("<bad utf8>")
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl core::fmt::Write for Line {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

fn heapless_line() -> Line {
    Line { buf: [0; 256], len: 0 }
}

/// Install the logger with the given sink. Idempotent; the first caller's
/// sink wins.
pub fn init(sink: Sink) {
    SINK.call_once(|| sink);
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Trace));
}
