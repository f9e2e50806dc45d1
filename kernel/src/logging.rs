//! `log` backend for the kernel.
//!
//! The VM core never owns an output device, so records are formatted here and
//! handed to a sink supplied by whoever boots the kernel (a serial port writer,
//! a test buffer). Until [`init`] runs every record is dropped.

use alloc::boxed::Box;
use core::error::Error;
use core::fmt::{self, Arguments, Display, Formatter, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::race::OnceBox;

/// Receives one fully formatted line per record, without a trailing newline.
pub type Sink = fn(Arguments<'_>);

struct KernelLogger {
    sink: OnceBox<Sink>,
}

static LOGGER: KernelLogger = KernelLogger {
    sink: OnceBox::new(),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink(format_args!("{}", Line(record)));
        }
    }

    fn flush(&self) {}
}

const fn level_color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // red
        Level::Warn => 93,  // bright yellow
        Level::Info => 34,  // blue
        Level::Debug => 32, // green
        Level::Trace => 90, // bright black
    }
}

struct Line<'a>(&'a Record<'a>);

impl Display for Line<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let record = self.0;
        write!(
            f,
            "\u{1B}[{}m[{:>5}] {}: {}\u{1B}[0m",
            level_color(record.level()),
            record.level(),
            record.target(),
            record.args(),
        )
    }
}

/// Writes `record` the way the kernel logger prints it, colour codes included.
pub fn format_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    write!(out, "{}", Line(record))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoggerError {
    AlreadyInitialized,
}

impl Display for LoggerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoggerError::AlreadyInitialized => write!(f, "kernel logger already installed"),
        }
    }
}

impl Error for LoggerError {}

/// Installs the kernel logger. Only the first call succeeds.
pub fn init(level: LevelFilter, sink: Sink) -> Result<(), LoggerError> {
    LOGGER
        .sink
        .set(Box::new(sink))
        .map_err(|_| LoggerError::AlreadyInitialized)?;
    log::set_logger(&LOGGER).map_err(|_| LoggerError::AlreadyInitialized)?;
    set_level(level);
    Ok(())
}

/// Sets the most verbose level that still reaches the sink. Takes effect
/// whether or not [`init`] has run yet.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Serialises tests that change the process-wide level filter.
#[cfg(test)]
pub(crate) static LEVEL_LOCK: crate::sync::mutex::Mutex<()> = crate::sync::mutex::Mutex::new(());
