//! A small installable `log::Log` implementation.
//!
//! The teacher layers its own `info!`/`warn!`/`error!`/`debug!` macros over a
//! configurable `LogLevel` and a kernel console writer. This crate keeps the
//! same leveled shape but writes through the `log` crate's facade instead,
//! since it runs hosted rather than as kernel code: call sites elsewhere in
//! this crate use `log::info!`/`log::warn!`/etc. directly, and `MuxLogger`
//! is only the backend an embedding application installs (or doesn't, if it
//! already runs its own `log::Log`).

use std::io::Write as _;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Verbosity levels, numbered the way the teacher's `LogLevel` is, for
/// embedders that want to configure this crate's default logger by ordinal
/// rather than by `log::LevelFilter` name.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
	Disabled = 0,
	Error,
	Warning,
	Info,
	Debug,
}

impl From<LogLevel> for LevelFilter {
	fn from(level: LogLevel) -> Self {
		match level {
			LogLevel::Disabled => LevelFilter::Off,
			LogLevel::Error => LevelFilter::Error,
			LogLevel::Warning => LevelFilter::Warn,
			LogLevel::Info => LevelFilter::Info,
			LogLevel::Debug => LevelFilter::Debug,
		}
	}
}

/// Writes levelled lines to stderr, guarded by a mutex since frames can be
/// logged from the engine thread while a consumer thread is mid-`open`.
pub struct MuxLogger {
	level: LevelFilter,
	sink: Mutex<std::io::Stderr>,
}

impl MuxLogger {
	pub const fn new(level: LevelFilter) -> Self {
		Self {
			level,
			sink: Mutex::new(std::io::stderr()),
		}
	}

	/// Installs this logger as the global `log` backend. Safe to call more
	/// than once; later calls are ignored (matches `log::set_logger`'s
	/// idempotent-failure behaviour).
	pub fn install(level: LogLevel) {
		let logger = Box::leak(Box::new(MuxLogger::new(level.into())));
		let _ = log::set_logger(logger);
		log::set_max_level(logger.level);
	}
}

impl Log for MuxLogger {
	fn enabled(&self, metadata: &Metadata<'_>) -> bool {
		metadata.level() <= self.level
	}

	fn log(&self, record: &Record<'_>) {
		if !self.enabled(record.metadata()) {
			return;
		}

		let tag = match record.level() {
			Level::Error => "ERROR",
			Level::Warn => "WARNING",
			Level::Info => "INFO",
			Level::Debug => "DEBUG",
			Level::Trace => "TRACE",
		};

		if let Ok(mut sink) = self.sink.lock() {
			let _ = writeln!(sink, "[{tag}] {}", record.args());
		}
	}

	fn flush(&self) {
		if let Ok(mut sink) = self.sink.lock() {
			let _ = sink.flush();
		}
	}
}
