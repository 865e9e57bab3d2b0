//! Logging backend for applications embedding the call layer.
//!
//! The crate itself logs through the [`log`] facade, so this backend is
//! optional: [`init()`] bridges the facade into a JSON [`slog`] logger.

use std::io;

use chrono::Local;
use slog::{
    o, Discard, Drain, Duplicate, FnValue, Fuse, Level, Logger, PushFnValue,
    Record,
};
use slog_async::Async;
use slog_json::Json;
use slog_scope::GlobalLoggerGuard;

use crate::conf;

/// Builds JSON [`Logger`] which prints all its log records of `level` and
/// higher to `w_out` writer, but WARN level (and higher) to `w_err` writer.
/// Logger will use [`Async`] drain with channel size of 2048 entries.
///
/// Created [`Logger`] produces log records with `fqn`, `lvl`, `time` and `msg`
/// fields by default.
pub fn new_dual_logger<W1, W2>(w_out: W1, w_err: W2, level: Level) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse)
    .filter_level(level)
    .fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    add_default_keys(&Logger::root(drain, o!()))
}

/// Installs a [`new_dual_logger`] writing to stdout and stderr as the global
/// logger, and redirects the [`log`] facade records to it.
///
/// Logging is disabled if [`conf::Log::level`] is `OFF` or unknown.
///
/// The returned guard must be kept alive while logging is needed.
///
/// # Errors
///
/// If the [`log`] facade already has a logger installed.
pub fn init(
    conf: &conf::Log,
) -> Result<GlobalLoggerGuard, log::SetLoggerError> {
    let facade = conf.facade_filter().to_level();
    let (level, facade) = match (conf.level(), facade) {
        (Some(level), Some(facade)) => (level, facade),
        _ => {
            log::set_max_level(log::LevelFilter::Off);
            return Ok(slog_scope::set_global_logger(Logger::root(
                Discard,
                o!(),
            )));
        }
    };

    let logger = new_dual_logger(io::stdout(), io::stderr(), level);
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(facade)?;
    Ok(guard)
}

/// Adds default log record data (key-value pairs) to specified [`Logger`]:
/// - `msg`: log record message.
/// - `fqn`: path to code line that called log function.
/// - `time`: creation date and time of log record in [RFC 3339] format.
/// - `lvl`: logging level of log record.
///
/// [RFC 3339]: https://www.ietf.org/rfc/rfc3339.txt
fn add_default_keys(logger: &Logger) -> Logger {
    logger.new(o!(
        "msg" => PushFnValue(move |record : &Record, ser| {
            ser.emit(record.msg())
        }),
        "fqn" => PushFnValue(move |record : &Record, ser| {
             ser.emit(format_args!("{}:{}", record.module(), record.line()))
        }),
        "time" => PushFnValue(move |_ : &Record, ser| {
            ser.emit(Local::now().to_rfc3339())
        }),
        "lvl" => FnValue(move |rinfo : &Record| {
            rinfo.level().as_str()
        }),
    ))
}
