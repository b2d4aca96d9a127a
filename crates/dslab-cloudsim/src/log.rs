//! Logging facilities.
//!
//! All macros take the simulation clock (anything with a `time()` method) and the name of the logging entity.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

/// Logs a message at the info level.
///
/// # Examples
///
/// ```rust
/// use dslab_cloudsim::core::common::{HostId, SimulationClock};
/// use dslab_cloudsim::log_info;
///
/// let clock = SimulationClock::new(1.5);
/// log_info!(clock, HostId(0), "started");
/// ```
#[macro_export]
macro_rules! log_info {
    ($clock:expr, $entity:expr, $msg:expr) => (
        log::info!(
            "[{:.3} {}  {}] {}",
            $clock.time(), $crate::log::get_colored("INFO", $crate::colored::Color::Green), $entity, $msg
        )
    );
    ($clock:expr, $entity:expr, $format:expr, $($arg:tt)+) => (
        log::info!(
            concat!("[{:.3} {}  {}] ", $format),
            $clock.time(), $crate::log::get_colored("INFO", $crate::colored::Color::Green), $entity, $($arg)+
        )
    );
}

/// Logs a message at the debug level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_debug {
    ($clock:expr, $entity:expr, $msg:expr) => (
        log::debug!(
            "[{:.3} {} {}] {}",
            $clock.time(), $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $entity, $msg
        )
    );
    ($clock:expr, $entity:expr, $format:expr, $($arg:tt)+) => (
        log::debug!(
            concat!("[{:.3} {} {}] ", $format),
            $clock.time(), $crate::log::get_colored("DEBUG", $crate::colored::Color::Blue), $entity, $($arg)+
        )
    );
}

/// Logs a message at the trace level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_trace {
    ($clock:expr, $entity:expr, $msg:expr) => (
        log::trace!(
            "[{:.3} {} {}] {}",
            $clock.time(), $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $entity, $msg
        )
    );
    ($clock:expr, $entity:expr, $format:expr, $($arg:tt)+) => (
        log::trace!(
            concat!("[{:.3} {} {}] ", $format),
            $clock.time(), $crate::log::get_colored("TRACE", $crate::colored::Color::Cyan), $entity, $($arg)+
        )
    );
}

/// Logs a message at the warn level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_warn {
    ($clock:expr, $entity:expr, $msg:expr) => (
        log::warn!(
            "[{:.3} {}  {}] {}",
            $clock.time(), $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $entity, $msg
        )
    );
    ($clock:expr, $entity:expr, $format:expr, $($arg:tt)+) => (
        log::warn!(
            concat!("[{:.3} {}  {}] ", $format),
            $clock.time(), $crate::log::get_colored("WARN", $crate::colored::Color::Yellow), $entity, $($arg)+
        )
    );
}

/// Logs a message at the error level.
///
/// # Examples
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_error {
    ($clock:expr, $entity:expr, $msg:expr) => (
        log::error!(
            "[{:.3} {} {}] {}",
            $clock.time(), $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $entity, $msg
        )
    );
    ($clock:expr, $entity:expr, $format:expr, $($arg:tt)+) => (
        log::error!(
            concat!("[{:.3} {} {}] ", $format),
            $clock.time(), $crate::log::get_colored("ERROR", $crate::colored::Color::Red), $entity, $($arg)+
        )
    );
}
