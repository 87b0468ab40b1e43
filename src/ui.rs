use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};

// Global debug state
static DEBUG_MODE: AtomicBool = AtomicBool::new(false);

pub fn set_debug_mode(enabled: bool) {
    DEBUG_MODE.store(enabled, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
    Debug,
}

pub fn emit(level: Level, message: &str) {
    match level {
        Level::Info => println!("{message}"),
        Level::Success => println!("{}", message.green()),
        Level::Warn => eprintln!("{} {message}", "warning:".yellow().bold()),
        Level::Error => eprintln!("{} {message}", "error:".red().bold()),
        Level::Debug => {
            if is_debug_enabled() {
                eprintln!("{} {message}", "debug:".dimmed());
            }
        }
    }
}

pub fn info(message: &str) {
    emit(Level::Info, message);
}

pub fn success(message: &str) {
    emit(Level::Success, message);
}

pub fn warn(message: &str) {
    emit(Level::Warn, message);
}

pub fn error(message: &str) {
    emit(Level::Error, message);
}

pub fn debug(message: &str) {
    emit(Level::Debug, message);
}
