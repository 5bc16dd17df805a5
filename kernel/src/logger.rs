//! Kernel logger
//!
//! Bridges the `log` facade onto the console so subsystems can use
//! `log::info!`/`log::warn!` during bring-up without knowing about the
//! serial sink. Heap-free; formatting goes straight to the console.

use log::{Level, LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{:5}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Called once from `bootstrap::kernel_main`;
/// a second call is a no-op (the facade rejects it).
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
