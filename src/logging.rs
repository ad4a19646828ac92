//! Console logging for the CLI binary.
//!
//! Library code only uses the `log` facade; this installs a minimal stderr
//! logger honoring `RUST_LOG`, defaulting to info level.

use env_filter::Builder;
use log::{LevelFilter, Log, Metadata, Record};

struct ConsoleLogger {
    filter: env_filter::Filter,
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.filter.matches(record) {
            eprintln!("[{}][{}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the console logger. Call once at startup; a second call is a
/// no-op.
pub fn init() {
    let mut builder = Builder::new();
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse(&spec);
    } else {
        builder.filter_level(LevelFilter::Info);
    }
    let filter = builder.build();

    let max_level = filter.filter();
    if log::set_boxed_logger(Box::new(ConsoleLogger { filter })).is_ok() {
        log::set_max_level(max_level);
    }
}
