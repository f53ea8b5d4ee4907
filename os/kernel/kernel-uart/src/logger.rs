use crate::uart_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `[LEVEL] target: message` lines on the console UART.
pub struct UartLogger {
    max_level: LevelFilter,
}

impl UartLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install as the global logger. Call once, early.
    ///
    /// # Errors
    /// If a logger is already installed.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        uart_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_level() {
        let logger = UartLogger::new(LevelFilter::Info);
        let at = |level| Metadata::builder().level(level).target("t").build();
        assert!(logger.enabled(&at(Level::Error)));
        assert!(logger.enabled(&at(Level::Info)));
        assert!(!logger.enabled(&at(Level::Debug)));
        assert!(!UartLogger::new(LevelFilter::Off).enabled(&at(Level::Error)));
    }
}
