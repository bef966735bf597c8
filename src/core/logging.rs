/*
 * Logger bootstrap for the application. Combines a terminal logger with an
 * optional file logger; the file typically lives next to the configuration
 * store. Initialization happens once per process, before any engine work.
 */
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::File;
use std::io;
use std::path::Path;
use time::macros::format_description;

#[derive(Debug)]
pub enum LoggingError {
    Io(io::Error),
    AlreadyInitialized,
}

impl From<io::Error> for LoggingError {
    fn from(err: io::Error) -> Self {
        LoggingError::Io(err)
    }
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoggingError::Io(e) => write!(f, "Log file error: {e}"),
            LoggingError::AlreadyInitialized => write!(f, "Logger was already initialized"),
        }
    }
}

impl std::error::Error for LoggingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoggingError::Io(e) => Some(e),
            LoggingError::AlreadyInitialized => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoggingError>;

pub fn init_logging(level: log::LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let config = ConfigBuilder::new()
        .set_time_format_custom(format_description!(
            "[hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = log_file {
        loggers.push(WriteLogger::new(level, config, File::create(path)?));
    }

    CombinedLogger::init(loggers).map_err(|_| LoggingError::AlreadyInitialized)?;
    log::debug!("Logging: initialized at level {level}");
    Ok(())
}
