use std::fs::{create_dir, metadata};

use chrono::Local;
use fern::{Dispatch, DateBased};
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error(transparent)]
    LogError(#[from] log::SetLoggerError),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Configures the global logger.
///
/// When `dir` is given, logs are additionally written to a date-rolled file
/// inside that directory, created on demand.
pub fn init_logger(level: LevelFilter, dir: Option<&str>) -> Result<(), LoggerInitError> {
    let mut logger = Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] - ({}) - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    if let Some(dir) = dir {
        if metadata(dir).is_err() {
            create_dir(dir)?;
        }

        logger = logger.chain(DateBased::new(dir, "%Y-%m-%d-shelly-connector.log"));
    }

    logger.apply()?;
    Ok(())
}

/// Routes panics through the log sink instead of raw stderr output, so a
/// panic in a client thread is captured by the same log pipeline.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        log::error!(
            "panic: location={:?}, message={:?}",
            info.location(),
            info.payload()
                .downcast_ref::<&str>()
                .map(|it| it.to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
        );
    }));
}
