// src/error.rs

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A device could not be opened at startup. Fatal: the engine never runs.
    #[error("failed to open audio device: {0}")]
    DeviceOpen(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Transient I/O failures are recovered with silence, but this many in a
    /// row mean the device is gone.
    #[error("audio input dead for {consecutive} consecutive blocks")]
    ExcessiveIoFailure { consecutive: u32 },
}
