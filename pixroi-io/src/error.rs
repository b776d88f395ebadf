//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Sample does not fit the 16-bit container encoding.
    #[error("event {event_id}: sample value {value} does not fit in 16 bits")]
    SampleOverflow { event_id: u32, value: i32 },

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] pixroi_core::Error),
}
