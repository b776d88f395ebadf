//! Error types for pixroi-core.

use thiserror::Error;

/// Result type alias for pixroi operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Channel family of the multiplexed readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFamily {
    /// Fine readout (pixels).
    Pixel,
    /// Coarse readout (regions of interest).
    Roi,
}

impl std::fmt::Display for ChannelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pixel => f.write_str("pixel"),
            Self::Roi => f.write_str("ROI"),
        }
    }
}

/// Core error types for pixroi operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent run configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Run configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Waveform has a different number of channels than the geometry.
    #[error("{family} waveform has {found} channels, geometry expects {expected}")]
    ChannelCount {
        family: ChannelFamily,
        found: usize,
        expected: usize,
    },

    /// Channel index has no entry in the geometry table.
    #[error("{family} channel {channel} out of range (geometry has {available})")]
    ChannelOutOfRange {
        family: ChannelFamily,
        channel: usize,
        available: usize,
    },

    /// Pixel and ROI waveforms of one event differ in length.
    #[error("event {event_id}: pixel waveform has {pixel} samples, ROI waveform has {roi}")]
    SampleCountMismatch {
        event_id: u32,
        pixel: usize,
        roi: usize,
    },

    /// Sample buffer does not fill a channels x samples grid.
    #[error("sample buffer of length {len} does not match {channels} channels x {samples} samples")]
    WaveformShape {
        len: usize,
        channels: usize,
        samples: usize,
    },
}

/// Failure of the principal component decomposition of one event.
///
/// This is recoverable: the event is marked as failed and skipped
/// for track fitting, the run continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcaError {
    /// No candidate points were selected for the fit.
    #[error("no points selected for decomposition")]
    NoPoints,

    /// The scatter matrix contains NaN or infinite entries.
    #[error("scatter matrix is not finite")]
    NonFinite,

    /// The symmetric eigensolver did not converge.
    #[error("eigendecomposition did not converge")]
    NotConverged,
}
