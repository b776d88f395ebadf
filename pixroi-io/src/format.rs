//! Layout of the `.pxw` waveform container.
//!
//! All integers are little-endian.
//!
//! | Offset | Size | Field                |
//! |--------|------|----------------------|
//! | 0      | 4    | magic `PXRW`         |
//! | 4      | 4    | version (`u32`)      |
//! | 8      | 4    | event count (`u32`)  |
//! | 12     | 4    | pixel channels       |
//! | 16     | 4    | ROI channels         |
//! | 20     | 4    | samples per channel  |
//!
//! Each event record is the event ID (`u32`) followed by the pixel grid and
//! the ROI grid, `i16` samples row-major by channel.

use crate::{Error, Result};

/// File magic.
pub const MAGIC: [u8; 4] = *b"PXRW";
/// Container version written by this crate.
pub const VERSION: u32 = 1;
/// Header size in bytes.
pub const HEADER_LEN: usize = 24;
/// Offset of the event count in the header.
pub(crate) const EVENT_COUNT_OFFSET: u64 = 8;

/// Container header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Format version.
    pub version: u32,
    /// Number of event records.
    pub n_events: u32,
    /// Pixel channels per event.
    pub n_pixels: u32,
    /// ROI channels per event.
    pub n_rois: u32,
    /// Samples per channel.
    pub n_samples: u32,
}

impl ContainerHeader {
    /// Creates a header for the current version.
    #[must_use]
    pub fn new(n_pixels: u32, n_rois: u32, n_samples: u32) -> Self {
        Self {
            version: VERSION,
            n_events: 0,
            n_pixels,
            n_rois,
            n_samples,
        }
    }

    /// Size of one event record in bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the size does not fit in `usize`.
    pub fn event_len(&self) -> Result<usize> {
        (self.n_pixels as usize)
            .checked_add(self.n_rois as usize)
            .and_then(|channels| channels.checked_mul(self.n_samples as usize))
            .and_then(|samples| samples.checked_mul(2))
            .and_then(|bytes| bytes.checked_add(4))
            .ok_or_else(|| self.oversized())
    }

    /// Expected total file size in bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the size does not fit in `usize`.
    pub fn file_len(&self) -> Result<usize> {
        (self.n_events as usize)
            .checked_mul(self.event_len()?)
            .and_then(|events| events.checked_add(HEADER_LEN))
            .ok_or_else(|| self.oversized())
    }

    fn oversized(&self) -> Error {
        Error::InvalidFormat(format!(
            "container size overflows: {} events of {} pixel + {} ROI channels x {} samples",
            self.n_events, self.n_pixels, self.n_rois, self.n_samples
        ))
    }

    /// Parses the header at the start of `bytes`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for a short buffer, a wrong magic,
    /// an unsupported version or a size that overflows `usize`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidFormat(format!(
                "file too short for header: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::InvalidFormat("bad magic".to_string()));
        }
        let header = Self {
            version: read_u32(bytes, 4),
            n_events: read_u32(bytes, 8),
            n_pixels: read_u32(bytes, 12),
            n_rois: read_u32(bytes, 16),
            n_samples: read_u32(bytes, 20),
        };
        if header.version != VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported version {}",
                header.version
            )));
        }
        header.file_len()?;
        Ok(header)
    }

    /// Encodes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&MAGIC);
        for (i, value) in [
            self.version,
            self.n_events,
            self.n_pixels,
            self.n_rois,
            self.n_samples,
        ]
        .into_iter()
        .enumerate()
        {
            let offset = 4 + 4 * i;
            bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}
