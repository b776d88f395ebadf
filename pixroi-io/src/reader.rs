//! Memory-mapped waveform container reader.
//!

use crate::format::{read_u32, ContainerHeader, HEADER_LEN};
use crate::{Error, Result};
use memmap2::Mmap;
use pixroi_core::{RawEvent, Waveform};
use rayon::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

/// A memory-mapped file reader.
///
/// Uses memmap2 to access file contents without loading the entire file
/// into memory.
pub struct MappedFileReader {
    mmap: Mmap,
    path: PathBuf,
}

impl MappedFileReader {
    /// Opens a file for memory-mapped reading.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or memory-mapped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self {
            mmap,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the file contents as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[..]
    }

    /// Returns the file size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// Returns true if the file is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Returns the path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reader for `.pxw` waveform containers.
pub struct WaveformFileReader {
    file: MappedFileReader,
    header: ContainerHeader,
}

impl WaveformFileReader {
    /// Opens a container and checks its header against the file size.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped, the header is invalid
    /// or the file is truncated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = MappedFileReader::open(path)?;
        let header = ContainerHeader::parse(file.as_bytes())?;
        let expected = header.file_len()?;
        if file.len() != expected {
            return Err(Error::InvalidFormat(format!(
                "{}: expected {expected} bytes for {} events, found {}",
                file.path().display(),
                header.n_events,
                file.len()
            )));
        }
        log::debug!(
            "opened {}: {} events, {} pixel + {} ROI channels x {} samples",
            file.path().display(),
            header.n_events,
            header.n_pixels,
            header.n_rois,
            header.n_samples
        );
        Ok(Self { file, header })
    }

    /// Container header.
    #[must_use]
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Number of events in the container.
    #[must_use]
    pub fn n_events(&self) -> usize {
        self.header.n_events as usize
    }

    /// Decodes the event record at `index`.
    ///
    /// # Errors
    /// Returns an error if `index` is out of range.
    pub fn event(&self, index: usize) -> Result<RawEvent> {
        if index >= self.n_events() {
            return Err(Error::InvalidFormat(format!(
                "event index {index} out of range ({} events)",
                self.n_events()
            )));
        }
        let event_len = self.header.event_len()?;
        let start = HEADER_LEN + index * event_len;
        let record = &self.file.as_bytes()[start..start + event_len];

        let n_samples = self.header.n_samples as usize;
        let pixel_len = self.header.n_pixels as usize * n_samples * 2;
        let pixel = decode_grid(&record[4..4 + pixel_len], self.header.n_pixels as usize, n_samples)?;
        let roi = decode_grid(&record[4 + pixel_len..], self.header.n_rois as usize, n_samples)?;
        Ok(RawEvent::new(read_u32(record, 0), pixel, roi))
    }

    /// Iterates over all events in file order.
    pub fn events(&self) -> impl Iterator<Item = Result<RawEvent>> + '_ {
        (0..self.n_events()).map(|index| self.event(index))
    }

    /// Decodes all events in parallel, preserving file order.
    ///
    /// # Errors
    /// Returns the first decoding error.
    pub fn read_all(&self) -> Result<Vec<RawEvent>> {
        (0..self.n_events())
            .into_par_iter()
            .map(|index| self.event(index))
            .collect()
    }
}

fn decode_grid(bytes: &[u8], n_channels: usize, n_samples: usize) -> Result<Waveform> {
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i32::from(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    Ok(Waveform::from_samples(n_channels, n_samples, samples)?)
}
