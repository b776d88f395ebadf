//! File writers for waveform containers and reconstruction results.

use crate::format::{ContainerHeader, EVENT_COUNT_OFFSET};
use crate::{Error, Result};
use pixroi_algorithms::RunSummary;
use pixroi_core::{CandidateSelection, Event, RawEvent};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Writer for `.pxw` waveform containers.
///
/// The event count in the header is patched by [`finish`](Self::finish).
pub struct WaveformFileWriter {
    writer: BufWriter<File>,
    header: ContainerHeader,
}

impl WaveformFileWriter {
    /// Creates a container for events of the given shape.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, n_pixels: u32, n_rois: u32, n_samples: u32) -> Result<Self> {
        let header = ContainerHeader::new(n_pixels, n_rois, n_samples);
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&header.to_bytes())?;
        Ok(Self { writer, header })
    }

    /// Appends one event.
    ///
    /// # Errors
    /// Returns an error if the event shape differs from the header or a
    /// sample does not fit in 16 bits.
    pub fn write_event(&mut self, event: &RawEvent) -> Result<()> {
        event.validate(self.header.n_pixels as usize, self.header.n_rois as usize)?;
        if event.pixel.n_samples() != self.header.n_samples as usize {
            return Err(Error::InvalidFormat(format!(
                "event {} has {} samples, container expects {}",
                event.event_id,
                event.pixel.n_samples(),
                self.header.n_samples
            )));
        }

        self.writer.write_all(&event.event_id.to_le_bytes())?;
        for &value in event.pixel.as_slice().iter().chain(event.roi.as_slice()) {
            let sample = i16::try_from(value).map_err(|_| Error::SampleOverflow {
                event_id: event.event_id,
                value,
            })?;
            self.writer.write_all(&sample.to_le_bytes())?;
        }
        self.header.n_events += 1;
        Ok(())
    }

    /// Writes the final event count and flushes the file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn finish(mut self) -> Result<ContainerHeader> {
        self.writer.seek(SeekFrom::Start(EVENT_COUNT_OFFSET))?;
        self.writer.write_all(&self.header.n_events.to_le_bytes())?;
        self.writer.flush()?;
        Ok(self.header)
    }
}

/// Flag written in the `A` column of the hits file.
///
/// Only an explicitly selected candidate is flagged 0. Candidates of a
/// pulse that never went through disambiguation are flagged 2, even though
/// they enter the fit.
fn hit_flag(selection: CandidateSelection, index: usize) -> u8 {
    match selection {
        CandidateSelection::Rejected => 1,
        CandidateSelection::Selected(selected) if selected == index => 0,
        _ => 2,
    }
}

/// Writer for per-event CSV files and the run statistics.
///
/// Files are named after a common base path: `<base>_event<N>_hits.csv`,
/// `<base>_event<N>_pca.csv` and `<base>_stats.txt`.
pub struct ResultsWriter {
    base: PathBuf,
}

impl ResultsWriter {
    /// Creates a writer for the given base path.
    #[must_use]
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn path_with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name = self.base.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Path of the hits file of an event.
    #[must_use]
    pub fn hits_path(&self, event_id: u32) -> PathBuf {
        self.path_with_suffix(&format!("_event{event_id}_hits.csv"))
    }

    /// Path of the PCA file of an event.
    #[must_use]
    pub fn pca_path(&self, event_id: u32) -> PathBuf {
        self.path_with_suffix(&format!("_event{event_id}_pca.csv"))
    }

    /// Path of the run statistics file.
    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.path_with_suffix("_stats.txt")
    }

    /// Writes the hits and PCA files of one event.
    ///
    /// # Errors
    /// Returns an error if a file cannot be written.
    pub fn write_event(&self, event: &Event) -> Result<()> {
        let mut hits = BufWriter::new(File::create(self.hits_path(event.event_id))?);
        writeln!(hits, "X,Y,Z,Q,A")?;
        for (candidates, &selection) in event.hit_candidates.iter().zip(&event.selections) {
            for (index, hit) in candidates.iter().enumerate() {
                writeln!(
                    hits,
                    "{},{},{},{},{}",
                    hit.x,
                    hit.y,
                    hit.z,
                    hit.charge,
                    hit_flag(selection, index)
                )?;
            }
        }
        hits.flush()?;

        let mut pca = BufWriter::new(File::create(self.pca_path(event.event_id))?);
        match &event.principal_components {
            Some(components) => {
                let [x, y, z] = components.mean_position;
                writeln!(pca, "{x},{y},{z}")?;
                for [x, y, z] in components.eigenvectors {
                    writeln!(pca, "{x},{y},{z}")?;
                }
            }
            None => writeln!(pca, "0,0,0")?,
        }
        pca.flush()?;
        Ok(())
    }

    /// Writes the run statistics.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let mut stats = BufWriter::new(File::create(self.stats_path())?);
        writeln!(stats, "Number of events processed: {}", summary.n_events)?;
        writeln!(
            stats,
            "Average number of hit candidates per event: {}",
            summary.avg_hit_candidates
        )?;
        writeln!(
            stats,
            "Average number of ambiguities per event: {}",
            summary.avg_ambiguities
        )?;
        writeln!(
            stats,
            "Average number of unmatched pixel pulses per event: {}",
            summary.avg_unmatched_pixel_pulses
        )?;
        writeln!(stats, "Number of failed PCA decompositions: {}", summary.n_failed)?;
        stats.flush()?;
        Ok(())
    }
}
