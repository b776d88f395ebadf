//! Digitized waveform grids.
//!
//! A [`Waveform`] stores one readout family of one event as a
//! channels x samples grid in row-major order, so every channel is a
//! contiguous slice.

use crate::error::{ChannelFamily, Error, Result};

/// Sample grid of one readout family (`rows = channels, cols = samples`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Waveform {
    n_channels: usize,
    n_samples: usize,
    samples: Vec<i32>,
}

impl Waveform {
    /// Creates a waveform from a row-major sample buffer.
    ///
    /// # Errors
    /// Returns [`Error::WaveformShape`] if `samples.len() != n_channels * n_samples`.
    pub fn from_samples(n_channels: usize, n_samples: usize, samples: Vec<i32>) -> Result<Self> {
        if n_channels.checked_mul(n_samples) != Some(samples.len()) {
            return Err(Error::WaveformShape {
                len: samples.len(),
                channels: n_channels,
                samples: n_samples,
            });
        }
        Ok(Self {
            n_channels,
            n_samples,
            samples,
        })
    }

    /// Creates a waveform with every sample set to `value`.
    #[must_use]
    pub fn filled(n_channels: usize, n_samples: usize, value: i32) -> Self {
        Self {
            n_channels,
            n_samples,
            samples: vec![value; n_channels * n_samples],
        }
    }

    /// Builds a waveform from one vector per channel.
    ///
    /// # Errors
    /// Returns [`Error::WaveformShape`] if the channels differ in length.
    pub fn from_channels(channels: Vec<Vec<i32>>) -> Result<Self> {
        let n_channels = channels.len();
        let n_samples = channels.first().map_or(0, Vec::len);
        let samples: Vec<i32> = channels.into_iter().flatten().collect();
        Self::from_samples(n_channels, n_samples, samples)
    }

    /// Number of channels (rows).
    #[must_use]
    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Number of samples per channel (columns).
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Returns the samples of one channel.
    ///
    /// # Panics
    /// Panics if `channel >= n_channels()`.
    #[must_use]
    pub fn channel(&self, channel: usize) -> &[i32] {
        let start = channel * self.n_samples;
        &self.samples[start..start + self.n_samples]
    }

    /// Returns the samples of one channel mutably.
    ///
    /// # Panics
    /// Panics if `channel >= n_channels()`.
    pub fn channel_mut(&mut self, channel: usize) -> &mut [i32] {
        let start = channel * self.n_samples;
        &mut self.samples[start..start + self.n_samples]
    }

    /// Iterates over the channels in order.
    pub fn channels(&self) -> impl Iterator<Item = &[i32]> {
        // chunks_exact(0) panics; an empty grid has no channels anyway.
        self.samples
            .chunks_exact(self.n_samples.max(1))
            .take(self.n_channels)
    }

    /// Sample value at (`channel`, `sample`).
    #[must_use]
    pub fn get(&self, channel: usize, sample: usize) -> Option<i32> {
        if channel < self.n_channels && sample < self.n_samples {
            Some(self.samples[channel * self.n_samples + sample])
        } else {
            None
        }
    }

    /// Sets the sample value at (`channel`, `sample`).
    ///
    /// # Panics
    /// Panics if the position is outside the grid.
    pub fn set(&mut self, channel: usize, sample: usize, value: i32) {
        assert!(channel < self.n_channels && sample < self.n_samples);
        self.samples[channel * self.n_samples + sample] = value;
    }

    /// The whole row-major sample buffer.
    #[must_use]
    pub fn as_slice(&self) -> &[i32] {
        &self.samples
    }
}

/// Raw input of one detector event: the pixel and ROI waveforms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Event ID within the subrun.
    pub event_id: u32,
    /// Fine readout grid.
    pub pixel: Waveform,
    /// Coarse readout grid.
    pub roi: Waveform,
}

impl RawEvent {
    /// Creates a raw event.
    #[must_use]
    pub fn new(event_id: u32, pixel: Waveform, roi: Waveform) -> Self {
        Self {
            event_id,
            pixel,
            roi,
        }
    }

    /// Checks the event against the expected channel counts.
    ///
    /// # Errors
    /// Returns an error if a family has the wrong number of channels or the
    /// two grids differ in sample count.
    pub fn validate(&self, n_pixels: usize, n_rois: usize) -> Result<()> {
        if self.pixel.n_channels() != n_pixels {
            return Err(Error::ChannelCount {
                family: ChannelFamily::Pixel,
                found: self.pixel.n_channels(),
                expected: n_pixels,
            });
        }
        if self.roi.n_channels() != n_rois {
            return Err(Error::ChannelCount {
                family: ChannelFamily::Roi,
                found: self.roi.n_channels(),
                expected: n_rois,
            });
        }
        if self.pixel.n_samples() != self.roi.n_samples() {
            return Err(Error::SampleCountMismatch {
                event_id: self.event_id,
                pixel: self.pixel.n_samples(),
                roi: self.roi.n_samples(),
            });
        }
        Ok(())
    }
}
