//! Per-event reconstruction pipeline and run-level helpers.

use rayon::prelude::*;

use pixroi_core::{
    CandidateSelection, ChannelFamily, Event, EventStatistics, RawEvent, ReconstructionConfig,
    Result,
};

use crate::common_mode::filter_common_mode;
use crate::hit_builder::HitBuilder;
use crate::matcher::HitMatcher;
use crate::noise::NoiseMode;
use crate::pulse_finder::{Polarity, PulseFinder, PulseFinderConfig};
use crate::track::TrackClusterer;

/// Switches for the optional pipeline stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconstructionOptions {
    /// Run the common-mode filter on both readout families.
    pub common_mode: bool,
    /// Search ROI channels for bipolar pulses.
    pub bipolar_roi: bool,
    /// Keep only the candidate nearest to the track for ambiguous pulses.
    pub reject_ambiguities: bool,
    /// Prune candidates far from the principal axis.
    pub reject_outliers: bool,
    /// Noise estimation mode of the pulse finders.
    pub noise_mode: NoiseMode,
    /// Subrun recorded on the reconstructed events.
    pub subrun_id: u32,
}

impl Default for ReconstructionOptions {
    fn default() -> Self {
        Self {
            common_mode: true,
            bipolar_roi: true,
            reject_ambiguities: true,
            reject_outliers: true,
            noise_mode: NoiseMode::Fitted,
            subrun_id: 0,
        }
    }
}

impl ReconstructionOptions {
    /// Enables or disables the common-mode filter.
    #[must_use]
    pub fn with_common_mode(mut self, enabled: bool) -> Self {
        self.common_mode = enabled;
        self
    }

    /// Selects the ROI pulse polarity.
    #[must_use]
    pub fn with_bipolar_roi(mut self, enabled: bool) -> Self {
        self.bipolar_roi = enabled;
        self
    }

    /// Enables or disables the clustering rejection stages.
    #[must_use]
    pub fn with_rejection(mut self, ambiguities: bool, outliers: bool) -> Self {
        self.reject_ambiguities = ambiguities;
        self.reject_outliers = outliers;
        self
    }

    /// Sets the subrun ID.
    #[must_use]
    pub fn with_subrun_id(mut self, subrun_id: u32) -> Self {
        self.subrun_id = subrun_id;
        self
    }
}

/// Reconstructs the 3D hits and track axis of one event.
///
/// The input waveforms are not modified. A failed PCA is recorded in the
/// event's cluster status and does not produce an error.
///
/// # Errors
/// Returns an error if the event does not match the geometry.
pub fn reconstruct_event(
    raw: &RawEvent,
    config: &ReconstructionConfig,
    options: &ReconstructionOptions,
) -> Result<Event> {
    let geometry = &config.geometry;
    raw.validate(geometry.n_pixels(), geometry.n_rois())?;

    let mut pixel = raw.pixel.clone();
    let mut roi = raw.roi.clone();
    if options.common_mode {
        filter_common_mode(&mut pixel, config.noise_filter.window_sigma);
        filter_common_mode(&mut roi, config.noise_filter.window_sigma);
    }

    let range = config.discriminator.range;
    let finder = |family: ChannelFamily, polarity: Polarity| {
        PulseFinder::new(PulseFinderConfig {
            thresholds: *config.discriminator.thresholds(family),
            range,
            polarity,
            noise_mode: options.noise_mode,
        })
    };
    let pixel_finder = finder(ChannelFamily::Pixel, Polarity::Unipolar);
    let roi_finder = finder(
        ChannelFamily::Roi,
        if options.bipolar_roi {
            Polarity::Bipolar
        } else {
            Polarity::Unipolar
        },
    );

    let mut event = Event::new(config.run_id, options.subrun_id, raw.event_id);
    event.pixel_pulses = pixel_finder.find_pulses(&pixel);
    event.roi_pulses = roi_finder.find_pulses(&roi);

    let graph = HitMatcher::new(range).match_pulses(&event.pixel_pulses, &event.roi_pulses);
    let candidates = HitBuilder::new(geometry).build(&event.pixel_pulses, &event.roi_pulses, &graph)?;
    event.selections = vec![CandidateSelection::Unselected; candidates.len()];
    event.hit_candidates = candidates;
    event.pixel_to_roi = graph.pixel_to_roi;
    event.roi_to_pixel = graph.roi_to_pixel;

    TrackClusterer::new(config.pca)
        .with_rejection(options.reject_ambiguities, options.reject_outliers)
        .cluster(&mut event);

    let stats = event.statistics();
    log::info!(
        "event {}: {} pixel / {} ROI pulses, {} candidates, {} ambiguous, {:?}",
        event.event_id,
        stats.n_pixel_pulses,
        stats.n_roi_pulses,
        stats.n_hit_candidates,
        stats.n_ambiguities,
        event.cluster_status
    );
    Ok(event)
}

/// Reconstructs a batch of events in parallel.
///
/// Every event is checked against the geometry before any is processed.
/// The output preserves the input order.
///
/// # Errors
/// Returns the first shape error found.
pub fn reconstruct_events(
    raws: &[RawEvent],
    config: &ReconstructionConfig,
    options: &ReconstructionOptions,
) -> Result<Vec<Event>> {
    let (n_pixels, n_rois) = (config.geometry.n_pixels(), config.geometry.n_rois());
    for raw in raws {
        raw.validate(n_pixels, n_rois)?;
    }
    raws.par_iter()
        .map(|raw| reconstruct_event(raw, config, options))
        .collect()
}

/// Run-level averages over reconstructed events.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// Number of events.
    pub n_events: usize,
    /// Events whose clustering failed.
    pub n_failed: usize,
    /// Summed per-event counts.
    pub totals: EventStatistics,
    /// Mean number of 3D hit candidates per event.
    pub avg_hit_candidates: f64,
    /// Mean number of ambiguous pixel pulses per event.
    pub avg_ambiguities: f64,
    /// Mean number of unmatched pixel pulses per event.
    pub avg_unmatched_pixel_pulses: f64,
}

impl RunSummary {
    /// Aggregates the statistics of `events`.
    #[must_use]
    pub fn from_events(events: &[Event]) -> Self {
        let mut summary = Self {
            n_events: events.len(),
            ..Self::default()
        };
        for event in events {
            let stats = event.statistics();
            let totals = &mut summary.totals;
            totals.n_pixel_pulses += stats.n_pixel_pulses;
            totals.n_missed_pixel_pulses += stats.n_missed_pixel_pulses;
            totals.n_roi_pulses += stats.n_roi_pulses;
            totals.n_missed_roi_pulses += stats.n_missed_roi_pulses;
            totals.n_hit_candidates += stats.n_hit_candidates;
            totals.n_ambiguities += stats.n_ambiguities;
            totals.n_unmatched_pixel_pulses += stats.n_unmatched_pixel_pulses;
            totals.n_unmatched_roi_pulses += stats.n_unmatched_roi_pulses;
            if !event.is_clustered() {
                summary.n_failed += 1;
            }
        }
        if summary.n_events > 0 {
            let n = summary.n_events as f64;
            summary.avg_hit_candidates = summary.totals.n_hit_candidates as f64 / n;
            summary.avg_ambiguities = summary.totals.n_ambiguities as f64 / n;
            summary.avg_unmatched_pixel_pulses = summary.totals.n_unmatched_pixel_pulses as f64 / n;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pixroi_core::{ClusterStatus, Hit3d, PcaError};

    fn event_with(candidates: Vec<Vec<Hit3d>>, status: ClusterStatus) -> Event {
        let mut event = Event::from_candidates(0, candidates);
        event.cluster_status = status;
        event
    }

    #[test]
    fn test_run_summary_averages() {
        let hit = Hit3d::new(0.0, 0.0, 0.0, 1.0, 0, 0);
        let converged = ClusterStatus::Converged {
            iterations: 1,
            rejected: 0,
        };
        let events = vec![
            event_with(vec![vec![hit, hit], vec![hit]], converged.clone()),
            event_with(vec![vec![], vec![hit]], converged),
            event_with(vec![vec![]], ClusterStatus::Failed(PcaError::NoPoints)),
        ];
        let summary = RunSummary::from_events(&events);

        assert_eq!(summary.n_events, 3);
        assert_eq!(summary.n_failed, 1);
        assert_eq!(summary.totals.n_hit_candidates, 4);
        assert_relative_eq!(summary.avg_hit_candidates, 4.0 / 3.0);
        assert_relative_eq!(summary.avg_ambiguities, 1.0 / 3.0);
        assert_relative_eq!(summary.avg_unmatched_pixel_pulses, 2.0 / 3.0);
    }

    #[test]
    fn test_empty_run_summary() {
        let summary = RunSummary::from_events(&[]);
        assert_eq!(summary, RunSummary::default());
    }

    #[test]
    fn test_options_builders() {
        let options = ReconstructionOptions::default()
            .with_common_mode(false)
            .with_bipolar_roi(false)
            .with_rejection(true, false)
            .with_subrun_id(4);
        assert!(!options.common_mode);
        assert!(!options.bipolar_roi);
        assert!(options.reject_ambiguities);
        assert!(!options.reject_outliers);
        assert_eq!(options.subrun_id, 4);
    }
}
