//! Temporal matching of pixel and ROI pulses.
//!
//! A pixel pulse and a ROI pulse are matched when their sample intervals
//! overlap. ROI pulses are visited in order of their leading edge and the
//! pixel pulses are looked up through their trailing edge index, so only a
//! bounded window of pixel pulses is inspected per ROI pulse.

use std::ops::Bound;

use pixroi_core::PulseSet;

/// Many-to-many match graph between pixel and ROI pulses.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateGraph {
    /// For every pixel pulse, the matched ROI pulse IDs.
    pub pixel_to_roi: Vec<Vec<usize>>,
    /// For every ROI pulse, the matched pixel pulse IDs.
    pub roi_to_pixel: Vec<Vec<usize>>,
}

impl CandidateGraph {
    /// Creates an empty graph for the given pulse counts.
    #[must_use]
    pub fn with_sizes(n_pixel_pulses: usize, n_roi_pulses: usize) -> Self {
        Self {
            pixel_to_roi: vec![Vec::new(); n_pixel_pulses],
            roi_to_pixel: vec![Vec::new(); n_roi_pulses],
        }
    }

    /// Records a match in both directions.
    pub fn link(&mut self, pixel_id: usize, roi_id: usize) {
        self.pixel_to_roi[pixel_id].push(roi_id);
        self.roi_to_pixel[roi_id].push(pixel_id);
    }

    /// Total number of matches.
    #[must_use]
    pub fn n_edges(&self) -> usize {
        self.pixel_to_roi.iter().map(Vec::len).sum()
    }

    /// Returns true if every match is recorded in both directions.
    #[must_use]
    pub fn is_symmetric(&self) -> bool {
        let forward = self.pixel_to_roi.iter().enumerate().all(|(pixel, rois)| {
            rois.iter()
                .all(|&roi| self.roi_to_pixel.get(roi).is_some_and(|p| p.contains(&pixel)))
        });
        forward && self.n_edges() == self.roi_to_pixel.iter().map(Vec::len).sum::<usize>()
    }
}

/// Matches pixel pulses against ROI pulses by temporal overlap.
#[derive(Clone, Copy, Debug)]
pub struct HitMatcher {
    range: usize,
}

impl HitMatcher {
    /// Creates a matcher for pulses found with edge search range `range`.
    ///
    /// A pixel pulse can extend at most `2 * range` samples past its peak
    /// region, which bounds the trailing edge window scanned after a ROI
    /// pulse ends.
    #[must_use]
    pub fn new(range: usize) -> Self {
        Self { range }
    }

    /// Builds the match graph.
    ///
    /// For each ROI pulse, every pixel pulse whose trailing edge lies within
    /// the ROI pulse matches. Pixel pulses trailing later, up to `2 * range`
    /// samples after the ROI pulse, match only if they start before the
    /// ROI pulse ends.
    #[must_use]
    pub fn match_pulses(&self, pixel: &PulseSet, roi: &PulseSet) -> CandidateGraph {
        let mut graph = CandidateGraph::with_sizes(pixel.len(), roi.len());
        for (_, roi_id) in roi.lead_order.iter() {
            let roi_pulse = &roi.pulses[roi_id];
            let (roi_first, roi_last) = (roi_pulse.first_sample, roi_pulse.last_sample);

            for (_, pixel_id) in pixel.trail_order.range(roi_first..=roi_last) {
                graph.link(pixel_id, roi_id);
            }

            let late = (
                Bound::Excluded(roi_last),
                Bound::Included(roi_last.saturating_add(self.range.saturating_mul(2))),
            );
            for (_, pixel_id) in pixel.trail_order.range(late) {
                if pixel.pulses[pixel_id].overlaps(roi_pulse) {
                    graph.link(pixel_id, roi_id);
                }
            }
        }
        log::debug!(
            "matched {} pixel pulses to {} ROI pulses with {} edges",
            pixel.len(),
            roi.len(),
            graph.n_edges()
        );
        graph
    }
}
