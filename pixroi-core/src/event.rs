//! Per-event reconstruction state.
//!
//! An [`Event`] is created once per raw waveform pair and filled in place
//! by every pipeline stage: pulse finding, matching, candidate building
//! and track clustering.

use crate::error::PcaError;
use crate::hit::Hit3d;
use crate::pulse::PulseSet;

/// Which 3D candidates of a pixel pulse take part in the track fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateSelection {
    /// No choice made yet: every candidate is used.
    #[default]
    Unselected,
    /// The pixel pulse has no candidates.
    NoCandidates,
    /// Only the candidate at this index is used.
    Selected(usize),
    /// The chosen candidate was rejected as an outlier.
    Rejected,
}

impl CandidateSelection {
    /// Returns true if the candidate at `index` is part of the fit.
    #[inline]
    #[must_use]
    pub fn includes(self, index: usize) -> bool {
        match self {
            Self::Unselected => true,
            Self::Selected(selected) => selected == index,
            Self::NoCandidates | Self::Rejected => false,
        }
    }

    /// Index of the single selected candidate, if any.
    #[inline]
    #[must_use]
    pub fn selected(self) -> Option<usize> {
        match self {
            Self::Selected(index) => Some(index),
            _ => None,
        }
    }
}

/// Result of the principal component decomposition of an event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrincipalComponents {
    /// Number of points that entered the decomposition.
    pub n_points: usize,
    /// Mean position of the points.
    pub mean_position: [f64; 3],
    /// Eigenvalues, sorted in descending order.
    pub eigenvalues: [f64; 3],
    /// Unit eigenvectors matching `eigenvalues`.
    pub eigenvectors: [[f64; 3]; 3],
    /// Mean distance of closest approach of the selected points.
    pub mean_doca: f64,
}

impl PrincipalComponents {
    /// Principal axis (direction of largest spread, sign ambiguous).
    #[inline]
    #[must_use]
    pub fn axis(&self) -> [f64; 3] {
        self.eigenvectors[0]
    }

    /// Distance of closest approach of `point` to the principal axis
    /// through the mean position.
    #[must_use]
    pub fn doca(&self, point: [f64; 3]) -> f64 {
        let axis = self.axis();
        let rel = [
            point[0] - self.mean_position[0],
            point[1] - self.mean_position[1],
            point[2] - self.mean_position[2],
        ];
        let arclen = rel[0] * axis[0] + rel[1] * axis[1] + rel[2] * axis[2];
        let dx = rel[0] - arclen * axis[0];
        let dy = rel[1] - arclen * axis[1];
        let dz = rel[2] - arclen * axis[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Outcome of track clustering for one event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClusterStatus {
    /// Track clustering has not run.
    #[default]
    Pending,
    /// Clustering finished.
    Converged {
        /// Outlier pruning rounds performed.
        iterations: usize,
        /// Candidates rejected as outliers.
        rejected: usize,
    },
    /// The decomposition failed; the event is skipped for track fitting.
    Failed(PcaError),
}

/// Bookkeeping counts of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventStatistics {
    /// Pixel pulses found.
    pub n_pixel_pulses: usize,
    /// Pixel peaks with unresolved edges.
    pub n_missed_pixel_pulses: usize,
    /// ROI pulses found.
    pub n_roi_pulses: usize,
    /// ROI peaks with unresolved edges.
    pub n_missed_roi_pulses: usize,
    /// 3D hit candidates over all pixel pulses.
    pub n_hit_candidates: usize,
    /// Pixel pulses with more than one candidate.
    pub n_ambiguities: usize,
    /// Pixel pulses without any candidate.
    pub n_unmatched_pixel_pulses: usize,
    /// ROI pulses not matched to any pixel pulse.
    pub n_unmatched_roi_pulses: usize,
}

/// Reconstruction state of a single event.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// Run ID.
    pub run_id: u32,
    /// Subrun ID.
    pub subrun_id: u32,
    /// Event ID.
    pub event_id: u32,
    /// Pixel pulses.
    pub pixel_pulses: PulseSet,
    /// ROI pulses.
    pub roi_pulses: PulseSet,
    /// For every pixel pulse, the IDs of all overlapping ROI pulses.
    pub pixel_to_roi: Vec<Vec<usize>>,
    /// For every ROI pulse, the IDs of all overlapping pixel pulses.
    pub roi_to_pixel: Vec<Vec<usize>>,
    /// 3D hit candidates, index-aligned with `pixel_pulses`.
    pub hit_candidates: Vec<Vec<Hit3d>>,
    /// Candidate selection per pixel pulse, index-aligned with `hit_candidates`.
    pub selections: Vec<CandidateSelection>,
    /// Latest successful decomposition.
    pub principal_components: Option<PrincipalComponents>,
    /// Track clustering outcome.
    pub cluster_status: ClusterStatus,
}

impl Event {
    /// Creates an empty event.
    #[must_use]
    pub fn new(run_id: u32, subrun_id: u32, event_id: u32) -> Self {
        Self {
            run_id,
            subrun_id,
            event_id,
            ..Self::default()
        }
    }

    /// Creates an event directly from 3D candidates, one list per pixel pulse.
    #[must_use]
    pub fn from_candidates(event_id: u32, hit_candidates: Vec<Vec<Hit3d>>) -> Self {
        let selections = vec![CandidateSelection::Unselected; hit_candidates.len()];
        Self {
            event_id,
            hit_candidates,
            selections,
            ..Self::default()
        }
    }

    /// Iterates over all candidates that currently take part in the fit.
    pub fn selected_hits(&self) -> impl Iterator<Item = &Hit3d> + '_ {
        self.hit_candidates
            .iter()
            .zip(&self.selections)
            .flat_map(|(candidates, &selection)| {
                candidates
                    .iter()
                    .enumerate()
                    .filter(move |(index, _)| selection.includes(*index))
                    .map(|(_, hit)| hit)
            })
    }

    /// Number of pixel pulses with at least one candidate.
    #[must_use]
    pub fn n_non_empty(&self) -> usize {
        self.hit_candidates.iter().filter(|c| !c.is_empty()).count()
    }

    /// Returns true if clustering ran and did not fail.
    #[must_use]
    pub fn is_clustered(&self) -> bool {
        matches!(self.cluster_status, ClusterStatus::Converged { .. })
    }

    /// Computes the bookkeeping counts from the current state.
    #[must_use]
    pub fn statistics(&self) -> EventStatistics {
        let mut stats = EventStatistics {
            n_pixel_pulses: self.pixel_pulses.len(),
            n_missed_pixel_pulses: self.pixel_pulses.n_missed,
            n_roi_pulses: self.roi_pulses.len(),
            n_missed_roi_pulses: self.roi_pulses.n_missed,
            n_unmatched_roi_pulses: self.roi_to_pixel.iter().filter(|m| m.is_empty()).count(),
            ..EventStatistics::default()
        };
        for candidates in &self.hit_candidates {
            stats.n_hit_candidates += candidates.len();
            match candidates.len() {
                0 => stats.n_unmatched_pixel_pulses += 1,
                1 => {}
                _ => stats.n_ambiguities += 1,
            }
        }
        stats
    }
}
