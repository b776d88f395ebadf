//! Track clustering of the 3D hit candidates of one event.
//!
//! The clusterer runs as a small state machine:
//!
//! 1. **Unconstrained**: PCA over every candidate of every pixel pulse.
//! 2. **Disambiguating**: each pixel pulse keeps only its candidate closest
//!    to the principal axis, then the PCA is repeated on the selection.
//! 3. **Outlier pruning**: selected points further from the axis than a
//!    dynamic cutoff are rejected and the PCA is repeated, until the
//!    [`PruningGuard`] stops the loop.
//!
//! A failed decomposition ends the machine and marks the event as failed.

use pixroi_core::{CandidateSelection, ClusterStatus, Event, PcaConfig, PcaError, PrincipalComponents};

use crate::pca::{mean_doca, principal_components};

/// Absolute tolerance in mm added to the outlier cutoff.
const DOCA_TOLERANCE: f64 = 1e-9;

/// Stop condition of the outlier pruning loop.
///
/// Pruning continues while all three hold: the round budget is not
/// exhausted, the last round rejected something, and the cumulative
/// rejections stay below the allowed share of non-empty pixel pulses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PruningGuard {
    /// Maximum number of pruning rounds.
    pub max_iterations: usize,
    /// Maximum share of non-empty pixel pulses that may be rejected.
    pub max_rejected_fraction: f64,
    /// Number of pixel pulses with at least one candidate.
    pub n_non_empty: usize,
}

impl PruningGuard {
    /// Creates the guard for an event.
    #[must_use]
    pub fn new(config: &PcaConfig, n_non_empty: usize) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_rejected_fraction: config.max_rejected_fraction,
            n_non_empty,
        }
    }

    /// Returns true if the round budget allows another round after
    /// `iterations` completed rounds.
    #[must_use]
    pub fn within_iterations(&self, iterations: usize) -> bool {
        iterations <= self.max_iterations
    }

    /// Returns true if `total_rejected` is still below the rejection budget.
    #[must_use]
    pub fn within_rejection_budget(&self, total_rejected: usize) -> bool {
        (total_rejected as f64) < self.max_rejected_fraction * self.n_non_empty as f64
    }

    /// Combined loop guard.
    #[must_use]
    pub fn should_continue(&self, iterations: usize, rejected_last: usize, total_rejected: usize) -> bool {
        self.within_iterations(iterations)
            && rejected_last > 0
            && self.within_rejection_budget(total_rejected)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Unconstrained,
    Disambiguating,
    OutlierPruning,
    Terminal,
}

/// Robust principal axis fit over the hit candidates of an event.
#[derive(Clone, Debug)]
pub struct TrackClusterer {
    config: PcaConfig,
    reject_ambiguities: bool,
    reject_outliers: bool,
}

impl Default for TrackClusterer {
    fn default() -> Self {
        Self::new(PcaConfig::default())
    }
}

impl TrackClusterer {
    /// Create a clusterer with ambiguity and outlier rejection enabled.
    #[must_use]
    pub fn new(config: PcaConfig) -> Self {
        Self {
            config,
            reject_ambiguities: true,
            reject_outliers: true,
        }
    }

    /// Enables or disables the rejection stages.
    ///
    /// Outlier pruning only runs after disambiguation.
    #[must_use]
    pub fn with_rejection(mut self, ambiguities: bool, outliers: bool) -> Self {
        self.reject_ambiguities = ambiguities;
        self.reject_outliers = outliers;
        self
    }

    /// Runs the clustering on an event and records the outcome in it.
    ///
    /// Any previous selection is discarded.
    pub fn cluster<'e>(&self, event: &'e mut Event) -> &'e ClusterStatus {
        event.selections = vec![CandidateSelection::Unselected; event.hit_candidates.len()];
        event.principal_components = None;

        event.cluster_status = match self.run(event) {
            Ok((iterations, rejected)) => ClusterStatus::Converged { iterations, rejected },
            Err(err) => {
                log::warn!("event {}: PCA failed: {err}", event.event_id);
                event.principal_components = None;
                ClusterStatus::Failed(err)
            }
        };
        &event.cluster_status
    }

    fn run(&self, event: &mut Event) -> Result<(usize, usize), PcaError> {
        let guard = PruningGuard::new(&self.config, event.n_non_empty());
        let mut iterations = 0;
        let mut total_rejected = 0;
        let mut stage = Stage::Unconstrained;

        loop {
            stage = match stage {
                Stage::Unconstrained => {
                    refit(event)?;
                    if self.reject_ambiguities {
                        Stage::Disambiguating
                    } else {
                        Stage::Terminal
                    }
                }
                Stage::Disambiguating => {
                    let axis = current_components(event)?;
                    select_nearest(event, &axis);
                    refit(event)?;
                    if self.reject_outliers {
                        Stage::OutlierPruning
                    } else {
                        Stage::Terminal
                    }
                }
                Stage::OutlierPruning => {
                    let components = current_components(event)?;
                    let cutoff = self.outlier_cutoff(&components);
                    let rejected = reject_outliers(event, &components, cutoff);
                    if rejected > 0 {
                        refit(event)?;
                    }
                    iterations += 1;
                    total_rejected += rejected;
                    log::debug!(
                        "event {}: pruning round {iterations} cutoff {cutoff:.3} rejected {rejected}",
                        event.event_id
                    );
                    if guard.should_continue(iterations, rejected, total_rejected) {
                        Stage::OutlierPruning
                    } else {
                        Stage::Terminal
                    }
                }
                Stage::Terminal => break,
            };
        }
        Ok((iterations, total_rejected))
    }

    /// Outlier cutoff distance for the current decomposition.
    #[must_use]
    pub fn outlier_cutoff(&self, components: &PrincipalComponents) -> f64 {
        let transverse = components.eigenvalues[1].max(0.0).sqrt();
        self.config.scale_factor * 0.5 * (3.0 * transverse + components.mean_doca)
    }
}

fn current_components(event: &Event) -> Result<PrincipalComponents, PcaError> {
    event.principal_components.ok_or(PcaError::NoPoints)
}

/// Repeats the decomposition on the current selection and updates the
/// mean DOCA of the selected points.
fn refit(event: &mut Event) -> Result<(), PcaError> {
    let mut components = principal_components(event.selected_hits())?;
    components.mean_doca = mean_doca(&components, event.selected_hits());
    event.principal_components = Some(components);
    Ok(())
}

fn select_nearest(event: &mut Event, components: &PrincipalComponents) {
    for (candidates, selection) in event.hit_candidates.iter().zip(event.selections.iter_mut()) {
        let nearest = candidates
            .iter()
            .map(|hit| components.doca(hit.position()))
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(index, _)| index);
        *selection = match nearest {
            Some(index) => CandidateSelection::Selected(index),
            None => CandidateSelection::NoCandidates,
        };
    }
}

fn reject_outliers(event: &mut Event, components: &PrincipalComponents, cutoff: f64) -> usize {
    let mut rejected = 0;
    for (candidates, selection) in event.hit_candidates.iter().zip(event.selections.iter_mut()) {
        let Some(index) = selection.selected() else {
            continue;
        };
        if components.doca(candidates[index].position()) > cutoff + DOCA_TOLERANCE {
            *selection = CandidateSelection::Rejected;
            rejected += 1;
        }
    }
    rejected
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use pixroi_core::Hit3d;

    fn single(points: &[[f64; 3]]) -> Vec<Vec<Hit3d>> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| vec![Hit3d::new(p[0], p[1], p[2], 1.0, i, i)])
            .collect()
    }

    fn three_plus_one() -> Event {
        Event::from_candidates(
            0,
            single(&[[0.0, 0.0, 0.0], [0.0, 0.0, 100.0], [0.0, 0.0, 200.0], [50.0, 0.0, 100.0]]),
        )
    }

    #[test]
    fn test_guard_iteration_cap() {
        let guard = PruningGuard {
            max_iterations: 3,
            max_rejected_fraction: 1.0,
            n_non_empty: 100,
        };
        assert!(guard.should_continue(3, 1, 3));
        assert!(!guard.should_continue(4, 1, 4));
    }

    #[test]
    fn test_guard_stops_without_rejections() {
        let guard = PruningGuard {
            max_iterations: 10,
            max_rejected_fraction: 1.0,
            n_non_empty: 100,
        };
        assert!(!guard.should_continue(1, 0, 0));
    }

    #[test]
    fn test_guard_rejection_budget() {
        let guard = PruningGuard::new(&PcaConfig::default().with_max_iterations(10), 9);
        // Budget is 0.4 * 9 = 3.6 rejections.
        assert!(guard.within_rejection_budget(3));
        assert!(!guard.within_rejection_budget(4));
        assert!(!guard.should_continue(1, 4, 4));

        // 0.4 * 4 = 1.6 keeps one rejection within budget, so a second
        // round runs after the first rejection. The budget is not truncated.
        let small = PruningGuard::new(&PcaConfig::default(), 4);
        assert!(small.within_rejection_budget(1));
        assert!(!small.within_rejection_budget(2));
        assert!(small.should_continue(1, 1, 1));
        assert!(!small.should_continue(2, 1, 2));
    }

    #[test]
    fn test_first_pca_follows_collinear_points() {
        let mut event = three_plus_one();
        let clusterer = TrackClusterer::default().with_rejection(false, false);
        let status = clusterer.cluster(&mut event).clone();

        assert_eq!(status, ClusterStatus::Converged { iterations: 0, rejected: 0 });
        let pcs = event.principal_components.unwrap();
        assert_relative_eq!(pcs.eigenvalues[0], 5000.0, epsilon = 1e-6);
        assert_relative_eq!(pcs.eigenvalues[1], 468.75, epsilon = 1e-6);
        assert_relative_eq!(pcs.axis()[2].abs(), 1.0, epsilon = 1e-9);
        assert!(event.selections.iter().all(|s| *s == CandidateSelection::Unselected));
    }

    #[test]
    fn test_offset_point_kept_at_unit_scale() {
        // With three collinear points the offset point moves the axis
        // enough to stay inside the cutoff.
        let mut event = three_plus_one();
        TrackClusterer::default().cluster(&mut event);

        assert_eq!(
            event.cluster_status,
            ClusterStatus::Converged { iterations: 1, rejected: 0 }
        );
        assert_eq!(event.selections[3], CandidateSelection::Selected(0));
    }

    #[test]
    fn test_offset_point_rejected_at_half_scale() {
        let mut event = three_plus_one();
        TrackClusterer::new(PcaConfig::default().with_scale_factor(0.5)).cluster(&mut event);

        assert_eq!(
            event.cluster_status,
            ClusterStatus::Converged { iterations: 2, rejected: 1 }
        );
        assert_eq!(event.selections[3], CandidateSelection::Rejected);
        let pcs = event.principal_components.unwrap();
        assert_eq!(pcs.n_points, 3);
        assert_abs_diff_eq!(pcs.eigenvalues[1], 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pcs.mean_doca, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_offset_point_rejected_from_long_track() {
        let mut points: Vec<[f64; 3]> = (0..8).map(|i| [0.0, 0.0, 25.0 * f64::from(i)]).collect();
        points.push([50.0, 0.0, 87.5]);
        let mut event = Event::from_candidates(0, single(&points));
        let clusterer = TrackClusterer::default().with_rejection(true, false);
        clusterer.cluster(&mut event);
        let before = event.principal_components.unwrap().mean_doca;
        assert_relative_eq!(before, 800.0 / 81.0, epsilon = 1e-9);

        TrackClusterer::default().cluster(&mut event);
        assert_eq!(
            event.cluster_status,
            ClusterStatus::Converged { iterations: 2, rejected: 1 }
        );
        assert_eq!(event.selections[8], CandidateSelection::Rejected);
        let after = event.principal_components.unwrap().mean_doca;
        assert!(after <= before);
        assert_abs_diff_eq!(after, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ambiguity_resolved_to_nearest_candidate() {
        let mut candidates = single(&[[0.0, 0.0, 0.0], [0.0, 0.0, 50.0], [0.0, 0.0, 150.0]]);
        candidates.push(vec![
            Hit3d::new(30.0, 0.0, 100.0, 1.0, 3, 3),
            Hit3d::new(0.5, 0.0, 100.0, 1.0, 3, 4),
        ]);
        candidates.push(Vec::new());
        let mut event = Event::from_candidates(0, candidates);
        TrackClusterer::default().with_rejection(true, false).cluster(&mut event);

        assert_eq!(event.selections[3], CandidateSelection::Selected(1));
        assert_eq!(event.selections[4], CandidateSelection::NoCandidates);
        assert_eq!(event.principal_components.unwrap().n_points, 4);
        assert_eq!(event.selected_hits().count(), 4);
    }

    #[test]
    fn test_empty_event_fails() {
        let mut event = Event::from_candidates(0, vec![Vec::new(), Vec::new()]);
        let status = TrackClusterer::default().cluster(&mut event);
        assert_eq!(*status, ClusterStatus::Failed(PcaError::NoPoints));
        assert!(event.principal_components.is_none());
        assert!(!event.is_clustered());
    }

    #[test]
    fn test_cutoff_formula() {
        let clusterer = TrackClusterer::new(PcaConfig::default().with_scale_factor(2.0));
        let pcs = PrincipalComponents {
            n_points: 4,
            mean_position: [0.0; 3],
            eigenvalues: [100.0, 4.0, 0.0],
            eigenvectors: [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            mean_doca: 1.0,
        };
        assert_relative_eq!(clusterer.outlier_cutoff(&pcs), 7.0);

        let negative = PrincipalComponents {
            eigenvalues: [100.0, -1e-12, -1e-12],
            ..pcs
        };
        assert_relative_eq!(clusterer.outlier_cutoff(&negative), 1.0);
    }
}
