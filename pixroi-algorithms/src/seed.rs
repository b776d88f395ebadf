//! Seeds for an external trajectory fit.
//!
//! The fit engine itself is not part of this crate. It is reached through
//! the [`TrackFitter`] trait and fed one [`TrackSeed`] per clustered event.

use rayon::prelude::*;

use pixroi_core::{Event, Hit3d, TrackFitConfig};

/// Input of a trajectory fit for one event.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSeed {
    /// Event the seed was built from.
    pub event_id: u32,
    /// Surviving points ordered by ascending z.
    pub points: Vec<Hit3d>,
    /// Positional uncertainty assigned to every point (mm).
    pub pos_err: [f64; 3],
    /// Momentum uncertainty of the seed.
    pub mom_err: [f64; 3],
    /// Seed position: the PCA mean.
    pub position: [f64; 3],
    /// Seed direction: the negated principal axis.
    pub direction: [f64; 3],
    /// Seed momentum magnitude.
    pub mom_mag: f64,
    /// Particle hypothesis as a PDG code.
    pub pdg_code: i32,
}

impl TrackSeed {
    /// Builds the seed of a clustered event.
    ///
    /// Returns `None` if clustering did not converge or no point survived.
    #[must_use]
    pub fn from_event(event: &Event, config: &TrackFitConfig) -> Option<Self> {
        if !event.is_clustered() {
            return None;
        }
        let components = event.principal_components.as_ref()?;

        let mut points: Vec<Hit3d> = event.selected_hits().copied().collect();
        if points.is_empty() {
            return None;
        }
        points.sort_by(|a, b| a.z.total_cmp(&b.z));

        let axis = components.axis();
        Some(Self {
            event_id: event.event_id,
            points,
            pos_err: config.pos_err,
            mom_err: config.mom_err,
            position: components.mean_position,
            direction: [-axis[0], -axis[1], -axis[2]],
            mom_mag: config.mom_mag,
            pdg_code: config.pdg_code,
        })
    }

    /// Seed momentum vector.
    #[must_use]
    pub fn momentum(&self) -> [f64; 3] {
        self.direction.map(|d| d * self.mom_mag)
    }
}

/// External trajectory fit engine.
pub trait TrackFitter: Sync {
    /// Fitted trajectory.
    type Track: Send;
    /// Reported fit failure.
    type Error: Send;

    /// Fits one seed.
    ///
    /// # Errors
    /// Returns the engine's failure report.
    fn fit(&self, seed: &TrackSeed, config: &TrackFitConfig) -> Result<Self::Track, Self::Error>;
}

/// Fits every seedable event.
///
/// The result is index-aligned with `events`; events without a seed yield
/// `None`.
pub fn fit_events<F: TrackFitter>(
    fitter: &F,
    events: &[Event],
    config: &TrackFitConfig,
) -> Vec<Option<Result<F::Track, F::Error>>> {
    events
        .par_iter()
        .map(|event| {
            let seed = TrackSeed::from_event(event, config)?;
            let result = fitter.fit(&seed, config);
            if result.is_err() {
                log::warn!("event {}: track fit failed", event.event_id);
            }
            Some(result)
        })
        .collect()
}
