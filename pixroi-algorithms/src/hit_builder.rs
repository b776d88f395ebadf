//! Conversion of matched pulse pairs into 3D hit candidates.

use pixroi_core::{GeometryConfig, Hit3d, Pulse, PulseSet, Result};

use crate::matcher::CandidateGraph;

/// Builds 3D hit candidates from the match graph using the static geometry.
#[derive(Clone, Copy, Debug)]
pub struct HitBuilder<'a> {
    geometry: &'a GeometryConfig,
}

impl<'a> HitBuilder<'a> {
    /// Creates a builder for the given geometry.
    #[must_use]
    pub fn new(geometry: &'a GeometryConfig) -> Self {
        Self { geometry }
    }

    /// Computes the 3D point of one pixel/ROI pulse pair.
    ///
    /// # Errors
    /// Returns an error if either channel is missing from the geometry.
    pub fn hit(&self, pixel_id: usize, pixel: &Pulse, roi_id: usize, roi: &Pulse) -> Result<Hit3d> {
        let g = self.geometry;
        let [pixel_x, pixel_y] = g.pixel_coord(pixel.channel)?;
        let [roi_x, roi_y] = g.roi_coord(roi.channel)?;

        let x = f64::from(roi_x + pixel_x) * g.pixel_pitch + g.tpc_origin[0];
        let y = f64::from(roi_y + pixel_y) * g.pixel_pitch + g.tpc_origin[1];
        let drift_samples = pixel.pos_peak_sample as f64 - g.anode_sample as f64;
        let z = g.drift_length / 2.0 + g.tpc_origin[2] - drift_samples * g.sample_time * g.drift_speed;
        let charge = pixel.integral as f64 * g.charge_scale();

        Ok(Hit3d::new(x, y, z, charge, pixel_id, roi_id))
    }

    /// Builds the candidates of every pixel pulse, index-aligned with `pixel`.
    ///
    /// Of several ROI pulses on the same ROI channel only the first match
    /// yields a candidate.
    ///
    /// # Errors
    /// Returns an error if a pulse channel is missing from the geometry.
    pub fn build(
        &self,
        pixel: &PulseSet,
        roi: &PulseSet,
        graph: &CandidateGraph,
    ) -> Result<Vec<Vec<Hit3d>>> {
        let mut candidates = Vec::with_capacity(pixel.len());
        for (pixel_id, pixel_pulse) in pixel.iter().enumerate() {
            let matches = graph.pixel_to_roi.get(pixel_id).map_or(&[][..], Vec::as_slice);
            let mut hits: Vec<Hit3d> = Vec::with_capacity(matches.len());
            for &roi_id in matches {
                let roi_pulse = &roi.pulses[roi_id];
                let duplicate = hits
                    .iter()
                    .any(|hit| roi.pulses[hit.roi_pulse_id].channel == roi_pulse.channel);
                if !duplicate {
                    hits.push(self.hit(pixel_id, pixel_pulse, roi_id, roi_pulse)?);
                }
            }
            candidates.push(hits);
        }
        Ok(candidates)
    }
}
