//! 3D hit candidates.

/// A 3D space point built from one matched pixel/ROI pulse pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit3d {
    /// X coordinate in mm.
    pub x: f64,
    /// Y coordinate in mm.
    pub y: f64,
    /// Z coordinate (drift direction) in mm.
    pub z: f64,
    /// Collected charge in fC.
    pub charge: f64,
    /// ID of the originating pixel pulse.
    pub pixel_pulse_id: usize,
    /// ID of the originating ROI pulse.
    pub roi_pulse_id: usize,
}

impl Hit3d {
    /// Creates a hit candidate.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64, charge: f64, pixel_pulse_id: usize, roi_pulse_id: usize) -> Self {
        Self {
            x,
            y,
            z,
            charge,
            pixel_pulse_id,
            roi_pulse_id,
        }
    }

    /// Position as an array.
    #[inline]
    #[must_use]
    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}
