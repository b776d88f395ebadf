//! Run configuration.
//!
//! Geometry, discrimination thresholds and clustering parameters are held
//! in one immutable [`ReconstructionConfig`] that every pipeline stage
//! borrows. It is loaded from a flat camelCase JSON document:
//!
//! ```json
//! {
//!   "runId": 2, "nPixels": 36, "nRois": 28, "nSamples": 1000,
//!   "pixelPitch": 2.86, "driftLength": 600.0, "sampleTime": 0.21,
//!   "driftSpeed": 2.1, "anodeSample": 47, "adcLsb": 0.1512, "preampGain": 25.0,
//!   "tpcOrigin": [0.0, 0.0, 0.0],
//!   "pixelCoorX": [...], "pixelCoorY": [...], "roiCoorX": [...], "roiCoorY": [...],
//!   "discSigmaPixelLead": 2.0, "discSigmaPixelPeak": 5.0, ...
//!   "pcaScaleFactor": 1.0, "pcaMaxIterations": 3
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelFamily, Error, Result};

/// Static detector geometry and conversion constants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Pixel pitch in mm.
    pub pixel_pitch: f64,
    /// Pixel offsets within a ROI, in units of pitch.
    pub pixel_coords: Vec<[i32; 2]>,
    /// ROI offsets, in units of pitch.
    pub roi_coords: Vec<[i32; 2]>,
    /// Offset of the TPC origin in mm.
    pub tpc_origin: [f64; 3],
    /// Drift length in mm.
    pub drift_length: f64,
    /// Sample period in us.
    pub sample_time: f64,
    /// Drift speed in mm/us.
    pub drift_speed: f64,
    /// Sample at which charge arrives from the anode plane.
    pub anode_sample: usize,
    /// ADC least significant bit in mV.
    pub adc_lsb: f64,
    /// Preamplifier gain in mV/fC.
    pub preamp_gain: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            pixel_pitch: 2.86,
            pixel_coords: Vec::new(),
            roi_coords: Vec::new(),
            tpc_origin: [0.0; 3],
            drift_length: 600.0,
            sample_time: 0.21,
            drift_speed: 2.1,
            anode_sample: 47,
            adc_lsb: 0.1512,
            preamp_gain: 25.0,
        }
    }
}

impl GeometryConfig {
    /// Sets the channel coordinate tables.
    #[must_use]
    pub fn with_coords(mut self, pixel_coords: Vec<[i32; 2]>, roi_coords: Vec<[i32; 2]>) -> Self {
        self.pixel_coords = pixel_coords;
        self.roi_coords = roi_coords;
        self
    }

    /// Sets the pixel pitch.
    #[must_use]
    pub fn with_pixel_pitch(mut self, pitch: f64) -> Self {
        self.pixel_pitch = pitch;
        self
    }

    /// Sets the TPC origin offset.
    #[must_use]
    pub fn with_tpc_origin(mut self, origin: [f64; 3]) -> Self {
        self.tpc_origin = origin;
        self
    }

    /// Sets the drift parameters.
    #[must_use]
    pub fn with_drift(
        mut self,
        drift_length: f64,
        drift_speed: f64,
        sample_time: f64,
        anode_sample: usize,
    ) -> Self {
        self.drift_length = drift_length;
        self.drift_speed = drift_speed;
        self.sample_time = sample_time;
        self.anode_sample = anode_sample;
        self
    }

    /// Sets the charge conversion constants.
    #[must_use]
    pub fn with_charge_scale(mut self, adc_lsb: f64, preamp_gain: f64) -> Self {
        self.adc_lsb = adc_lsb;
        self.preamp_gain = preamp_gain;
        self
    }

    /// Number of pixel channels.
    #[must_use]
    pub fn n_pixels(&self) -> usize {
        self.pixel_coords.len()
    }

    /// Number of ROI channels.
    #[must_use]
    pub fn n_rois(&self) -> usize {
        self.roi_coords.len()
    }

    /// Offset of a pixel within its ROI.
    ///
    /// # Errors
    /// Returns [`Error::ChannelOutOfRange`] for an unknown channel.
    pub fn pixel_coord(&self, channel: usize) -> Result<[i32; 2]> {
        self.pixel_coords
            .get(channel)
            .copied()
            .ok_or(Error::ChannelOutOfRange {
                family: ChannelFamily::Pixel,
                channel,
                available: self.pixel_coords.len(),
            })
    }

    /// Offset of a ROI.
    ///
    /// # Errors
    /// Returns [`Error::ChannelOutOfRange`] for an unknown channel.
    pub fn roi_coord(&self, channel: usize) -> Result<[i32; 2]> {
        self.roi_coords
            .get(channel)
            .copied()
            .ok_or(Error::ChannelOutOfRange {
                family: ChannelFamily::Roi,
                channel,
                available: self.roi_coords.len(),
            })
    }

    /// Conversion from ADC integral to charge in fC.
    #[must_use]
    pub fn charge_scale(&self) -> f64 {
        self.adc_lsb / self.preamp_gain
    }
}

/// Discrimination thresholds of one channel family.
///
/// Sigma factors multiply the per-channel noise width; absolute floors are
/// in ADC counts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Leading edge threshold in sigma.
    pub lead_sigma: f64,
    /// Peak threshold in sigma.
    pub peak_sigma: f64,
    /// Absolute peak threshold floor.
    pub peak_abs: f64,
    /// Trailing edge threshold in sigma.
    pub trail_sigma: f64,
    /// Negative leading edge threshold in sigma.
    pub neg_lead_sigma: f64,
    /// Negative peak threshold in sigma.
    pub neg_peak_sigma: f64,
    /// Absolute negative peak threshold floor.
    pub neg_peak_abs: f64,
    /// Negative trailing edge threshold in sigma.
    pub neg_trail_sigma: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            lead_sigma: 2.0,
            peak_sigma: 5.0,
            peak_abs: 0.0,
            trail_sigma: 2.0,
            neg_lead_sigma: 2.0,
            neg_peak_sigma: 5.0,
            neg_peak_abs: 0.0,
            neg_trail_sigma: 2.0,
        }
    }
}

impl ThresholdConfig {
    /// Sets the positive lobe thresholds.
    #[must_use]
    pub fn with_positive(mut self, lead_sigma: f64, peak_sigma: f64, peak_abs: f64, trail_sigma: f64) -> Self {
        self.lead_sigma = lead_sigma;
        self.peak_sigma = peak_sigma;
        self.peak_abs = peak_abs;
        self.trail_sigma = trail_sigma;
        self
    }

    /// Sets the negative lobe thresholds.
    #[must_use]
    pub fn with_negative(mut self, peak_sigma: f64, peak_abs: f64, trail_sigma: f64) -> Self {
        self.neg_peak_sigma = peak_sigma;
        self.neg_peak_abs = peak_abs;
        self.neg_trail_sigma = trail_sigma;
        self
    }
}

/// Pulse discrimination parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Pixel thresholds.
    pub pixel: ThresholdConfig,
    /// ROI thresholds.
    pub roi: ThresholdConfig,
    /// Maximum edge search distance from the peak in samples.
    pub range: usize,
}

impl DiscriminatorConfig {
    /// Largest accepted edge search range in samples.
    pub const MAX_RANGE: usize = 1 << 20;
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            pixel: ThresholdConfig::default(),
            roi: ThresholdConfig::default(),
            range: 100,
        }
    }
}

impl DiscriminatorConfig {
    /// Sets the edge search range.
    #[must_use]
    pub fn with_range(mut self, range: usize) -> Self {
        self.range = range;
        self
    }

    /// Sets the pixel thresholds.
    #[must_use]
    pub fn with_pixel(mut self, thresholds: ThresholdConfig) -> Self {
        self.pixel = thresholds;
        self
    }

    /// Sets the ROI thresholds.
    #[must_use]
    pub fn with_roi(mut self, thresholds: ThresholdConfig) -> Self {
        self.roi = thresholds;
        self
    }

    /// Thresholds of a channel family.
    #[must_use]
    pub fn thresholds(&self, family: ChannelFamily) -> &ThresholdConfig {
        match family {
            ChannelFamily::Pixel => &self.pixel,
            ChannelFamily::Roi => &self.roi,
        }
    }
}

/// Track clustering parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Scale of the outlier cutoff distance.
    pub scale_factor: f64,
    /// Maximum number of outlier pruning rounds.
    pub max_iterations: usize,
    /// Maximum share of non-empty pixel pulses that may be rejected.
    pub max_rejected_fraction: f64,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            max_iterations: 3,
            max_rejected_fraction: 0.4,
        }
    }
}

impl PcaConfig {
    /// Sets the outlier cutoff scale.
    #[must_use]
    pub fn with_scale_factor(mut self, scale: f64) -> Self {
        self.scale_factor = scale;
        self
    }

    /// Sets the maximum pruning rounds.
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Seed parameters handed to the external track fitter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackFitConfig {
    /// Positional uncertainty of every point in mm.
    pub pos_err: [f64; 3],
    /// Seed momentum uncertainty.
    pub mom_err: [f64; 3],
    /// Seed momentum magnitude.
    pub mom_mag: f64,
    /// Particle code of the track hypothesis.
    pub pdg_code: i32,
    /// Iteration limit of the fitter.
    pub max_iterations: usize,
}

impl Default for TrackFitConfig {
    fn default() -> Self {
        Self {
            pos_err: [1.0; 3],
            mom_err: [1.0; 3],
            mom_mag: 1.0,
            pdg_code: 13,
            max_iterations: 10,
        }
    }
}

impl TrackFitConfig {
    /// Sets the positional uncertainty.
    #[must_use]
    pub fn with_pos_err(mut self, pos_err: [f64; 3]) -> Self {
        self.pos_err = pos_err;
        self
    }
}

/// Common-mode filter parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseFilterConfig {
    /// Half width of the per-channel noise window in sigma.
    pub window_sigma: f64,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self { window_sigma: 1.0 }
    }
}

/// Complete, immutable reconstruction configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Run ID.
    pub run_id: u32,
    /// Samples per channel.
    pub n_samples: usize,
    /// Detector geometry.
    pub geometry: GeometryConfig,
    /// Pulse discrimination.
    pub discriminator: DiscriminatorConfig,
    /// Track clustering.
    pub pca: PcaConfig,
    /// Track fit seed.
    pub track_fit: TrackFitConfig,
    /// Common-mode filter.
    pub noise_filter: NoiseFilterConfig,
}

// Flat run parameter schema
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonRunParams {
    run_id: u32,
    n_pixels: usize,
    n_rois: usize,
    n_samples: usize,
    pixel_pitch: f64,
    drift_length: f64,
    sample_time: f64,
    drift_speed: f64,
    anode_sample: usize,
    adc_lsb: f64,
    preamp_gain: f64,
    #[serde(default)]
    tpc_origin: Vec<f64>,
    pixel_coor_x: Vec<i32>,
    pixel_coor_y: Vec<i32>,
    roi_coor_x: Vec<i32>,
    roi_coor_y: Vec<i32>,
    disc_sigma_pixel_lead: f64,
    disc_sigma_pixel_peak: f64,
    disc_abs_pixel_peak: f64,
    disc_sigma_pixel_trail: f64,
    disc_sigma_roi_pos_lead: f64,
    disc_sigma_roi_pos_peak: f64,
    disc_abs_roi_pos_peak: f64,
    disc_sigma_roi_pos_trail: f64,
    #[serde(default)]
    disc_sigma_roi_neg_lead: f64,
    disc_sigma_roi_neg_peak: f64,
    disc_abs_roi_neg_peak: f64,
    disc_sigma_roi_neg_trail: f64,
    #[serde(default = "default_disc_range")]
    disc_range: usize,
    pca_scale_factor: f64,
    pca_max_iterations: usize,
    #[serde(flatten)]
    kalman: JsonKalman,
    #[serde(default = "default_noise_filter_sigma")]
    noise_filter_sigma: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonKalman {
    kalman_pos_err: Vec<f64>,
    kalman_mom_err: Vec<f64>,
    kalman_mom_mag: f64,
    kalman_pdg_code: i32,
    kalman_max_iterations: usize,
}

impl Default for JsonKalman {
    fn default() -> Self {
        let defaults = TrackFitConfig::default();
        Self {
            kalman_pos_err: defaults.pos_err.to_vec(),
            kalman_mom_err: defaults.mom_err.to_vec(),
            kalman_mom_mag: defaults.mom_mag,
            kalman_pdg_code: defaults.pdg_code,
            kalman_max_iterations: defaults.max_iterations,
        }
    }
}

fn default_disc_range() -> usize {
    DiscriminatorConfig::default().range
}

fn default_noise_filter_sigma() -> f64 {
    NoiseFilterConfig::default().window_sigma
}

fn vec3(name: &str, values: &[f64]) -> Result<[f64; 3]> {
    <[f64; 3]>::try_from(values)
        .map_err(|_| Error::Config(format!("{name} must have 3 entries, found {}", values.len())))
}

fn coord_table(family: ChannelFamily, xs: &[i32], ys: &[i32], expected: usize) -> Result<Vec<[i32; 2]>> {
    if xs.len() != expected || ys.len() != expected {
        return Err(Error::Config(format!(
            "{family} coordinate tables have {} x and {} y entries, expected {expected}",
            xs.len(),
            ys.len()
        )));
    }
    Ok(xs.iter().zip(ys).map(|(&x, &y)| [x, y]).collect())
}

impl ReconstructionConfig {
    /// Creates a configuration from its parts.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the parts fail [`validate`](Self::validate).
    pub fn new(
        geometry: GeometryConfig,
        discriminator: DiscriminatorConfig,
        pca: PcaConfig,
    ) -> Result<Self> {
        let config = Self {
            geometry,
            discriminator,
            pca,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the track fit seed parameters.
    #[must_use]
    pub fn with_track_fit(mut self, track_fit: TrackFitConfig) -> Self {
        self.track_fit = track_fit;
        self
    }

    /// Sets the common-mode filter parameters.
    #[must_use]
    pub fn with_noise_filter(mut self, noise_filter: NoiseFilterConfig) -> Self {
        self.noise_filter = noise_filter;
        self
    }

    /// Sets the run ID.
    #[must_use]
    pub fn with_run_id(mut self, run_id: u32) -> Self {
        self.run_id = run_id;
        self
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// parameters are inconsistent.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let params: JsonRunParams = serde_json::from_reader(reader)?;
        Self::from_run_params(params)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or the parameters are
    /// inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: JsonRunParams = serde_json::from_str(json)?;
        Self::from_run_params(params)
    }

    fn from_run_params(params: JsonRunParams) -> Result<Self> {
        let tpc_origin = if params.tpc_origin.is_empty() {
            [0.0; 3]
        } else {
            vec3("tpcOrigin", &params.tpc_origin)?
        };

        let geometry = GeometryConfig {
            pixel_pitch: params.pixel_pitch,
            pixel_coords: coord_table(
                ChannelFamily::Pixel,
                &params.pixel_coor_x,
                &params.pixel_coor_y,
                params.n_pixels,
            )?,
            roi_coords: coord_table(
                ChannelFamily::Roi,
                &params.roi_coor_x,
                &params.roi_coor_y,
                params.n_rois,
            )?,
            tpc_origin,
            drift_length: params.drift_length,
            sample_time: params.sample_time,
            drift_speed: params.drift_speed,
            anode_sample: params.anode_sample,
            adc_lsb: params.adc_lsb,
            preamp_gain: params.preamp_gain,
        };

        let discriminator = DiscriminatorConfig {
            pixel: ThresholdConfig::default().with_positive(
                params.disc_sigma_pixel_lead,
                params.disc_sigma_pixel_peak,
                params.disc_abs_pixel_peak,
                params.disc_sigma_pixel_trail,
            ),
            roi: ThresholdConfig {
                lead_sigma: params.disc_sigma_roi_pos_lead,
                peak_sigma: params.disc_sigma_roi_pos_peak,
                peak_abs: params.disc_abs_roi_pos_peak,
                trail_sigma: params.disc_sigma_roi_pos_trail,
                neg_lead_sigma: params.disc_sigma_roi_neg_lead,
                neg_peak_sigma: params.disc_sigma_roi_neg_peak,
                neg_peak_abs: params.disc_abs_roi_neg_peak,
                neg_trail_sigma: params.disc_sigma_roi_neg_trail,
            },
            range: params.disc_range,
        };

        let pca = PcaConfig::default()
            .with_scale_factor(params.pca_scale_factor)
            .with_max_iterations(params.pca_max_iterations);

        let track_fit = TrackFitConfig {
            pos_err: vec3("kalmanPosErr", &params.kalman.kalman_pos_err)?,
            mom_err: vec3("kalmanMomErr", &params.kalman.kalman_mom_err)?,
            mom_mag: params.kalman.kalman_mom_mag,
            pdg_code: params.kalman.kalman_pdg_code,
            max_iterations: params.kalman.kalman_max_iterations,
        };

        let config = Self {
            run_id: params.run_id,
            n_samples: params.n_samples,
            geometry,
            discriminator,
            pca,
            track_fit,
            noise_filter: NoiseFilterConfig {
                window_sigma: params.noise_filter_sigma,
            },
        };

        // Validate once at load time, not per event
        config.validate()?;

        Ok(config)
    }

    /// Checks that all parameters are finite and physically meaningful.
    ///
    /// This is called automatically when loading from JSON.
    /// For programmatically created configs, call this before processing.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        let geometry = &self.geometry;
        let positive = [
            ("pixelPitch", geometry.pixel_pitch),
            ("sampleTime", geometry.sample_time),
            ("preampGain", geometry.preamp_gain),
            ("adcLsb", geometry.adc_lsb),
            ("pcaScaleFactor", self.pca.scale_factor),
            ("noiseFilterSigma", self.noise_filter.window_sigma),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }

        let finite = [
            ("driftLength", geometry.drift_length),
            ("driftSpeed", geometry.drift_speed),
            ("kalmanMomMag", self.track_fit.mom_mag),
        ]
        .into_iter()
        .chain(geometry.tpc_origin.iter().map(|&v| ("tpcOrigin", v)))
        .chain(self.track_fit.pos_err.iter().map(|&v| ("kalmanPosErr", v)));
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(Error::Config(format!("{name} must be finite, got {value}")));
            }
        }

        for (family, thresholds) in [
            (ChannelFamily::Pixel, &self.discriminator.pixel),
            (ChannelFamily::Roi, &self.discriminator.roi),
        ] {
            let values = [
                thresholds.lead_sigma,
                thresholds.peak_sigma,
                thresholds.peak_abs,
                thresholds.trail_sigma,
                thresholds.neg_lead_sigma,
                thresholds.neg_peak_sigma,
                thresholds.neg_peak_abs,
                thresholds.neg_trail_sigma,
            ];
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(Error::Config(format!(
                    "{family} discrimination thresholds must be finite and non-negative"
                )));
            }
        }

        if self.discriminator.range > DiscriminatorConfig::MAX_RANGE {
            return Err(Error::Config(format!(
                "discRange must be at most {}, got {}",
                DiscriminatorConfig::MAX_RANGE,
                self.discriminator.range
            )));
        }

        if !(0.0..=1.0).contains(&self.pca.max_rejected_fraction) {
            return Err(Error::Config(format!(
                "rejected fraction must be within [0, 1], got {}",
                self.pca.max_rejected_fraction
            )));
        }

        if geometry.pixel_coords.is_empty() || geometry.roi_coords.is_empty() {
            return Err(Error::Config(
                "geometry needs at least one pixel and one ROI channel".to_string(),
            ));
        }

        Ok(())
    }
}
