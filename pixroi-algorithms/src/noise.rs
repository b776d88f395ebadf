//! Per-channel noise estimation.
//!
//! The baseline and width of a channel are taken from the amplitude
//! histogram of its samples. The fitted estimate restricts the histogram to
//! one standard deviation around the mean and fits a Gaussian there, which
//! suppresses the tail that real pulses add to the distribution.

use nalgebra::{Matrix3, Vector3};

/// Noise estimation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NoiseMode {
    /// Mean and standard deviation of the full histogram.
    Fast,
    /// Gaussian fit within one standard deviation of the mean.
    #[default]
    Fitted,
}

/// Noise baseline and width of one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseParams {
    /// Mean amplitude.
    pub baseline: f64,
    /// Amplitude spread.
    pub sigma: f64,
}

impl NoiseParams {
    /// Creates noise parameters.
    #[must_use]
    pub fn new(baseline: f64, sigma: f64) -> Self {
        Self { baseline, sigma }
    }

    /// Returns true if `value` lies within `k` sigma of the baseline.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64, k: f64) -> bool {
        (value - self.baseline).abs() <= k * self.sigma
    }
}

/// Unit-width amplitude histogram spanning `[min - 1, max + 1]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmplitudeHistogram {
    low: i64,
    counts: Vec<u64>,
}

impl AmplitudeHistogram {
    /// Fills a histogram from channel samples.
    #[must_use]
    pub fn from_samples(samples: &[i32]) -> Self {
        let (Some(&min), Some(&max)) = (samples.iter().min(), samples.iter().max()) else {
            return Self {
                low: 0,
                counts: Vec::new(),
            };
        };
        let low = i64::from(min) - 1;
        let high = i64::from(max) + 1;
        let mut counts = vec![0u64; (high - low + 1) as usize];
        for &sample in samples {
            counts[(i64::from(sample) - low) as usize] += 1;
        }
        Self { low, counts }
    }

    /// Iterates over (amplitude, count) of all bins.
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(i, &count)| ((self.low + i as i64) as f64, count as f64))
    }

    /// Mean and standard deviation of the bins inside `[lo, hi]`.
    ///
    /// Returns `None` if the range holds no entries.
    #[must_use]
    pub fn moments_in(&self, lo: f64, hi: f64) -> Option<NoiseParams> {
        let (mut n, mut sum, mut sum_sq) = (0.0, 0.0, 0.0);
        for (x, count) in self.bins().filter(|(x, _)| (lo..=hi).contains(x)) {
            n += count;
            sum += count * x;
            sum_sq += count * x * x;
        }
        if n <= 0.0 {
            return None;
        }
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Some(NoiseParams::new(mean, variance.sqrt()))
    }

    /// Mean and standard deviation of the whole histogram.
    #[must_use]
    pub fn moments(&self) -> Option<NoiseParams> {
        self.moments_in(f64::NEG_INFINITY, f64::INFINITY)
    }

    /// Fits a Gaussian to the bins inside `[lo, hi]`.
    ///
    /// Minimises the chi-square with Poisson bin errors by damped
    /// Gauss-Newton iterations starting from `start`. Returns `None` if
    /// fewer than three bins are populated, the start width is not
    /// positive, or the fitted mean leaves the range.
    #[must_use]
    pub fn gaussian_fit(&self, lo: f64, hi: f64, start: NoiseParams) -> Option<NoiseParams> {
        let points: Vec<(f64, f64)> = self.bins().filter(|(x, _)| (lo..=hi).contains(x)).collect();
        if points.iter().filter(|(_, count)| *count > 0.0).count() < 3 || !(start.sigma > 0.0) {
            return None;
        }

        let amplitude = points.iter().map(|(_, count)| *count).fold(0.0, f64::max);
        let mut params = Vector3::new(amplitude, start.baseline, start.sigma);
        let mut chi2 = chi_square(&points, &params);
        let mut damping = 1e-3;

        for _ in 0..MAX_FIT_ITERATIONS {
            let mut normal = Matrix3::<f64>::zeros();
            let mut gradient = Vector3::<f64>::zeros();
            for &(x, count) in &points {
                let (value, jacobian) = gaussian_with_jacobian(x, &params);
                let weight = 1.0 / count.max(1.0);
                normal += weight * jacobian * jacobian.transpose();
                gradient += weight * (count - value) * jacobian;
            }

            let accepted = loop {
                let mut damped = normal;
                for i in 0..3 {
                    damped[(i, i)] *= 1.0 + damping;
                }
                let step = damped.lu().solve(&gradient)?;
                let mut trial = params + step;
                trial[2] = trial[2].abs();
                let trial_chi2 = chi_square(&points, &trial);
                if trial_chi2 <= chi2 {
                    damping /= 10.0;
                    break Some((trial, trial_chi2));
                }
                damping *= 10.0;
                if damping > MAX_DAMPING {
                    break None;
                }
            };
            let Some((trial, trial_chi2)) = accepted else {
                break;
            };
            let converged = (chi2 - trial_chi2).abs() <= 1e-9 * chi2.max(1.0);
            params = trial;
            chi2 = trial_chi2;
            if converged {
                break;
            }
        }

        let fit = NoiseParams::new(params[1], params[2]);
        (fit.baseline.is_finite()
            && fit.sigma.is_finite()
            && fit.sigma > 0.0
            && (lo..=hi).contains(&fit.baseline))
            .then_some(fit)
    }
}

const MAX_FIT_ITERATIONS: usize = 50;
const MAX_DAMPING: f64 = 1e10;

/// Gaussian `a * exp(-(x - mu)^2 / (2 sigma^2))` and its gradient in (a, mu, sigma).
fn gaussian_with_jacobian(x: f64, params: &Vector3<f64>) -> (f64, Vector3<f64>) {
    let (amplitude, mean, sigma) = (params[0], params[1], params[2]);
    let dx = x - mean;
    let shape = (-dx * dx / (2.0 * sigma * sigma)).exp();
    let value = amplitude * shape;
    let jacobian = Vector3::new(
        shape,
        value * dx / (sigma * sigma),
        value * dx * dx / (sigma * sigma * sigma),
    );
    (value, jacobian)
}

fn chi_square(points: &[(f64, f64)], params: &Vector3<f64>) -> f64 {
    points
        .iter()
        .map(|&(x, count)| {
            let (value, _) = gaussian_with_jacobian(x, params);
            (count - value).powi(2) / count.max(1.0)
        })
        .sum()
}

/// Estimates the noise baseline and width of one channel.
///
/// An empty channel yields zero baseline and width. The fitted mode falls
/// back to the moments of the restricted window when the fit is not
/// possible.
#[must_use]
pub fn estimate_noise(samples: &[i32], mode: NoiseMode) -> NoiseParams {
    let histogram = AmplitudeHistogram::from_samples(samples);
    let Some(full) = histogram.moments() else {
        return NoiseParams::default();
    };
    match mode {
        NoiseMode::Fast => full,
        NoiseMode::Fitted => {
            let lo = full.baseline - full.sigma;
            let hi = full.baseline + full.sigma;
            let Some(window) = histogram.moments_in(lo, hi) else {
                return full;
            };
            histogram.gaussian_fit(lo, hi, window).unwrap_or(window)
        }
    }
}
