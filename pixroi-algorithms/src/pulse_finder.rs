//! Pulse finding on digitized channel waveforms.
//!
//! Pulses are extracted by iterative peak subtraction: the tallest
//! remaining sample above the peak threshold is located, its leading and
//! trailing edges are searched within a fixed range, and the pulse
//! footprint is overwritten with the noise baseline before the next
//! maximum is taken. Every iteration clears the current peak sample, so
//! the search terminates once no sample reaches the peak threshold.

use pixroi_core::{NegativeLobe, Pulse, PulseSet, ThresholdConfig, Waveform};

use crate::noise::{estimate_noise, NoiseMode, NoiseParams};

/// Pulse shape expected on a channel family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Polarity {
    /// Single positive lobe (collection signal).
    #[default]
    Unipolar,
    /// Positive lobe followed by a negative lobe (induction signal).
    Bipolar,
}

/// Absolute discrimination thresholds of one channel, in ADC counts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelThresholds {
    /// Noise baseline.
    pub baseline: f64,
    /// Leading edge threshold.
    pub lead: f64,
    /// Peak threshold.
    pub peak: f64,
    /// Trailing edge threshold.
    pub trail: f64,
    /// Negative peak threshold.
    pub neg_peak: f64,
    /// Negative trailing edge threshold.
    pub neg_trail: f64,
}

impl ChannelThresholds {
    /// Thresholds for a unipolar channel; negative thresholds sit at the baseline.
    #[must_use]
    pub fn new(baseline: f64, lead: f64, peak: f64, trail: f64) -> Self {
        Self {
            baseline,
            lead,
            peak,
            trail,
            neg_peak: baseline,
            neg_trail: baseline,
        }
    }

    /// Sets the negative lobe thresholds.
    #[must_use]
    pub fn with_negative(mut self, neg_peak: f64, neg_trail: f64) -> Self {
        self.neg_peak = neg_peak;
        self.neg_trail = neg_trail;
        self
    }

    /// Derives the thresholds from the channel noise.
    #[must_use]
    pub fn from_noise(noise: NoiseParams, config: &ThresholdConfig) -> Self {
        let NoiseParams { baseline, sigma } = noise;
        Self {
            baseline,
            lead: baseline + config.lead_sigma * sigma,
            peak: baseline + (config.peak_sigma * sigma).max(config.peak_abs),
            trail: baseline + config.trail_sigma * sigma,
            neg_peak: baseline - (config.neg_peak_sigma * sigma).max(config.neg_peak_abs),
            neg_trail: baseline - config.neg_trail_sigma * sigma,
        }
    }

    /// Value written over a subtracted pulse footprint.
    ///
    /// This is the rounded baseline, lowered below the peak threshold if
    /// needed so the cleared samples can never be found again.
    #[must_use]
    pub fn fill_value(&self) -> i32 {
        let fill = self.baseline.round();
        if fill >= self.peak {
            (self.peak.ceil() - 1.0) as i32
        } else {
            fill as i32
        }
    }
}

/// Pulse finder configuration for one channel family.
#[derive(Clone, Debug, PartialEq)]
pub struct PulseFinderConfig {
    /// Threshold factors relative to the channel noise.
    pub thresholds: ThresholdConfig,
    /// Maximum edge search distance from the peak in samples.
    pub range: usize,
    /// Expected pulse shape.
    pub polarity: Polarity,
    /// Noise estimation mode.
    pub noise_mode: NoiseMode,
}

impl Default for PulseFinderConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            range: 100,
            polarity: Polarity::Unipolar,
            noise_mode: NoiseMode::Fitted,
        }
    }
}

/// Iterative peak-subtraction pulse finder.
#[derive(Clone, Debug, Default)]
pub struct PulseFinder {
    config: PulseFinderConfig,
}

impl PulseFinder {
    /// Create a pulse finder with the given configuration.
    #[must_use]
    pub fn new(config: PulseFinderConfig) -> Self {
        Self { config }
    }

    /// Create a pulse finder from threshold factors.
    #[must_use]
    pub fn with_thresholds(thresholds: ThresholdConfig, range: usize, polarity: Polarity) -> Self {
        Self::new(PulseFinderConfig {
            thresholds,
            range,
            polarity,
            ..PulseFinderConfig::default()
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &PulseFinderConfig {
        &self.config
    }

    /// Finds the pulses on all channels of a waveform.
    ///
    /// Pulse IDs are assigned in channel order, then in order of detection
    /// within a channel.
    #[must_use]
    pub fn find_pulses(&self, waveform: &Waveform) -> PulseSet {
        let mut pulses = PulseSet::new();
        let mut buffer = Vec::with_capacity(waveform.n_samples());
        for (channel, samples) in waveform.channels().enumerate() {
            let noise = estimate_noise(samples, self.config.noise_mode);
            let thresholds = ChannelThresholds::from_noise(noise, &self.config.thresholds);
            buffer.clear();
            buffer.extend_from_slice(samples);
            extract_pulses(
                channel,
                &mut buffer,
                &thresholds,
                self.config.polarity,
                self.config.range,
                &mut pulses,
            );
        }
        log::debug!(
            "found {} {:?} pulses on {} channels ({} missed)",
            pulses.len(),
            self.config.polarity,
            waveform.n_channels(),
            pulses.n_missed
        );
        pulses
    }
}

/// Finds the pulses of one channel with explicit thresholds.
///
/// `samples` is copied into a working buffer; the input is not modified.
/// Found pulses are appended to `pulses`, unresolved peaks increment its
/// miss counter.
pub fn find_channel_pulses(
    channel: usize,
    samples: &[i32],
    thresholds: &ChannelThresholds,
    polarity: Polarity,
    range: usize,
    pulses: &mut PulseSet,
) {
    let mut buffer = samples.to_vec();
    extract_pulses(channel, &mut buffer, thresholds, polarity, range, pulses);
}

/// Edge search result around one peak. Indices may lie outside the buffer
/// when an edge was not resolved.
struct Edges {
    first: isize,
    last: isize,
    found_first: bool,
    found_last: bool,
    negative_lobe: Option<NegativeLobe>,
}

fn extract_pulses(
    channel: usize,
    buffer: &mut [i32],
    thresholds: &ChannelThresholds,
    polarity: Polarity,
    range: usize,
    pulses: &mut PulseSet,
) {
    let Some(end) = buffer.len().checked_sub(1) else {
        return;
    };
    let fill = thresholds.fill_value();

    while let Some((peak, peak_value)) = first_maximum(buffer) {
        if f64::from(peak_value) < thresholds.peak {
            break;
        }

        let mut edges = locate_edges(buffer, peak, thresholds, range);
        if polarity == Polarity::Bipolar && edges.found_last {
            extend_negative_lobe(buffer, peak, thresholds, range, &mut edges);
        }

        if edges.found_first && edges.found_last {
            let pulse = build_pulse(channel, buffer, peak, peak_value, &edges);
            pulses.push(pulse);
        } else {
            pulses.n_missed += 1;
        }

        let first = edges.first.max(0) as usize;
        let last = (edges.last.max(0) as usize).min(end);
        buffer[first..=last].fill(fill);
    }
}

/// Index and value of the first maximum.
fn first_maximum(buffer: &[i32]) -> Option<(usize, i32)> {
    let mut best: Option<(usize, i32)> = None;
    for (index, &value) in buffer.iter().enumerate() {
        if best.is_none_or(|(_, max)| value > max) {
            best = Some((index, value));
        }
    }
    best
}

fn locate_edges(buffer: &[i32], peak: usize, thresholds: &ChannelThresholds, range: usize) -> Edges {
    let len = buffer.len() as isize;
    let peak = peak as isize;
    let mut edges = Edges {
        first: peak,
        last: peak,
        found_first: false,
        found_last: false,
        negative_lobe: None,
    };
    for offset in 1..=range as isize {
        if !edges.found_first {
            edges.first = peak - offset;
            if edges.first >= 0 && f64::from(buffer[edges.first as usize]) < thresholds.lead {
                edges.found_first = true;
            }
        }
        if !edges.found_last {
            edges.last = peak + offset;
            if edges.last < len && f64::from(buffer[edges.last as usize]) < thresholds.trail {
                edges.found_last = true;
            }
        }
        if edges.found_first && edges.found_last {
            break;
        }
    }
    edges
}

/// Follows a bipolar pulse past its positive trailing edge: find the
/// crossing below the baseline, require the negative peak threshold to be
/// crossed, and end the pulse where the signal rises back above the
/// negative trailing threshold. The negative extremum is tracked from the
/// zero crossing up to the end of the pulse.
fn extend_negative_lobe(
    buffer: &[i32],
    peak: usize,
    thresholds: &ChannelThresholds,
    range: usize,
    edges: &mut Edges,
) {
    edges.found_last = false;
    let start = edges.last as usize;
    let end = peak.saturating_add(range.saturating_mul(3)).min(buffer.len() - 1);

    let mut zero_cross: Option<usize> = None;
    let mut crossed_neg_peak = false;
    let mut neg_peak = (start, 0);
    for (sample, &value) in buffer.iter().enumerate().take(end + 1).skip(start) {
        let level = f64::from(value);
        match zero_cross {
            None => {
                if level < thresholds.baseline {
                    zero_cross = Some(sample);
                    neg_peak = (sample, value);
                }
            }
            Some(_) if !crossed_neg_peak => crossed_neg_peak = level <= thresholds.neg_peak,
            Some(_) => {}
        }

        edges.last = sample as isize;
        if crossed_neg_peak && level > thresholds.neg_trail {
            edges.found_last = true;
            break;
        }
        if zero_cross.is_some() && value < neg_peak.1 {
            neg_peak = (sample, value);
        }
    }

    if edges.found_last {
        edges.negative_lobe = zero_cross.map(|zero_cross_sample| NegativeLobe {
            zero_cross_sample,
            peak_sample: neg_peak.0,
            peak_value: neg_peak.1,
        });
    }
}

fn build_pulse(channel: usize, buffer: &[i32], peak: usize, peak_value: i32, edges: &Edges) -> Pulse {
    let first = edges.first as usize;
    let last = edges.last as usize;
    let raw = buffer[first..=last].to_vec();
    let integral = raw.iter().map(|&v| i64::from(v)).sum();
    let (pos_width, neg_width) = match edges.negative_lobe {
        Some(lobe) => (lobe.zero_cross_sample - first, last - lobe.zero_cross_sample + 1),
        None => (last - first + 1, 0),
    };
    Pulse {
        channel,
        first_sample: first,
        last_sample: last,
        pos_peak_sample: peak,
        pos_peak_value: peak_value,
        negative_lobe: edges.negative_lobe,
        pos_width,
        neg_width,
        integral,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat baseline with a symmetric triangular pulse.
    fn triangle(len: usize, baseline: i32, peak: usize, height: i32, half_width: usize) -> Vec<i32> {
        let slope = height / half_width as i32;
        (0..len)
            .map(|i| {
                let distance = i.abs_diff(peak);
                if distance < half_width {
                    baseline + height - slope * distance as i32
                } else {
                    baseline
                }
            })
            .collect()
    }

    fn scenario_thresholds() -> ChannelThresholds {
        ChannelThresholds::new(100.0, 150.0, 300.0, 150.0)
    }

    #[test]
    fn test_single_triangular_pulse() {
        let samples = triangle(200, 100, 50, 400, 10);
        let mut pulses = PulseSet::new();
        find_channel_pulses(0, &samples, &scenario_thresholds(), Polarity::Unipolar, 20, &mut pulses);

        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses.n_missed, 0);
        let pulse = &pulses.pulses[0];
        assert_eq!(pulse.first_sample, 41);
        assert_eq!(pulse.last_sample, 59);
        assert_eq!(pulse.pos_peak_sample, 50);
        assert_eq!(pulse.pos_peak_value, 500);
        assert_eq!(pulse.pos_width, 19);
        assert_eq!(pulse.neg_width, 0);
        assert_eq!(pulse.integral, pulse.raw.iter().map(|&v| i64::from(v)).sum::<i64>());
        assert!(pulse.is_well_ordered());
        assert_eq!(pulses.lead_order.iter().collect::<Vec<_>>(), vec![(41, 0)]);
        assert_eq!(pulses.trail_order.iter().collect::<Vec<_>>(), vec![(59, 0)]);
        // The input is never modified.
        assert_eq!(samples[50], 500);
    }

    #[test]
    fn test_two_pulses_found_tallest_first() {
        let mut samples = triangle(300, 100, 60, 300, 10);
        for (i, v) in triangle(300, 0, 200, 500, 10).into_iter().enumerate() {
            samples[i] += v;
        }
        let mut pulses = PulseSet::new();
        find_channel_pulses(3, &samples, &scenario_thresholds(), Polarity::Unipolar, 20, &mut pulses);

        assert_eq!(pulses.len(), 2);
        assert_eq!(pulses.pulses[0].pos_peak_sample, 200);
        assert_eq!(pulses.pulses[1].pos_peak_sample, 60);
        assert!(pulses.iter().all(|p| p.channel == 3));
        let leads: Vec<_> = pulses.lead_order.iter().map(|(_, id)| id).collect();
        assert_eq!(leads, vec![1, 0]);
    }

    #[test]
    fn test_unresolved_edge_is_missed_and_cleared() {
        // The pulse is wider than the search range.
        let samples = triangle(200, 100, 100, 400, 40);
        let mut pulses = PulseSet::new();
        find_channel_pulses(0, &samples, &scenario_thresholds(), Polarity::Unipolar, 5, &mut pulses);

        assert!(pulses.is_empty());
        assert!(pulses.n_missed >= 1);
    }

    #[test]
    fn test_zero_range_terminates() {
        let samples = triangle(100, 100, 50, 400, 10);
        let mut pulses = PulseSet::new();
        find_channel_pulses(0, &samples, &scenario_thresholds(), Polarity::Unipolar, 0, &mut pulses);

        assert!(pulses.is_empty());
        // Every sample at or above the peak threshold is a separate miss.
        let above = samples.iter().filter(|&&v| f64::from(v) >= 300.0).count();
        assert_eq!(pulses.n_missed, above);
    }

    #[test]
    fn test_fill_value_stays_below_peak_threshold() {
        let thresholds = ChannelThresholds::new(100.0, 100.0, 100.0, 100.0);
        assert_eq!(thresholds.fill_value(), 99);

        let samples = vec![100; 50];
        let mut pulses = PulseSet::new();
        find_channel_pulses(0, &samples, &thresholds, Polarity::Unipolar, 3, &mut pulses);
        assert!(pulses.is_empty());
    }

    #[test]
    fn test_bipolar_pulse() {
        let mut samples = vec![100; 200];
        // Positive lobe peaking at 50, straight into a negative lobe.
        for (offset, value) in [200, 300, 400, 500, 400, 300, 200, 120].iter().enumerate() {
            samples[47 + offset] = *value;
        }
        for (offset, value) in [60, 20, 0, 20, 60, 100].iter().enumerate() {
            samples[55 + offset] = *value;
        }
        let thresholds =
            ChannelThresholds::new(100.0, 150.0, 300.0, 150.0).with_negative(50.0, 90.0);
        let mut pulses = PulseSet::new();
        find_channel_pulses(1, &samples, &thresholds, Polarity::Bipolar, 10, &mut pulses);

        assert_eq!(pulses.len(), 1);
        let pulse = &pulses.pulses[0];
        let lobe = pulse.negative_lobe.unwrap();
        assert_eq!(pulse.first_sample, 46);
        assert_eq!(lobe.zero_cross_sample, 55);
        assert_eq!(lobe.peak_sample, 57);
        assert_eq!(lobe.peak_value, 0);
        assert_eq!(pulse.last_sample, 60);
        assert_eq!(pulse.pos_width, 9);
        assert_eq!(pulse.neg_width, 6);
        assert_eq!(pulse.raw.len(), 15);
        assert!(pulse.is_well_ordered());
    }

    #[test]
    fn test_bipolar_without_negative_lobe_is_missed() {
        let samples = triangle(200, 100, 50, 400, 10);
        let thresholds =
            ChannelThresholds::new(100.0, 150.0, 300.0, 150.0).with_negative(50.0, 90.0);
        let mut pulses = PulseSet::new();
        find_channel_pulses(0, &samples, &thresholds, Polarity::Bipolar, 10, &mut pulses);

        assert!(pulses.is_empty());
        assert_eq!(pulses.n_missed, 1);
    }

    #[test]
    fn test_thresholds_from_noise() {
        let config = ThresholdConfig::default().with_positive(2.0, 5.0, 30.0, 3.0).with_negative(4.0, 10.0, 1.0);
        let thresholds = ChannelThresholds::from_noise(NoiseParams::new(100.0, 2.0), &config);
        assert_eq!(thresholds.lead, 104.0);
        assert_eq!(thresholds.peak, 130.0);
        assert_eq!(thresholds.trail, 106.0);
        assert_eq!(thresholds.neg_peak, 90.0);
        assert_eq!(thresholds.neg_trail, 98.0);
    }

    #[test]
    fn test_pulse_finder_on_waveform() {
        let waveform = Waveform::from_channels(vec![
            vec![0; 120],
            triangle(120, 0, 60, 400, 10),
        ])
        .unwrap();
        let config = ThresholdConfig::default().with_positive(2.0, 5.0, 100.0, 2.0);
        let finder = PulseFinder::with_thresholds(config, 20, Polarity::Unipolar);
        let pulses = finder.find_pulses(&waveform);

        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses.pulses[0].channel, 1);
        assert_eq!(pulses.pulses[0].pos_peak_sample, 60);
    }
}
