//! Common-mode noise filter.
//!
//! Noise picked up coherently by all channels of a readout family is
//! estimated per sample as the mean of the channels that are quiet at that
//! sample, and subtracted from every channel. Where no channel is quiet the
//! mean fitted baseline stands in for the estimate.

use pixroi_core::Waveform;

use crate::noise::{estimate_noise, NoiseMode, NoiseParams};

/// Removes the common-mode component from all channels of `waveform`.
///
/// A channel takes part in the estimate at a sample if its value lies
/// within `window_sigma` noise widths of its fitted baseline. At samples
/// where no channel is quiet, the rounded mean of the fitted baselines is
/// subtracted instead, so the output stays centred on zero. Returns the
/// number of samples estimated from quiet channels.
pub fn filter_common_mode(waveform: &mut Waveform, window_sigma: f64) -> usize {
    let noise: Vec<NoiseParams> = waveform
        .channels()
        .map(|samples| estimate_noise(samples, NoiseMode::Fitted))
        .collect();
    if noise.is_empty() {
        return 0;
    }
    let fallback = (noise.iter().map(|p| p.baseline).sum::<f64>() / noise.len() as f64).round() as i32;

    let (mut corrected, mut fallbacks) = (0, 0usize);
    for sample in 0..waveform.n_samples() {
        let (mut sum, mut count) = (0.0, 0usize);
        for (channel, params) in noise.iter().enumerate() {
            let Some(value) = waveform.get(channel, sample) else {
                continue;
            };
            if params.contains(f64::from(value), window_sigma) {
                sum += f64::from(value);
                count += 1;
            }
        }
        let common = if count == 0 {
            fallbacks += 1;
            fallback
        } else {
            corrected += 1;
            (sum / count as f64).round() as i32
        };
        if common != 0 {
            for channel in 0..waveform.n_channels() {
                waveform.channel_mut(channel)[sample] -= common;
            }
        }
    }
    log::debug!(
        "common-mode filter corrected {corrected}/{} samples over {} channels, {fallbacks} from baselines",
        waveform.n_samples(),
        waveform.n_channels()
    );
    corrected
}
