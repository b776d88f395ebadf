use approx::assert_abs_diff_eq;
use pixroi_algorithms::{reconstruct_event, reconstruct_events, ReconstructionOptions, RunSummary};
use pixroi_core::{
    ChannelFamily, ClusterStatus, DiscriminatorConfig, Error, GeometryConfig, PcaConfig, PcaError,
    RawEvent, ReconstructionConfig, ThresholdConfig, Waveform,
};

const N_SAMPLES: usize = 200;
const BASELINE: i32 = 100;

/// Deterministic, roughly Gaussian noise with sigma ~3 ADC counts.
fn noise(seed: u64) -> Vec<i32> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
    (0..N_SAMPLES)
        .map(|_| {
            let mut acc = 0.0;
            for _ in 0..12 {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                acc += (state >> 33) as f64 / f64::from(1u32 << 31);
            }
            (((acc - 6.0) * 3.0).round() as i32).clamp(-8, 8)
        })
        .collect()
}

fn triangle(samples: &mut [i32], peak: usize, height: i32, half_width: usize) {
    let step = height / half_width as i32;
    for (i, sample) in samples.iter_mut().enumerate() {
        let distance = i.abs_diff(peak);
        if distance < half_width {
            *sample += height - step * distance as i32;
        }
    }
}

fn pixel_channel(seed: u64, peaks: &[usize]) -> Vec<i32> {
    let mut samples: Vec<i32> = noise(seed).into_iter().map(|n| BASELINE + n).collect();
    for &peak in peaks {
        triangle(&mut samples, peak, 400, 10);
    }
    samples
}

/// Positive lobe at `peak`, negative lobe centred 14 samples later.
fn roi_channel(seed: u64, peaks: &[usize]) -> Vec<i32> {
    let mut samples: Vec<i32> = noise(seed).into_iter().map(|n| BASELINE + n).collect();
    for &peak in peaks {
        triangle(&mut samples, peak, 400, 10);
        triangle(&mut samples, peak + 14, -200, 5);
    }
    samples
}

/// Four pixels with one pulse each along a straight track, plus a fifth
/// ROI that fires together with ROI 2.
fn track_event(event_id: u32) -> RawEvent {
    let pixel = Waveform::from_channels(vec![
        pixel_channel(0, &[40]),
        pixel_channel(1, &[80]),
        pixel_channel(2, &[120]),
        pixel_channel(3, &[160]),
    ])
    .unwrap();
    let roi = Waveform::from_channels(vec![
        roi_channel(10, &[40]),
        roi_channel(11, &[80]),
        roi_channel(12, &[120]),
        roi_channel(13, &[160]),
        roi_channel(14, &[120]),
    ])
    .unwrap();
    RawEvent::new(event_id, pixel, roi)
}

fn config() -> ReconstructionConfig {
    let geometry = GeometryConfig::default().with_coords(
        vec![[0, 0], [1, 0], [2, 0], [3, 0]],
        vec![[0, 0], [4, 0], [8, 0], [12, 0], [40, 0]],
    );
    let discriminator = DiscriminatorConfig::default()
        .with_range(20)
        .with_pixel(ThresholdConfig::default().with_positive(5.0, 10.0, 0.0, 5.0))
        .with_roi(
            ThresholdConfig::default()
                .with_positive(5.0, 10.0, 0.0, 5.0)
                .with_negative(10.0, 0.0, 5.0),
        );
    ReconstructionConfig::new(geometry, discriminator, PcaConfig::default())
        .unwrap()
        .with_run_id(12)
}

fn options() -> ReconstructionOptions {
    ReconstructionOptions::default().with_common_mode(false)
}

#[test]
fn test_pulses_found_on_every_channel() {
    let event = reconstruct_event(&track_event(1), &config(), &options()).unwrap();

    assert_eq!(event.pixel_pulses.len(), 4);
    assert_eq!(event.pixel_pulses.n_missed, 0);
    for (k, pulse) in event.pixel_pulses.iter().enumerate() {
        let peak = 40 + 40 * k;
        assert_eq!(pulse.channel, k);
        assert_eq!(pulse.pos_peak_sample, peak);
        assert_eq!((pulse.first_sample, pulse.last_sample), (peak - 10, peak + 10));
        assert!(!pulse.is_bipolar());
    }

    assert_eq!(event.roi_pulses.len(), 5);
    assert_eq!(event.roi_pulses.n_missed, 0);
    let first = &event.roi_pulses.pulses[0];
    let lobe = first.negative_lobe.unwrap();
    assert_eq!((first.first_sample, first.last_sample), (30, 59));
    assert_eq!(lobe.zero_cross_sample, 50);
    assert_eq!(lobe.peak_sample, 54);
    assert_eq!((first.pos_width, first.neg_width), (20, 10));
    assert!(event.roi_pulses.iter().all(|p| p.is_well_ordered()));
}

#[test]
fn test_track_reconstruction() {
    let event = reconstruct_event(&track_event(1), &config(), &options()).unwrap();
    assert_eq!((event.run_id, event.event_id), (12, 1));

    let stats = event.statistics();
    assert_eq!(stats.n_hit_candidates, 5);
    assert_eq!(stats.n_ambiguities, 1);
    assert_eq!(stats.n_unmatched_pixel_pulses, 0);
    assert_eq!(stats.n_unmatched_roi_pulses, 0);
    assert_eq!(event.hit_candidates[2].len(), 2);

    // The ambiguous pixel pulse keeps the ROI on the track.
    let chosen = event.selections[2].selected().unwrap();
    assert_eq!(event.hit_candidates[2][chosen].roi_pulse_id, 2);

    assert!(matches!(
        event.cluster_status,
        ClusterStatus::Converged { rejected: 0, .. }
    ));
    let pcs = event.principal_components.unwrap();
    assert_eq!(pcs.n_points, 4);
    assert_abs_diff_eq!(pcs.mean_doca, 0.0, epsilon = 1e-6);

    // Consecutive hits step 5 pitches in x and 40 samples of drift in z.
    let geometry = &config().geometry;
    let dx = 5.0 * geometry.pixel_pitch;
    let dz = -40.0 * geometry.sample_time * geometry.drift_speed;
    let norm = dx.hypot(dz);
    let axis = pcs.axis();
    let cosine = (axis[0] * dx + axis[2] * dz) / norm;
    assert_abs_diff_eq!(cosine.abs(), 1.0, epsilon = 1e-9);
}

#[test]
fn test_default_options_with_common_mode() {
    let defaults = ReconstructionOptions::default();
    assert!(defaults.common_mode);
    let event = reconstruct_event(&track_event(8), &config(), &defaults).unwrap();

    assert_eq!(event.pixel_pulses.len(), 4);
    assert_eq!(event.pixel_pulses.n_missed, 0);
    for (k, pulse) in event.pixel_pulses.iter().enumerate() {
        let peak = 40 + 40 * k;
        assert_eq!((pulse.channel, pulse.pos_peak_sample), (k, peak));
        assert_eq!((pulse.first_sample, pulse.last_sample), (peak - 10, peak + 10));
    }
    assert_eq!(event.roi_pulses.len(), 5);
    assert_eq!(event.roi_pulses.n_missed, 0);
    assert!(event.roi_pulses.iter().all(|p| p.is_bipolar()));
    let peaks: Vec<(usize, usize)> = event
        .roi_pulses
        .iter()
        .map(|p| (p.channel, p.pos_peak_sample))
        .collect();
    assert_eq!(peaks, vec![(0, 40), (1, 80), (2, 120), (3, 160), (4, 120)]);

    let stats = event.statistics();
    assert_eq!(stats.n_hit_candidates, 5);
    assert_eq!(stats.n_ambiguities, 1);
    assert_eq!(stats.n_unmatched_pixel_pulses, 0);
    let chosen = event.selections[2].selected().unwrap();
    assert_eq!(event.hit_candidates[2][chosen].roi_pulse_id, 2);
    assert!(matches!(
        event.cluster_status,
        ClusterStatus::Converged { rejected: 0, .. }
    ));
    assert_abs_diff_eq!(event.principal_components.unwrap().mean_doca, 0.0, epsilon = 1e-6);
}

#[test]
fn test_pixel_pulse_without_roi_is_unmatched() {
    let mut raw = track_event(2);
    let quiet = roi_channel(13, &[]);
    raw.roi.channel_mut(3).copy_from_slice(&quiet);

    let event = reconstruct_event(&raw, &config(), &options()).unwrap();
    let stats = event.statistics();
    assert_eq!(stats.n_roi_pulses, 4);
    assert_eq!(stats.n_unmatched_pixel_pulses, 1);
    assert!(event.hit_candidates[3].is_empty());
    assert!(event.is_clustered());
}

#[test]
fn test_unipolar_roi_search() {
    let options = options().with_bipolar_roi(false);
    let event = reconstruct_event(&track_event(3), &config(), &options).unwrap();

    assert_eq!(event.roi_pulses.len(), 5);
    assert!(event.roi_pulses.iter().all(|p| !p.is_bipolar()));
    assert_eq!(event.roi_pulses.pulses[0].last_sample, 50);
    assert_eq!(event.statistics().n_hit_candidates, 5);
}

#[test]
fn test_quiet_event_fails_clustering() {
    let pixel = Waveform::from_channels((0..4).map(|c| pixel_channel(c, &[])).collect()).unwrap();
    let roi = Waveform::from_channels((0..5).map(|c| roi_channel(10 + c, &[])).collect()).unwrap();
    let raw = RawEvent::new(4, pixel, roi);

    let event = reconstruct_event(&raw, &config(), &options()).unwrap();
    assert!(event.pixel_pulses.is_empty());
    assert_eq!(event.cluster_status, ClusterStatus::Failed(PcaError::NoPoints));
    assert!(event.principal_components.is_none());
}

#[test]
fn test_batch_preserves_order() {
    let raws = vec![track_event(9), track_event(3), track_event(5)];
    let options = options().with_subrun_id(2);
    let events = reconstruct_events(&raws, &config(), &options).unwrap();

    let ids: Vec<u32> = events.iter().map(|e| e.event_id).collect();
    assert_eq!(ids, vec![9, 3, 5]);
    assert!(events.iter().all(|e| e.subrun_id == 2 && e.is_clustered()));

    let summary = RunSummary::from_events(&events);
    assert_eq!(summary.n_events, 3);
    assert_eq!(summary.n_failed, 0);
    assert_abs_diff_eq!(summary.avg_hit_candidates, 5.0);
    assert_abs_diff_eq!(summary.avg_ambiguities, 1.0);
}

#[test]
fn test_batch_rejects_shape_mismatch_before_processing() {
    let mut bad = track_event(7);
    bad.pixel = Waveform::from_channels(vec![pixel_channel(0, &[40]); 3]).unwrap();
    let raws = vec![track_event(6), bad];

    let result = reconstruct_events(&raws, &config(), &options());
    assert!(matches!(
        result,
        Err(Error::ChannelCount {
            family: ChannelFamily::Pixel,
            found: 3,
            expected: 4,
        })
    ));
}
