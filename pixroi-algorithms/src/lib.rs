//! pixroi-algorithms: Reconstruction stages for pixel/ROI readout.
//!
//! This crate turns raw waveforms into 3D hits and a track axis:
//! - **Noise** - per-channel baseline and width from the amplitude spectrum
//! - **Common mode** - coherent pickup subtraction
//! - **Pulse finding** - iterative peak subtraction, unipolar and bipolar
//! - **Matching** - temporal overlap of pixel and ROI pulses
//! - **Track clustering** - PCA with ambiguity and outlier rejection
//!
#![warn(missing_docs)]

mod common_mode;
mod hit_builder;
mod matcher;
pub mod noise;
pub mod pca;
mod processing;
mod pulse_finder;
mod seed;
mod track;

pub use common_mode::filter_common_mode;
pub use hit_builder::HitBuilder;
pub use matcher::{CandidateGraph, HitMatcher};
pub use noise::{estimate_noise, AmplitudeHistogram, NoiseMode, NoiseParams};
pub use pca::{mean_doca, principal_components};
pub use processing::{reconstruct_event, reconstruct_events, ReconstructionOptions, RunSummary};
pub use pulse_finder::{find_channel_pulses, ChannelThresholds, Polarity, PulseFinder, PulseFinderConfig};
pub use seed::{fit_events, TrackFitter, TrackSeed};
pub use track::{PruningGuard, TrackClusterer};

// Re-export the configuration types the stages are driven by
pub use pixroi_core::{DiscriminatorConfig, PcaConfig, ReconstructionConfig, ThresholdConfig};
