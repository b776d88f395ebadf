//! pixroi-core: Core types for pixel/ROI waveform reconstruction.
//!
//! This crate provides the data model shared by all pipeline stages:
//! waveforms, pulses, 3D hit candidates, per-event state and the run
//! configuration.
//!

pub mod config;
pub mod error;
pub mod event;
pub mod hit;
pub mod pulse;
pub mod waveform;

pub use config::{
    DiscriminatorConfig, GeometryConfig, NoiseFilterConfig, PcaConfig, ReconstructionConfig,
    ThresholdConfig, TrackFitConfig,
};
pub use error::{ChannelFamily, Error, PcaError, Result};
pub use event::{CandidateSelection, ClusterStatus, Event, EventStatistics, PrincipalComponents};
pub use hit::Hit3d;
pub use pulse::{NegativeLobe, Pulse, PulseOrder, PulseSet};
pub use waveform::{RawEvent, Waveform};
