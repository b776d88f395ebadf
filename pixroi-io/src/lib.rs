//! pixroi-io: Waveform container and result file I/O for pixroi.
//!
//! Raw events are stored in the `.pxw` container and read back through a
//! memory mapping via memmap2. Reconstruction results are written as CSV
//! and plain-text statistics.
//!

mod error;
pub mod format;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use format::ContainerHeader;
pub use reader::{MappedFileReader, WaveformFileReader};
pub use writer::{ResultsWriter, WaveformFileWriter};
