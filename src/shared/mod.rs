//! State shared between the capture, worker and display threads
//!
//! Everything here is written by one thread and read by others without
//! blocking the writer for longer than a pointer swap.

pub mod state;

pub use state::{PipelineStats, ResultSlot, StatsSnapshot};
