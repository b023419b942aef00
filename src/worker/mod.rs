//! Background consumption of a stream.

mod drain;
mod thread;

pub use drain::{BatchReport, DrainWorker};
pub use thread::{DrainStats, DrainWorkerThread};
