//! Concurrent cache-building pipeline.
//!
//! An orchestrator partitions the code universe into per-worker segments,
//! runs phases strictly in sequence, and funnels every fetched result
//! through a single cache-writer task.

pub mod orchestrator;
pub mod segment;
pub mod worker;
pub mod writer;

pub use orchestrator::CacheBuilder;
pub use segment::segments;
pub use worker::{run_worker, WorkerSpec};
pub use writer::run_writer;
