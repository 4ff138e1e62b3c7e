//! Execution pipelines: the fixed-latency shift-register stage arrays
//! that sit behind a dispatch queue and in front of a writeback queue.
//!
//! A scalar functional unit ([`scalar::ScalarPipeline`]) is one lane.
//! A vector functional unit ([`vector::VectorPipeline`]) is a single
//! lane too, but streams a wide instruction's element groups through
//! it one slice per cycle rather than retiring the whole instruction
//! in one pass.

mod mem_port;
pub mod scalar;
pub mod vector;

pub use scalar::ScalarPipeline;
pub use vector::VectorPipeline;
