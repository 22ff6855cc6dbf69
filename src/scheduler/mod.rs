//! Deadline-aware batching scheduler: bounded per-class queues, periodic and
//! aperiodic producers, and the frame batcher.

pub mod batcher;
pub mod context;
pub mod producer;
pub mod queue;
pub mod random;
