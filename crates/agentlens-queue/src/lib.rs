//! # AgentLens Queue
//!
//! The ingest queue and batch writer (spec §4.3/§4.4, C3/C4): events land in
//! `IngestQueue` as soon as they pass validation, and `BatchWriter` drains
//! it independently of the HTTP request that produced them, enriching each
//! event with model cost before hash-chaining and persisting it.

pub mod memory;
pub mod queue;
pub mod writer;

pub use memory::MemoryQueue;
pub use queue::{
    exponential_backoff, IngestQueue, QueueEntry, QueueError, DEFAULT_MAX_QUEUE_DEPTH,
    DEFAULT_MAX_RETRIES,
};
pub use writer::{BatchWriter, WriterStats};
