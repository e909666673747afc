//! Request coalescing into rate-limited JSON-RPC batches.

pub mod coalescer;
pub mod token_bucket;

pub use coalescer::{
    BatchCoalescer, BatchConfig, BatchRequest, BatchRoute, BatcherStats, QueueBatchOptions,
    QueueOptions, RequestHandle,
};
pub use token_bucket::TokenBucket;
