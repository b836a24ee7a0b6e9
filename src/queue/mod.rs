//! Durable work queue
//!
//! A [`SegmentLog`] is a crash-safe FIFO of strings in a single file. The
//! [`RoundRobinQueue`] keeps one segment log per domain and serves them in
//! rounds so every domain with pending work gets one slot per round.

pub mod error;
pub mod format;
pub mod round_robin;
pub mod segment;

pub use error::{LogError, LogResult, QueueError, QueueResult};
pub use round_robin::{Dequeued, QueueMetrics, RoundRobinQueue, LOG_SUFFIX, ROUND_LOG_NAME};
pub use segment::SegmentLog;
