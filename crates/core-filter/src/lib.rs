//! The filter pipeline: Source → Filter stage → Destination.
//!
//! A query becomes one [`Pipeline`]: a producer replaying a line buffer, a
//! [`FilterStage`] batching lines through the matcher (serially or across a
//! worker pool with a sequence-preserving merge), and a destination
//! `MemoryBuffer`. Everything shares one cancel token; a superseding query
//! cancels the previous pipeline and builds a new one.

mod pipeline;
mod pool;
mod stage;

pub use pipeline::Pipeline;
pub use pool::BufferPool;
pub use stage::{DEFAULT_BUF_SIZE, FilterStage};
