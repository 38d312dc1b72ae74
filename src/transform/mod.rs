//! Message body decoding and batch accumulation.

pub mod buffer;
pub mod decode;

pub use buffer::{BatchBuffer, BatchLimits, BufferFull};
