//! Batched asynchronous writes on a dedicated thread.

pub mod commands;
pub mod writer;

pub use commands::BatchCommand;
pub use writer::{BatchWriter, WriteStats};
