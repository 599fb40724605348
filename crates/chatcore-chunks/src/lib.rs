//! Stream chunk taxonomy and the pure chunk-builder that folds chunks into
//! an in-progress message's parts.

pub mod builder;
pub mod chunk;

pub use builder::apply;
pub use chunk::StreamChunk;
