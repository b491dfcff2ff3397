//! Command implementations.

pub mod completions;
pub mod migrate;
pub mod sync;
pub mod version;
