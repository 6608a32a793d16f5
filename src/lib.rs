//! Insert gather operators at every point where a per-worker (parallel)
//! region of a net feeds a synchronized (serial) region, plus the gather
//! operator itself over a fixed-size worker group.

pub mod collective;
pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod probe;
pub mod rewrite;
pub mod spec;

pub type Result<T> = anyhow::Result<T>;
