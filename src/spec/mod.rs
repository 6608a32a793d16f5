//! Spec layer: JSON schemas + validated in-memory structures.
//!
//! This module is intentionally separate from the rewrite and the collective
//! runtime. It owns:
//! - Net spec (ordered operator list → `Graph`)
//! - Serial spec (operator names/patterns → `SerialSet`)

pub mod net;
pub mod serial;

pub use net::{NetSpec, RawOperator};
pub use serial::SerialSpec;
