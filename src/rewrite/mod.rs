//! Boundary classification and gather insertion.

pub mod classify;
pub mod insert;

pub use classify::{BoundaryClassifier, SerialSet};
pub use insert::{
    gather_op_name, gathered_name, insert_gathers, InsertedGather, Rewrite, RewriteReport,
    SynchronizationInserter,
};
