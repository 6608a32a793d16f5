//! Per-blob-name version counter.
//!
//! Operators may write a blob name that already exists (in-place overwrite).
//! Each write bumps that name's version; a consumer sees the highest version
//! published by operators before it.

use std::collections::HashMap;

/// Who wrote the version of a blob a consumer observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Producer {
    /// Supplied from outside the graph (net input, constant, feed).
    External,
    /// Operator at this position in the operator sequence.
    Op(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    pub producer: Producer,
    pub version: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BlobVersions {
    current: HashMap<String, BlobRef>,
}

impl BlobVersions {
    pub fn with_external<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let current = names
            .into_iter()
            .map(|n| {
                (
                    n.into(),
                    BlobRef {
                        producer: Producer::External,
                        version: 0,
                    },
                )
            })
            .collect();
        Self { current }
    }

    pub fn resolve(&self, name: &str) -> Option<BlobRef> {
        self.current.get(name).copied()
    }

    /// Record that the operator at `op_index` writes `name`.
    pub fn publish(&mut self, name: &str, op_index: usize) -> BlobRef {
        let version = self
            .current
            .get(name)
            .map(|r| r.version + 1)
            .unwrap_or(1);
        let blob = BlobRef {
            producer: Producer::Op(op_index),
            version,
        };
        self.current.insert(name.to_string(), blob);
        blob
    }
}
