//! Operator kinds and the kind → behavior table.
//!
//! The type tag in net.json is a free-form string. Known tags map to a variant;
//! anything else is kept verbatim in `OpKind::Other` so it round-trips.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    Data,
    Convolution,
    Pooling,
    InnerProduct,
    ReLU,
    BatchNorm,
    /// The synchronization operator inserted by the rewrite.
    Gather,
    SoftmaxWithLoss,
    SigmoidCrossEntropyLoss,
    Accuracy,
    Other(String),
}

impl OpKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Data" => OpKind::Data,
            "Convolution" => OpKind::Convolution,
            "Pooling" => OpKind::Pooling,
            "InnerProduct" => OpKind::InnerProduct,
            "ReLU" => OpKind::ReLU,
            "BatchNorm" | "BN" => OpKind::BatchNorm,
            "MPIGather" | "Gather" => OpKind::Gather,
            "SoftmaxWithLoss" => OpKind::SoftmaxWithLoss,
            "SigmoidCrossEntropyLoss" => OpKind::SigmoidCrossEntropyLoss,
            "Accuracy" => OpKind::Accuracy,
            other => OpKind::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            OpKind::Data => "Data",
            OpKind::Convolution => "Convolution",
            OpKind::Pooling => "Pooling",
            OpKind::InnerProduct => "InnerProduct",
            OpKind::ReLU => "ReLU",
            OpKind::BatchNorm => "BatchNorm",
            OpKind::Gather => "MPIGather",
            OpKind::SoftmaxWithLoss => "SoftmaxWithLoss",
            OpKind::SigmoidCrossEntropyLoss => "SigmoidCrossEntropyLoss",
            OpKind::Accuracy => "Accuracy",
            OpKind::Other(tag) => tag,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl Serialize for OpKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for OpKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.trim().is_empty() {
            return Err(serde::de::Error::custom("operator type cannot be empty"));
        }
        Ok(OpKind::from_tag(tag.trim()))
    }
}

/// How an operator in the serial set is treated at a parallel → serial boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBehavior {
    /// Parallel-region inputs get a gather spliced in ahead of the operator.
    Bridge,
    /// Consumes already-synchronized data; never bridged.
    Exempt,
}

/// Explicit kind → behavior table, built once before the rewrite runs.
#[derive(Debug, Clone)]
pub struct KindTable {
    overrides: BTreeMap<OpKind, SyncBehavior>,
}

impl KindTable {
    /// Gather itself plus the terminal loss/metric reductions are exempt.
    pub fn standard() -> Self {
        let overrides = [
            OpKind::Gather,
            OpKind::SoftmaxWithLoss,
            OpKind::SigmoidCrossEntropyLoss,
            OpKind::Accuracy,
        ]
        .into_iter()
        .map(|k| (k, SyncBehavior::Exempt))
        .collect();
        Self { overrides }
    }

    pub fn behavior(&self, kind: &OpKind) -> SyncBehavior {
        self.overrides
            .get(kind)
            .copied()
            .unwrap_or(SyncBehavior::Bridge)
    }

    pub fn is_exempt(&self, kind: &OpKind) -> bool {
        self.behavior(kind) == SyncBehavior::Exempt
    }

    pub fn exempt_kinds(&self) -> impl Iterator<Item = &OpKind> {
        self.overrides
            .iter()
            .filter(|(_, b)| **b == SyncBehavior::Exempt)
            .map(|(k, _)| k)
    }
}

impl Default for KindTable {
    fn default() -> Self {
        Self::standard()
    }
}
