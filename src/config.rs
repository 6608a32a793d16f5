//! Run configuration: worker group shape and transport policy.
//!
//! JSON shape (every field optional):
//! {
//!   "world_size": 4,
//!   "timeout_ms": 30000,     // absent => collectives block forever
//!   "element_type": "f32",   // f32 | f64 | u32
//!   "batch_size": 256        // global batch, split evenly across workers
//! }

use crate::collective::{ElementType, TimeoutPolicy};
use crate::diagnostics;
use crate::graph::{Graph, OpKind};
use crate::Result;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_world_size")]
    pub world_size: usize,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub element_type: ElementType,

    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn default_world_size() -> usize {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            world_size: default_world_size(),
            timeout_ms: None,
            element_type: ElementType::default(),
            batch_size: None,
        }
    }
}

/// Per-worker batch size of one `Data` operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchShard {
    pub op: String,
    pub global: usize,
    pub per_worker: usize,
}

impl RunConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| diagnostics::error_message(format!("read config file {}", path)))?;
        let cfg: RunConfig = serde_json::from_str(&text)
            .with_context(|| diagnostics::error_message(format!("parse config file {}", path)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            bail!(
                "{}",
                diagnostics::error_message("world_size must be at least 1")
            );
        }
        if self.timeout_ms == Some(0) {
            bail!(
                "{}",
                diagnostics::error_message("timeout_ms must be positive (omit it to block)")
            );
        }
        Ok(())
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        match self.timeout_ms {
            Some(ms) => TimeoutPolicy::After(Duration::from_millis(ms)),
            None => TimeoutPolicy::Block,
        }
    }

    /// `value / world_size`, or a fatal error naming `what` if it does not divide.
    pub fn shard(&self, what: &str, value: usize) -> Result<usize> {
        if value % self.world_size != 0 {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "{} ({}) should be divisible by the number of workers ({})",
                    what, value, self.world_size
                ))
            );
        }
        Ok(value / self.world_size)
    }

    /// Check the configured batch size and every `Data` operator's
    /// `params.batch_size` against the world size.
    pub fn shard_batches(&self, graph: &Graph) -> Result<Vec<BatchShard>> {
        let mut out = Vec::new();

        if let Some(global) = self.batch_size {
            out.push(BatchShard {
                op: "<config>".to_string(),
                global,
                per_worker: self.shard("batch_size", global)?,
            });
        }

        for op in graph.operators().iter().filter(|op| op.kind == OpKind::Data) {
            let Some(value) = op.params.get("batch_size") else {
                continue;
            };
            let Some(global) = value.as_u64() else {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "operator '{}' has a non-integer batch_size: {}",
                        op.name, value
                    ))
                );
            };
            let global = global as usize;
            let per_worker = self.shard(&format!("batch_size of '{}'", op.name), global)?;
            out.push(BatchShard {
                op: op.name.clone(),
                global,
                per_worker,
            });
        }

        Ok(out)
    }
}
