//! Net spec (net.json): a flat, ordered operator list.
//!
//! JSON shape:
//! {
//!   "name": "scnn",                   // optional
//!   "inputs": ["data", "label"],      // externally supplied blobs
//!   "operators": [
//!     {
//!       "name": "conv1",
//!       "type": "Convolution",
//!       "inputs": ["data"],
//!       "outputs": ["conv1"],
//!       "params": { "num_output": 64 } // optional, carried through untouched
//!     },
//!     ...
//!   ]
//! }
//!
//! Operator order is the topological order. We trim names, validate the
//! sequence into a `Graph`, and can write a graph back out in the same shape.

use crate::diagnostics;
use crate::graph::{Graph, OpKind, Operator};
use crate::Result;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,

    #[serde(default)]
    pub operators: Vec<RawOperator>,
}

/// Raw operator shape as it appears in net.json.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawOperator {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: OpKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl NetSpec {
    pub fn from_file(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| diagnostics::error_message(format!("read net file {}", path)))?;
        serde_json::from_str(&text)
            .with_context(|| diagnostics::error_message(format!("parse net file {}", path)))
    }

    /// Normalize names and validate the operator sequence into a `Graph`.
    pub fn validate_and_build(&self) -> Result<Graph> {
        if self.operators.is_empty() {
            bail!(
                "{}",
                diagnostics::error_message("net.json contained no operators")
            );
        }

        let external = normalize_names(&self.inputs);
        let ops = self
            .operators
            .iter()
            .map(|raw| Operator {
                name: raw.name.trim().to_string(),
                kind: raw.kind.clone(),
                inputs: normalize_names(&raw.inputs),
                outputs: normalize_names(&raw.outputs),
                params: raw.params.clone(),
            })
            .collect();

        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Graph::new(name, external, ops)
    }

    pub fn from_graph(graph: &Graph) -> Self {
        let (name, inputs, ops) = graph.clone().into_parts();
        let operators = ops
            .into_iter()
            .map(|op| RawOperator {
                name: op.name,
                kind: op.kind,
                inputs: op.inputs,
                outputs: op.outputs,
                params: op.params,
            })
            .collect();
        Self {
            name,
            inputs,
            operators,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn normalize_names(names: &[String]) -> Vec<String> {
    // Order matters (input index identity), so only trim.
    names.iter().map(|n| n.trim().to_string()).collect()
}
