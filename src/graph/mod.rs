//! In-memory operator graph.
//!
//! The operator sequence is the topological order: an operator may only read
//! blobs that are external or written by an earlier operator. Producer/consumer
//! edges are implicit in blob names and resolved through `BlobVersions`.

pub mod kind;
pub mod versions;

pub use kind::{KindTable, OpKind, SyncBehavior};
pub use versions::{BlobRef, BlobVersions, Producer};

use crate::diagnostics;
use crate::Result;

use anyhow::bail;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operator {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OpKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    /// Opaque to the rewrite; carried through untouched.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl Operator {
    pub fn new(name: impl Into<String>, kind: OpKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn writes(&self, blob: &str) -> bool {
        self.outputs.iter().any(|o| o == blob)
    }
}

/// A validated operator sequence with every input resolved to its producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    name: Option<String>,
    external: Vec<String>,
    ops: Vec<Operator>,
    producers: Vec<Vec<Producer>>,
}

impl Graph {
    /// Validate the operator sequence:
    /// - operator names are non-empty and unique
    /// - blob names are non-empty
    /// - every input is external or written by an earlier operator
    pub fn new(name: Option<String>, external: Vec<String>, ops: Vec<Operator>) -> Result<Self> {
        let producers = resolve_producers(&external, &ops)?;
        Ok(Self {
            name,
            external,
            ops,
            producers,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn external_inputs(&self) -> &[String] {
        &self.external
    }

    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn position(&self, op_name: &str) -> Option<usize> {
        self.ops.iter().position(|op| op.name == op_name)
    }

    /// Producer of input `input` of the operator at `op`.
    pub fn producer_of(&self, op: usize, input: usize) -> Option<Producer> {
        self.producers.get(op)?.get(input).copied()
    }

    /// Splice `op` in at `position`, shifting later operators back.
    ///
    /// Rejected (graph unchanged) if the result is not a valid graph.
    pub fn insert(&mut self, position: usize, op: Operator) -> Result<()> {
        if position > self.ops.len() {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "cannot insert operator '{}' at position {} of a {}-operator graph",
                    op.name,
                    position,
                    self.ops.len()
                ))
            );
        }
        let mut ops = self.ops.clone();
        ops.insert(position, op);
        self.producers = resolve_producers(&self.external, &ops)?;
        self.ops = ops;
        Ok(())
    }

    /// Point input `input` of the operator at `op` to another blob name.
    pub fn rename_input(&mut self, op: usize, input: usize, blob: &str) -> Result<()> {
        let Some(target) = self.ops.get(op) else {
            bail!(
                "{}",
                diagnostics::error_message(format!("no operator at position {}", op))
            );
        };
        if input >= target.inputs.len() {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "operator '{}' has no input index {}",
                    target.name, input
                ))
            );
        }
        let mut ops = self.ops.clone();
        ops[op].inputs[input] = blob.to_string();
        self.producers = resolve_producers(&self.external, &ops)?;
        self.ops = ops;
        Ok(())
    }

    pub fn into_parts(self) -> (Option<String>, Vec<String>, Vec<Operator>) {
        (self.name, self.external, self.ops)
    }
}

fn resolve_producers(external: &[String], ops: &[Operator]) -> Result<Vec<Vec<Producer>>> {
    let mut names: HashMap<&str, usize> = HashMap::new();
    for (i, op) in ops.iter().enumerate() {
        if op.name.trim().is_empty() {
            bail!(
                "{}",
                diagnostics::error_message(format!("operator at position {} has an empty name", i))
            );
        }
        if let Some(prev) = names.insert(op.name.as_str(), i) {
            bail!(
                "{}",
                diagnostics::error_message(format!(
                    "duplicate operator name '{}' (positions {} and {})",
                    op.name, prev, i
                ))
            );
        }
    }

    let unique_external: BTreeSet<&str> = external.iter().map(String::as_str).collect();
    let mut versions = BlobVersions::with_external(unique_external);
    let mut producers = Vec::with_capacity(ops.len());

    for (i, op) in ops.iter().enumerate() {
        let mut resolved = Vec::with_capacity(op.inputs.len());
        for (k, blob) in op.inputs.iter().enumerate() {
            if blob.trim().is_empty() {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "operator '{}' input {} has an empty blob name",
                        op.name, k
                    ))
                );
            }
            match versions.resolve(blob) {
                Some(r) => resolved.push(r.producer),
                None => bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "operator '{}' input {} references blob '{}' that no earlier operator produces",
                        op.name, k, blob
                    ))
                ),
            }
        }
        for blob in &op.outputs {
            if blob.trim().is_empty() {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "operator '{}' has an output with an empty blob name",
                        op.name
                    ))
                );
            }
            versions.publish(blob, i);
        }
        producers.push(resolved);
    }

    Ok(producers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn op(name: &str, kind: &str, inputs: &[&str], outputs: &[&str]) -> Operator {
        Operator::new(name, OpKind::from_tag(kind))
            .with_inputs(inputs.iter().copied())
            .with_outputs(outputs.iter().copied())
    }

    fn chain() -> Graph {
        Graph::new(
            None,
            vec!["data".to_string()],
            vec![
                op("conv1", "Convolution", &["data"], &["c1"]),
                op("relu1", "ReLU", &["c1"], &["c1"]),
                op("fc", "InnerProduct", &["c1"], &["fc"]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn in_place_writer_is_the_producer() {
        let g = chain();
        assert_eq!(g.producer_of(0, 0), Some(Producer::External));
        assert_eq!(g.producer_of(1, 0), Some(Producer::Op(0)));
        assert_eq!(g.producer_of(2, 0), Some(Producer::Op(1)));
        assert_eq!(g.producer_of(2, 1), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Graph::new(
            None,
            vec![],
            vec![op("a", "Data", &[], &["x"]), op("a", "ReLU", &["x"], &["x"])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate operator name 'a'"));
    }

    #[test]
    fn forward_references_are_rejected() {
        let err = Graph::new(
            None,
            vec![],
            vec![op("a", "ReLU", &["y"], &["x"]), op("b", "Data", &[], &["y"])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("blob 'y'"));
        assert!(err.to_string().contains("'a'"));
    }

    #[test]
    fn insert_rewires_later_consumers() {
        let mut g = chain();
        g.insert(2, op("bn", "BatchNorm", &["c1"], &["c1"])).unwrap();
        assert_eq!(g.len(), 4);
        assert_eq!(g.position("fc"), Some(3));
        assert_eq!(g.producer_of(3, 0), Some(Producer::Op(2)));
    }

    #[test]
    fn invalid_insert_leaves_graph_untouched() {
        let mut g = chain();
        let before = g.clone();
        assert!(g.insert(0, op("early", "ReLU", &["c1"], &["z"])).is_err());
        assert!(g.insert(9, op("late", "ReLU", &["c1"], &["z"])).is_err());
        assert_eq!(g, before);
    }

    #[test]
    fn rename_input_checks_reachability() {
        let mut g = chain();
        g.rename_input(2, 0, "data").unwrap();
        assert_eq!(g.operators()[2].inputs, vec!["data".to_string()]);
        assert_eq!(g.producer_of(2, 0), Some(Producer::External));

        assert!(g.rename_input(2, 0, "nowhere").is_err());
        assert!(g.rename_input(2, 5, "data").is_err());
        assert!(g.rename_input(7, 0, "data").is_err());
    }
}
