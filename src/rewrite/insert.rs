//! Splice gather operators in at every parallel → serial boundary.
//!
//! One left-to-right pass over the original graph. For each operator that
//! requires synchronization, its inputs are grouped by producer; every
//! non-serial producer gets exactly one gather carrying the blobs it feeds,
//! nearest producer first, and the consumer is rewired to the gathered names.
//! Inputs with no non-serial writer before the consumer stay as they are.

use crate::diagnostics;
use crate::graph::{Graph, KindTable, OpKind, Operator, Producer};
use crate::rewrite::classify::{BoundaryClassifier, SerialSet};
use crate::Result;

use anyhow::Context;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

pub const GATHERED_PREFIX: &str = "gathered_";

pub fn gathered_name(blob: &str) -> String {
    format!("{}{}", GATHERED_PREFIX, blob)
}

pub fn gather_op_name(producer: &str, consumer: &str) -> String {
    format!("gather_{}_to_{}", producer, consumer)
}

/// `base`, or `base_2`, `base_3`, .. if taken. The chosen name is recorded.
fn claim_name(base: String, taken: &mut HashSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while taken.contains(&name) {
        name = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(name.clone());
    name
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsertedGather {
    pub name: String,
    pub producer: String,
    pub consumer: String,
    pub blobs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    /// In output order.
    pub inserted: Vec<InsertedGather>,
    /// Serial operators skipped because their kind is exempt.
    pub exempt: Vec<String>,
    /// Serial operators with no input coming from a parallel producer.
    pub already_synchronized: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub graph: Graph,
    pub report: RewriteReport,
}

#[derive(Debug, Clone, Default)]
pub struct SynchronizationInserter {
    kinds: KindTable,
}

/// Blobs one producer feeds into one consumer.
struct Connection {
    /// Distinct blob names, in the consumer's input order.
    blobs: Vec<String>,
    /// Input index -> position in `blobs`.
    slots: Vec<(usize, usize)>,
}

impl SynchronizationInserter {
    pub fn new(kinds: KindTable) -> Self {
        Self { kinds }
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn insert(&self, graph: &Graph, serial: &SerialSet) -> Result<Rewrite> {
        let classifier = BoundaryClassifier::new(serial, &self.kinds);
        let ops = graph.operators();
        let mut out: Vec<Operator> = Vec::with_capacity(ops.len());
        let mut report = RewriteReport::default();
        let mut taken: HashSet<String> = ops.iter().map(|op| op.name.clone()).collect();

        for (i, op_up) in ops.iter().enumerate() {
            if !classifier.requires_synchronization(op_up) {
                if classifier.is_serial(op_up) {
                    report.exempt.push(op_up.name.clone());
                }
                out.push(op_up.clone());
                continue;
            }

            let connections = connections_into(graph, i, &classifier);
            if connections.is_empty() {
                debug!(op = %op_up.name, "serial operator has no parallel inputs");
                report.already_synchronized.push(op_up.name.clone());
                out.push(op_up.clone());
                continue;
            }

            let mut rewired = op_up.clone();
            // Nearest producer first.
            for (j, conn) in connections.iter().rev() {
                let op_down = &ops[*j];
                let name = claim_name(gather_op_name(&op_down.name, &op_up.name), &mut taken);
                let gather = Operator::new(name, OpKind::Gather)
                    .with_inputs(conn.blobs.iter().cloned())
                    .with_outputs(conn.blobs.iter().map(|b| gathered_name(b)));

                for &(k, slot) in &conn.slots {
                    rewired.inputs[k] = gather.outputs[slot].clone();
                }

                debug!(
                    gather = %gather.name,
                    producer = %op_down.name,
                    consumer = %op_up.name,
                    blobs = ?conn.blobs,
                    "inserting gather"
                );
                report.inserted.push(InsertedGather {
                    name: gather.name.clone(),
                    producer: op_down.name.clone(),
                    consumer: op_up.name.clone(),
                    blobs: conn.blobs.clone(),
                });
                out.push(gather);
            }
            out.push(rewired);
        }

        let rewritten = Graph::new(
            graph.name().map(str::to_string),
            graph.external_inputs().to_vec(),
            out,
        )
        .with_context(|| diagnostics::error_message("rewritten graph failed validation"))?;

        info!(
            operators = rewritten.len(),
            gathers = report.inserted.len(),
            "inserted gathers at parallel -> serial boundaries"
        );

        Ok(Rewrite {
            graph: rewritten,
            report,
        })
    }
}

/// Convenience wrapper using the standard kind table.
pub fn insert_gathers(graph: &Graph, serial: &SerialSet) -> Result<Rewrite> {
    SynchronizationInserter::default().insert(graph, serial)
}

/// Group the inputs of the operator at `consumer` by their non-serial producer.
///
/// The producer of an input is the nearest earlier non-serial operator that
/// writes its name; serial writers in between are passed over. A name that
/// occurs at several input indices is carried once, and every one of those
/// indices is rewired, not only the first.
fn connections_into(
    graph: &Graph,
    consumer: usize,
    classifier: &BoundaryClassifier<'_>,
) -> BTreeMap<usize, Connection> {
    let ops = graph.operators();
    let mut connections: BTreeMap<usize, Connection> = BTreeMap::new();

    for (k, blob) in ops[consumer].inputs.iter().enumerate() {
        let Some(Producer::Op(current)) = graph.producer_of(consumer, k) else {
            continue;
        };
        let Some(j) = (0..=current)
            .rev()
            .find(|&j| !classifier.is_serial(&ops[j]) && ops[j].writes(blob))
        else {
            continue;
        };
        let conn = connections.entry(j).or_insert_with(|| Connection {
            blobs: Vec::new(),
            slots: Vec::new(),
        });
        let slot = match conn.blobs.iter().position(|b| b == blob) {
            Some(s) => s,
            None => {
                conn.blobs.push(blob.clone());
                conn.blobs.len() - 1
            }
        };
        conn.slots.push((k, slot));
    }

    connections
}
