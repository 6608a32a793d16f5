//! Drive every gather of a rewritten graph through an in-process worker group.
//!
//! Each rank fills its shards with values derived from (rank, gather, blob,
//! element), runs forward then backward for each gather in graph order, and
//! checks that forward produced every rank's shard in rank order and that
//! backward handed back exactly its own shard.

use crate::collective::{Blob, CollectiveTransport, Element, ElementType, GatherOp, LocalTransport};
use crate::config::RunConfig;
use crate::diagnostics;
use crate::graph::{Graph, OpKind, Operator};
use crate::Result;

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use std::thread;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub world_size: usize,
    pub element_type: ElementType,
    pub shard_shape: Vec<usize>,
    pub gathers: usize,
    pub blobs: usize,
}

pub fn probe(graph: &Graph, cfg: &RunConfig, shard_shape: &[usize]) -> Result<ProbeReport> {
    cfg.validate()?;
    if shard_shape.is_empty() {
        bail!(
            "{}",
            diagnostics::error_message("shard shape needs at least one dimension")
        );
    }
    match cfg.element_type {
        ElementType::F32 => probe_typed::<f32>(graph, cfg, shard_shape),
        ElementType::F64 => probe_typed::<f64>(graph, cfg, shard_shape),
        ElementType::U32 => probe_typed::<u32>(graph, cfg, shard_shape),
    }
}

fn probe_typed<T: Element>(graph: &Graph, cfg: &RunConfig, shard_shape: &[usize]) -> Result<ProbeReport> {
    let gathers: Vec<Operator> = graph
        .operators()
        .iter()
        .filter(|op| op.kind == OpKind::Gather)
        .cloned()
        .collect();

    let group = LocalTransport::group(cfg.world_size, cfg.timeout_policy())?;
    let handles: Vec<_> = group
        .into_iter()
        .map(|transport| {
            let gathers = gathers.clone();
            let shape = shard_shape.to_vec();
            thread::spawn(move || run_worker::<T>(&transport, &gathers, &shape))
        })
        .collect();

    let mut blobs = 0;
    for (rank, handle) in handles.into_iter().enumerate() {
        let checked = handle
            .join()
            .map_err(|_| anyhow!(diagnostics::error_message(format!("rank {} panicked", rank))))?
            .with_context(|| diagnostics::error_message(format!("probe failed on rank {}", rank)))?;
        blobs = checked;
    }

    info!(
        world_size = cfg.world_size,
        gathers = gathers.len(),
        blobs,
        "probe round-trip passed"
    );

    Ok(ProbeReport {
        world_size: cfg.world_size,
        element_type: T::TYPE,
        shard_shape: shard_shape.to_vec(),
        gathers: gathers.len(),
        blobs,
    })
}

fn shard<T: Element>(rank: usize, gather: usize, blob: usize, shape: &[usize]) -> Result<Blob<T>> {
    let count: usize = shape.iter().product();
    // Small integers stay exact in every element type.
    let data = (0..count)
        .map(|i| T::from_u32(((rank * 4099 + gather * 257 + blob * 31 + i) % 65_536) as u32))
        .collect();
    Ok(Blob::new(data, shape.to_vec())?)
}

/// Returns the number of blobs checked on this rank.
fn run_worker<T: Element>(
    transport: &dyn CollectiveTransport,
    gathers: &[Operator],
    shape: &[usize],
) -> Result<usize> {
    let rank = transport.rank();
    let world_size = transport.world_size();
    let mut checked = 0;

    for (g, op) in gathers.iter().enumerate() {
        let mut gather = GatherOp::from_operator(op)?;
        let bottoms = (0..gather.bottoms().len())
            .map(|b| shard::<T>(rank, g, b, shape))
            .collect::<Result<Vec<_>>>()?;

        let tops = gather.forward(transport, &bottoms)?;
        for (b, top) in tops.iter().enumerate() {
            let mut expected = Vec::with_capacity(top.count());
            for r in 0..world_size {
                expected.extend_from_slice(shard::<T>(r, g, b, shape)?.data());
            }
            if top.data() != expected.as_slice() {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "{}: rank {} gathered unexpected data for '{}'",
                        gather.name(),
                        rank,
                        gather.tops()[b]
                    ))
                );
            }
        }

        let back = gather.backward(transport, &tops)?;
        for (b, (got, sent)) in back.iter().zip(&bottoms).enumerate() {
            if got != sent {
                bail!(
                    "{}",
                    diagnostics::error_message(format!(
                        "{}: rank {} scattered gradient for '{}' does not match its shard",
                        gather.name(),
                        rank,
                        gather.bottoms()[b]
                    ))
                );
            }
        }

        debug!(op = %gather.name(), rank, "probe gather ok");
        checked += bottoms.len();
    }

    Ok(checked)
}
