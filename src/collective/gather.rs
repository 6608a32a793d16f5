//! The gather operator inserted at parallel → serial boundaries.
//!
//! Forward: each bottom of shape `[d0, d1, ..]` becomes a top of shape
//! `[d0 * world_size, d1, ..]`, the concatenation of every rank's shard in
//! rank order. Backward: each top gradient (exactly the recorded forward top
//! shape) is scattered from rank 0 so that every rank gets back the slice
//! matching its own shard.

use super::{
    decode, encode_into, Blob, CollectiveError, CollectiveTransport, Element, Result,
};
use crate::graph::{OpKind, Operator};

use tracing::debug;

/// Root whose gradient is split during backward. The serial region computes
/// identical gradients on every rank, so any rank would do.
const SCATTER_ROOT: usize = 0;

#[derive(Debug, Clone)]
pub struct GatherOp {
    name: String,
    bottoms: Vec<String>,
    tops: Vec<String>,
    /// Top shapes of the most recent forward.
    top_shapes: Option<Vec<Vec<usize>>>,
    staging: Vec<u8>,
}

impl GatherOp {
    pub fn new(name: impl Into<String>, bottoms: Vec<String>, tops: Vec<String>) -> Result<Self> {
        let name = name.into();
        if bottoms.len() != tops.len() {
            return Err(CollectiveError::ArityMismatch {
                op: name,
                expected: bottoms.len(),
                actual: tops.len(),
            });
        }
        Ok(Self {
            name,
            bottoms,
            tops,
            top_shapes: None,
            staging: Vec::new(),
        })
    }

    pub fn from_operator(op: &Operator) -> Result<Self> {
        if op.kind != OpKind::Gather {
            return Err(CollectiveError::NotAGather {
                op: op.name.clone(),
                kind: op.kind.to_string(),
            });
        }
        Self::new(op.name.clone(), op.inputs.clone(), op.outputs.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bottoms(&self) -> &[String] {
        &self.bottoms
    }

    pub fn tops(&self) -> &[String] {
        &self.tops
    }

    /// Top shapes recorded by the last forward, if any.
    pub fn top_shapes(&self) -> Option<&[Vec<usize>]> {
        self.top_shapes.as_deref()
    }

    fn check_arity(&self, actual: usize) -> Result<()> {
        if actual != self.bottoms.len() {
            return Err(CollectiveError::ArityMismatch {
                op: self.name.clone(),
                expected: self.bottoms.len(),
                actual,
            });
        }
        Ok(())
    }

    fn gathered_shape(&self, idx: usize, shape: &[usize], world_size: usize) -> Result<Vec<usize>> {
        let Some((&d0, rest)) = shape.split_first() else {
            return Err(CollectiveError::EmptyShape {
                op: self.name.clone(),
                blob: self.bottoms[idx].clone(),
            });
        };
        let mut out = Vec::with_capacity(shape.len());
        out.push(d0 * world_size);
        out.extend_from_slice(rest);
        Ok(out)
    }

    pub fn forward<T: Element>(
        &mut self,
        transport: &dyn CollectiveTransport,
        bottoms: &[Blob<T>],
    ) -> Result<Vec<Blob<T>>> {
        self.check_arity(bottoms.len())?;
        let world_size = transport.world_size();

        // Validate every blob before the first collective is issued.
        let shapes = bottoms
            .iter()
            .enumerate()
            .map(|(i, b)| self.gathered_shape(i, b.shape(), world_size))
            .collect::<Result<Vec<_>>>()?;

        let mut tops = Vec::with_capacity(bottoms.len());
        for (bottom, shape) in bottoms.iter().zip(&shapes) {
            encode_into(bottom.data(), &mut self.staging);
            let bytes = transport.all_gather(T::TYPE, &self.staging)?;
            tops.push(Blob::new(decode(&bytes)?, shape.clone())?);
        }

        debug!(op = %self.name, rank = transport.rank(), shapes = ?shapes, "gather forward");
        self.top_shapes = Some(shapes);
        Ok(tops)
    }

    pub fn backward<T: Element>(
        &mut self,
        transport: &dyn CollectiveTransport,
        top_diffs: &[Blob<T>],
    ) -> Result<Vec<Blob<T>>> {
        let Some(top_shapes) = self.top_shapes.as_ref() else {
            return Err(CollectiveError::BackwardBeforeForward {
                op: self.name.clone(),
            });
        };
        self.check_arity(top_diffs.len())?;

        // A mismatch reaching the transport would desynchronize the group.
        for (i, (diff, expected)) in top_diffs.iter().zip(top_shapes).enumerate() {
            if diff.shape() != expected.as_slice() {
                return Err(CollectiveError::ShapeMismatch {
                    op: self.name.clone(),
                    blob: self.tops[i].clone(),
                    expected: expected.clone(),
                    actual: diff.shape().to_vec(),
                });
            }
        }

        let world_size = transport.world_size();
        let mut bottoms = Vec::with_capacity(top_diffs.len());
        for (diff, top_shape) in top_diffs.iter().zip(top_shapes) {
            let mut shape = top_shape.clone();
            shape[0] /= world_size;

            encode_into(diff.data(), &mut self.staging);
            let bytes = transport.scatter(T::TYPE, &self.staging, SCATTER_ROOT)?;
            bottoms.push(Blob::new(decode(&bytes)?, shape)?);
        }

        debug!(op = %self.name, rank = transport.rank(), "gather backward");
        Ok(bottoms)
    }
}
