//! Collective communication across a fixed-size worker group.
//!
//! Every call here is a blocking group operation: all ranks must issue the
//! same calls in the same order, or the group deadlocks. Shape problems are
//! caught before a call reaches the transport so that a bad blob fails loudly
//! on each worker instead of hanging the group.
//!
//! * [`CollectiveTransport`]: rank, world size, all-gather, scatter, broadcast
//!   over byte payloads tagged with an [`ElementType`].
//! * [`LocalTransport`](local::LocalTransport): an in-process group over
//!   `crossbeam` channels.
//! * [`GatherOp`](gather::GatherOp): forward = all-gather along dim 0,
//!   backward = scatter of the gradient back to each rank's shard.

pub mod gather;
pub mod local;

pub use gather::GatherOp;
pub use local::{LocalTransport, TimeoutPolicy};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Element-type descriptor carried by every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    #[default]
    F32,
    F64,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Float,
    Unsigned,
}

impl ElementType {
    pub fn size(self) -> usize {
        match self {
            ElementType::F32 | ElementType::U32 => 4,
            ElementType::F64 => 8,
        }
    }

    pub fn kind(self) -> NumericKind {
        match self {
            ElementType::F32 | ElementType::F64 => NumericKind::Float,
            ElementType::U32 => NumericKind::Unsigned,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::U32 => "u32",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float" => Ok(ElementType::F32),
            "f64" | "double" => Ok(ElementType::F64),
            "u32" | "unsigned" => Ok(ElementType::U32),
            other => Err(format!("unknown element type {:?} (expected f32, f64 or u32)", other)),
        }
    }
}

/// Error type for collective operations.
#[derive(Error, Debug)]
pub enum CollectiveError {
    #[error("{op}: blob '{blob}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        op: String,
        blob: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{op}: blob '{blob}' has no leading dimension to gather along")]
    EmptyShape { op: String, blob: String },

    #[error("{op}: backward called before any forward")]
    BackwardBeforeForward { op: String },

    #[error("{op}: expected {expected} blobs, got {actual}")]
    ArityMismatch {
        op: String,
        expected: usize,
        actual: usize,
    },

    #[error("operator '{op}' of type '{kind}' is not a gather")]
    NotAGather { op: String, kind: String },

    #[error("data length {actual} does not match shape {shape:?}")]
    DataLength { shape: Vec<usize>, actual: usize },

    #[error("element type mismatch: expected {expected}, got {actual}")]
    ElementTypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },

    #[error("payload from rank {peer} is {actual} bytes, expected {expected}")]
    PayloadLength {
        peer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("payload of {len} bytes cannot be split into {world_size} {dtype} chunks")]
    Indivisible {
        len: usize,
        world_size: usize,
        dtype: ElementType,
    },

    #[error("payload of {len} bytes is not a whole number of {dtype} elements")]
    Misaligned { len: usize, dtype: ElementType },

    #[error("root rank {root} out of range for world size {world_size}")]
    RootOutOfRange { root: usize, world_size: usize },

    #[error("world size must be at least 1")]
    EmptyGroup,

    #[error("rank {peer} disconnected")]
    PeerDisconnected { peer: usize },

    #[error("timed out after {after:?} waiting for rank {peer}")]
    Timeout { peer: usize, after: Duration },
}

pub type Result<T> = std::result::Result<T, CollectiveError>;

/// Scalar types that can travel through a transport.
pub trait Element: Copy + Send + Sync + PartialEq + fmt::Debug + 'static {
    const TYPE: ElementType;

    fn write_le(self, out: &mut Vec<u8>);

    /// `bytes` is exactly `Self::TYPE.size()` long.
    fn read_le(bytes: &[u8]) -> Self;

    fn from_u32(v: u32) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $tag:expr, $n:expr) => {
        impl Element for $t {
            const TYPE: ElementType = $tag;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn from_u32(v: u32) -> Self {
                v as $t
            }
        }
    };
}

impl_element!(f32, ElementType::F32, 4);
impl_element!(f64, ElementType::F64, 8);
impl_element!(u32, ElementType::U32, 4);

/// Encode `data` into `out`, replacing its contents.
pub fn encode_into<T: Element>(data: &[T], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(data.len() * T::TYPE.size());
    for &v in data {
        v.write_le(out);
    }
}

pub fn decode<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = T::TYPE.size();
    if bytes.len() % size != 0 {
        return Err(CollectiveError::Misaligned {
            len: bytes.len(),
            dtype: T::TYPE,
        });
    }
    Ok(bytes.chunks_exact(size).map(T::read_le).collect())
}

/// A named blob's contents on one worker: row-major data plus its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> Blob<T> {
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(CollectiveError::DataLength {
                shape,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }
}

/// Fixed-size worker group.
pub trait CollectiveTransport: Send {
    fn rank(&self) -> usize;

    fn world_size(&self) -> usize;

    /// Every rank contributes `send` (same length on all ranks); every rank
    /// receives all contributions concatenated in rank order.
    fn all_gather(&self, dtype: ElementType, send: &[u8]) -> Result<Vec<u8>>;

    /// `root` splits `send` into `world_size` equal chunks and rank `r`
    /// receives chunk `r`. `send` is only read on the root.
    fn scatter(&self, dtype: ElementType, send: &[u8], root: usize) -> Result<Vec<u8>>;

    /// Replace `buf` on every rank with the root's `buf`.
    fn broadcast(&self, dtype: ElementType, buf: &mut Vec<u8>, root: usize) -> Result<()>;
}
