use super::{CollectiveError, CollectiveTransport, ElementType, Result};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::trace;

/// What a receive does when the peer has not sent yet.
///
/// Collectives block by nature; a deadline only turns a stalled group into
/// an error on the waiting ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    #[default]
    Block,
    After(Duration),
}

#[derive(Debug)]
struct Frame {
    dtype: ElementType,
    payload: Vec<u8>,
}

/// One rank of an in-process worker group.
///
/// Every ordered pair of ranks has its own FIFO channel, so back-to-back
/// collectives between the same two ranks can never be confused with each
/// other.
pub struct LocalTransport {
    rank: usize,
    world_size: usize,
    to_peer: Vec<Sender<Frame>>,
    from_peer: Vec<Receiver<Frame>>,
    timeout: TimeoutPolicy,
}

impl LocalTransport {
    /// Build a whole group; element `r` of the result is rank `r`.
    pub fn group(world_size: usize, timeout: TimeoutPolicy) -> Result<Vec<LocalTransport>> {
        if world_size == 0 {
            return Err(CollectiveError::EmptyGroup);
        }

        let mut tx_rows: Vec<Vec<Sender<Frame>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
        let mut rx_rows: Vec<Vec<Receiver<Frame>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();

        for src in 0..world_size {
            for dst in 0..world_size {
                let (tx, rx) = unbounded();
                tx_rows[src].push(tx);
                rx_rows[dst].push(rx);
            }
        }

        Ok(tx_rows
            .into_iter()
            .zip(rx_rows)
            .enumerate()
            .map(|(rank, (to_peer, from_peer))| LocalTransport {
                rank,
                world_size,
                to_peer,
                from_peer,
                timeout,
            })
            .collect())
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(CollectiveError::RootOutOfRange {
                root,
                world_size: self.world_size,
            });
        }
        Ok(())
    }

    fn send_to(&self, peer: usize, dtype: ElementType, payload: &[u8]) -> Result<()> {
        trace!(rank = self.rank, peer, bytes = payload.len(), "send");
        self.to_peer[peer]
            .send(Frame {
                dtype,
                payload: payload.to_vec(),
            })
            .map_err(|_| CollectiveError::PeerDisconnected { peer })
    }

    fn recv_from(&self, peer: usize, dtype: ElementType) -> Result<Vec<u8>> {
        let rx = &self.from_peer[peer];
        let frame = match self.timeout {
            TimeoutPolicy::Block => rx
                .recv()
                .map_err(|_| CollectiveError::PeerDisconnected { peer })?,
            TimeoutPolicy::After(after) => rx.recv_timeout(after).map_err(|e| match e {
                RecvTimeoutError::Timeout => CollectiveError::Timeout { peer, after },
                RecvTimeoutError::Disconnected => CollectiveError::PeerDisconnected { peer },
            })?,
        };
        if frame.dtype != dtype {
            return Err(CollectiveError::ElementTypeMismatch {
                expected: dtype,
                actual: frame.dtype,
            });
        }
        trace!(rank = self.rank, peer, bytes = frame.payload.len(), "recv");
        Ok(frame.payload)
    }
}

impl CollectiveTransport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_gather(&self, dtype: ElementType, send: &[u8]) -> Result<Vec<u8>> {
        for peer in (0..self.world_size).filter(|&p| p != self.rank) {
            self.send_to(peer, dtype, send)?;
        }

        // Every peer's frame is taken off its channel even after a failure, so
        // the next collective starts from empty channels.
        let mut out = Vec::with_capacity(send.len() * self.world_size);
        let mut first_err = None;
        for peer in 0..self.world_size {
            if peer == self.rank {
                out.extend_from_slice(send);
                continue;
            }
            let chunk = match self.recv_from(peer, dtype) {
                Ok(chunk) if chunk.len() == send.len() => chunk,
                Ok(chunk) => {
                    first_err.get_or_insert(CollectiveError::PayloadLength {
                        peer,
                        expected: send.len(),
                        actual: chunk.len(),
                    });
                    continue;
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                    continue;
                }
            };
            out.extend_from_slice(&chunk);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn scatter(&self, dtype: ElementType, send: &[u8], root: usize) -> Result<Vec<u8>> {
        self.check_root(root)?;

        if self.rank != root {
            return self.recv_from(root, dtype);
        }

        let unit = dtype.size() * self.world_size;
        if send.len() % unit != 0 {
            return Err(CollectiveError::Indivisible {
                len: send.len(),
                world_size: self.world_size,
                dtype,
            });
        }
        let chunk = send.len() / self.world_size;
        for peer in (0..self.world_size).filter(|&p| p != root) {
            self.send_to(peer, dtype, &send[peer * chunk..(peer + 1) * chunk])?;
        }
        Ok(send[root * chunk..(root + 1) * chunk].to_vec())
    }

    fn broadcast(&self, dtype: ElementType, buf: &mut Vec<u8>, root: usize) -> Result<()> {
        self.check_root(root)?;

        if self.rank == root {
            for peer in (0..self.world_size).filter(|&p| p != root) {
                self.send_to(peer, dtype, buf)?;
            }
        } else {
            *buf = self.recv_from(root, dtype)?;
        }
        Ok(())
    }
}
