//! Process-level communication used by the distributed FFT.
//!
//! The FFT only needs the rank/size of its group, a barrier and one
//! variable-sized all-to-all per transform. `Communicator` captures exactly
//! that; `SerialComm` is the trivial one-rank group, `LocalComm` runs a
//! group of ranks as threads of one process and `MpiComm` (feature `mpi`)
//! talks to a real MPI library.

mod local;
mod split;

#[cfg(feature = "mpi")]
mod mpi;

pub use local::LocalComm;
pub use split::SplitIndex;

#[cfg(feature = "mpi")]
pub use crate::mpi::{finalize, init, MpiComm};

use thiserror::Error;
use types::c64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("{what} has {found} entries, communicator has {expected} ranks")]
    WrongRankCount {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{what} block for rank {rank} ends at {end}, buffer holds {len}")]
    BlockOutOfBounds {
        what: &'static str,
        rank: usize,
        end: usize,
        len: usize,
    },

    #[error("rank {src} sent {found} elements, {expected} expected")]
    CountMismatch {
        src: usize,
        expected: usize,
        found: usize,
    },

    #[error("no data from rank {src} in this exchange")]
    MissingBlock { src: usize },

    #[error("MPI call failed with code {0}")]
    Mpi(i32),
}

/// Counts and offsets of per-rank blocks inside one contiguous buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub counts: Vec<usize>,
    pub offsets: Vec<usize>,
}

impl BlockDescriptor {
    pub fn new(nrank: usize) -> BlockDescriptor {
        BlockDescriptor {
            counts: vec![0; nrank],
            offsets: vec![0; nrank],
        }
    }

    pub fn from_counts(counts: Vec<usize>) -> BlockDescriptor {
        let mut desc = BlockDescriptor {
            offsets: vec![0; counts.len()],
            counts,
        };

        desc.calc_offsets();

        desc
    }

    pub fn calc_offsets(&mut self) {
        let mut offset = 0;

        for (off, cnt) in self.offsets.iter_mut().zip(self.counts.iter()) {
            *off = offset;
            offset += *cnt;
        }
    }

    pub fn size(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn range(&self, rank: usize) -> std::ops::Range<usize> {
        self.offsets[rank]..self.offsets[rank] + self.counts[rank]
    }

    fn check(&self, what: &'static str, nrank: usize, len: usize) -> Result<(), CommError> {
        if self.counts.len() != nrank || self.offsets.len() != nrank {
            return Err(CommError::WrongRankCount {
                what,
                expected: nrank,
                found: self.counts.len().min(self.offsets.len()),
            });
        }

        for rank in 0..nrank {
            let end = self.offsets[rank] + self.counts[rank];

            if end > len {
                return Err(CommError::BlockOutOfBounds {
                    what,
                    rank,
                    end,
                    len,
                });
            }
        }

        Ok(())
    }
}

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn barrier(&self) -> Result<(), CommError>;

    /// Every rank sends `sendbuf[send.range(r)]` to rank `r` and receives the
    /// block of rank `r` into `recvbuf[recv.range(r)]`.
    fn alltoallv(
        &self,
        sendbuf: &[c64],
        send: &BlockDescriptor,
        recvbuf: &mut [c64],
        recv: &BlockDescriptor,
    ) -> Result<(), CommError>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

/// Group made of the calling process only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), CommError> {
        Ok(())
    }

    fn alltoallv(
        &self,
        sendbuf: &[c64],
        send: &BlockDescriptor,
        recvbuf: &mut [c64],
        recv: &BlockDescriptor,
    ) -> Result<(), CommError> {
        send.check("send", 1, sendbuf.len())?;
        recv.check("recv", 1, recvbuf.len())?;

        if send.counts[0] != recv.counts[0] {
            return Err(CommError::CountMismatch {
                src: 0,
                expected: recv.counts[0],
                found: send.counts[0],
            });
        }

        recvbuf[recv.range(0)].copy_from_slice(&sendbuf[send.range(0)]);

        Ok(())
    }
}
