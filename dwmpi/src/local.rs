use crate::{BlockDescriptor, CommError, Communicator};
use log::trace;
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};
use types::c64;

struct LocalHub {
    size: usize,
    // mailbox[dest * size + src]
    mailbox: Mutex<Vec<Option<Vec<c64>>>>,
    barrier: Barrier,
}

/// One rank of a group of ranks living in the same process.
///
/// The members returned by `LocalComm::group` are meant to be moved to one
/// thread each; collective calls block until every member has entered them.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    hub: Arc<LocalHub>,
}

impl LocalComm {
    pub fn group(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "a communicator needs at least one rank");

        let hub = Arc::new(LocalHub {
            size,
            mailbox: Mutex::new(vec![None; size * size]),
            barrier: Barrier::new(size),
        });

        (0..size)
            .map(|rank| LocalComm {
                rank,
                hub: Arc::clone(&hub),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.hub.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.hub.barrier.wait();

        Ok(())
    }

    fn alltoallv(
        &self,
        sendbuf: &[c64],
        send: &BlockDescriptor,
        recvbuf: &mut [c64],
        recv: &BlockDescriptor,
    ) -> Result<(), CommError> {
        let size = self.hub.size;
        let me = self.rank;

        // a rank with bad arguments still takes part in both barriers
        let checked = send
            .check("send", size, sendbuf.len())
            .and(recv.check("recv", size, recvbuf.len()));

        {
            let mut mailbox = self.hub.mailbox.lock();

            for dest in 0..size {
                let block = if checked.is_ok() {
                    sendbuf[send.range(dest)].to_vec()
                } else {
                    Vec::new()
                };

                mailbox[dest * size + me] = Some(block);
            }
        }

        self.hub.barrier.wait();

        let mut result = checked;

        {
            let mut mailbox = self.hub.mailbox.lock();

            for src in 0..size {
                let block = mailbox[me * size + src].take();

                if result.is_err() {
                    continue;
                }

                match block {
                    None => result = Err(CommError::MissingBlock { src }),
                    Some(block) => {
                        if block.len() != recv.counts[src] {
                            result = Err(CommError::CountMismatch {
                                src,
                                expected: recv.counts[src],
                                found: block.len(),
                            });
                        } else {
                            recvbuf[recv.range(src)].copy_from_slice(&block);
                        }
                    }
                }
            }
        }

        self.hub.barrier.wait();

        trace!(
            "rank {}: alltoallv sent {} and received {} elements",
            me,
            send.total(),
            recv.total()
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_alltoallv() {
        let nrank = 3;
        let comms = LocalComm::group(nrank);

        std::thread::scope(|s| {
            for comm in comms.into_iter() {
                s.spawn(move || {
                    let me = comm.rank();

                    // rank `me` sends (me + 1) values equal to 10*me + dest to rank `dest`
                    let send = BlockDescriptor::from_counts(vec![me + 1; nrank]);
                    let mut sbuf = vec![c64::new(0.0, 0.0); send.total()];
                    for dest in 0..nrank {
                        for v in sbuf[send.range(dest)].iter_mut() {
                            *v = c64::new((10 * me + dest) as f64, 0.0);
                        }
                    }

                    let recv = BlockDescriptor::from_counts((0..nrank).map(|src| src + 1).collect());
                    let mut rbuf = vec![c64::new(-1.0, 0.0); recv.total()];

                    comm.alltoallv(&sbuf, &send, &mut rbuf, &recv).unwrap();

                    for src in 0..nrank {
                        for v in rbuf[recv.range(src)].iter() {
                            assert_eq!(v.re, (10 * src + me) as f64);
                        }
                    }
                });
            }
        });
    }

    #[test]
    fn test_local_alltoallv_count_mismatch() {
        let comms = LocalComm::group(2);

        let results: Vec<Result<(), CommError>> = std::thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let send = BlockDescriptor::from_counts(vec![2, 2]);
                        let sbuf = vec![c64::new(1.0, 0.0); 4];
                        // rank 1 expects three values from rank 0
                        let recv = if comm.rank() == 1 {
                            BlockDescriptor::from_counts(vec![3, 2])
                        } else {
                            BlockDescriptor::from_counts(vec![2, 2])
                        };
                        let mut rbuf = vec![c64::new(0.0, 0.0); recv.total()];

                        comm.alltoallv(&sbuf, &send, &mut rbuf, &recv)
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results[0].is_ok());
        assert_eq!(
            results[1],
            Err(CommError::CountMismatch {
                src: 0,
                expected: 3,
                found: 2
            })
        );
    }
}
