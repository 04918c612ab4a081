use crate::{BlockDescriptor, CommError, Communicator};
use log::info;
use mpi_sys::*;
use std::{os::raw::*, ptr};
use types::c64;

pub fn init() -> Result<(), CommError> {
    let mut flag: c_int = 0;

    unsafe {
        check(MPI_Initialized(&mut flag)).map_err(CommError::Mpi)?;

        if flag == 0 {
            check(MPI_Init(ptr::null(), ptr::null())).map_err(CommError::Mpi)?;
        }
    }

    Ok(())
}

pub fn finalize() -> Result<(), CommError> {
    unsafe { check(MPI_Finalize()).map_err(CommError::Mpi) }
}

/// `MPI_COMM_WORLD`; `init` must have been called.
#[derive(Debug, Clone, Copy)]
pub struct MpiComm {
    comm: mpi_sys::MpiComm,
    rank: usize,
    size: usize,
}

impl MpiComm {
    pub fn world() -> Result<MpiComm, CommError> {
        let mut rank: c_int = 0;
        let mut size: c_int = 0;

        unsafe {
            check(MPI_Comm_rank(MPI_COMM_WORLD, &mut rank)).map_err(CommError::Mpi)?;
            check(MPI_Comm_size(MPI_COMM_WORLD, &mut size)).map_err(CommError::Mpi)?;
        }

        if rank == MPI_ROOT {
            info!("MPI_COMM_WORLD with {} ranks", size);
        }

        Ok(MpiComm {
            comm: MPI_COMM_WORLD,
            rank: rank as usize,
            size: size as usize,
        })
    }
}

fn as_c_int(v: &[usize]) -> Vec<c_int> {
    v.iter().map(|&x| x as c_int).collect()
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        unsafe { check(MPI_Barrier(self.comm)).map_err(CommError::Mpi) }
    }

    fn alltoallv(
        &self,
        sendbuf: &[c64],
        send: &BlockDescriptor,
        recvbuf: &mut [c64],
        recv: &BlockDescriptor,
    ) -> Result<(), CommError> {
        send.check("send", self.size, sendbuf.len())?;
        recv.check("recv", self.size, recvbuf.len())?;

        let scounts = as_c_int(&send.counts);
        let soffsets = as_c_int(&send.offsets);
        let rcounts = as_c_int(&recv.counts);
        let roffsets = as_c_int(&recv.offsets);

        unsafe {
            check(MPI_Alltoallv(
                sendbuf.as_ptr() as *const c_void,
                scounts.as_ptr(),
                soffsets.as_ptr(),
                MPI_DOUBLE_COMPLEX,
                recvbuf.as_mut_ptr() as *mut c_void,
                rcounts.as_ptr(),
                roffsets.as_ptr(),
                MPI_DOUBLE_COMPLEX,
                self.comm,
            ))
            .map_err(CommError::Mpi)
        }
    }
}
