#![allow(non_camel_case_types, non_snake_case)]

//! Raw bindings to the subset of MPI used by the distributed FFT.
//! Handle values follow the MPICH ABI.

use libc::{c_char, c_int, c_void};

pub type MpiComm = c_int;
pub type MpiDatatype = c_int;

pub const MPI_SUCCESS: c_int = 0;

pub const MPI_ROOT: i32 = 0;

pub const MPI_COMM_WORLD: MpiComm = 0x44000000;

pub const MPI_DOUBLE_COMPLEX: MpiDatatype = 1275072546;

#[link(name = "mpich", kind = "dylib")]
extern "C" {
    pub fn MPI_Init(argc: *const c_int, argv: *const c_char) -> c_int;

    pub fn MPI_Initialized(flag: *mut c_int) -> c_int;

    pub fn MPI_Finalize() -> c_int;

    pub fn MPI_Comm_rank(comm: MpiComm, rank: *mut c_int) -> c_int;

    pub fn MPI_Comm_size(comm: MpiComm, size: *mut c_int) -> c_int;

    pub fn MPI_Barrier(comm: MpiComm) -> c_int;

    pub fn MPI_Alltoallv(
        sendbuf: *const c_void,
        sendcounts: *const c_int,
        sdispls: *const c_int,
        sendtype: MpiDatatype,
        recvbuf: *mut c_void,
        recvcounts: *const c_int,
        rdispls: *const c_int,
        recvtype: MpiDatatype,
        comm: MpiComm,
    ) -> c_int;
}

pub fn check(code: c_int) -> Result<(), c_int> {
    if code == MPI_SUCCESS {
        Ok(())
    } else {
        Err(code)
    }
}
