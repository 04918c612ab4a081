//! Redistribution between the column layout (own columns, all z) and the
//! plane layout (all columns, own z-slab).
//!
//! Plane layout is `aux[icol * local_z + iz]` over the global column order.
//! Since the columns of every rank are contiguous in that order, the block
//! received from rank `r` lands at `zcol_offset(r) * local_z` as it is.

use crate::FFT3DError;
use dwmpi::{BlockDescriptor, Communicator, SplitIndex};
use log::debug;
use types::c64;
use zcolumns::GvecPartition;

struct ExchangeLayout {
    /// blocks of my columns cut into the z-slab of each rank
    columns: BlockDescriptor,
    /// blocks of the columns of each rank in my z-slab
    planes: BlockDescriptor,
}

fn layout(comm: &dyn Communicator, part: &GvecPartition, split_z: &SplitIndex) -> ExchangeLayout {
    let me = comm.rank();
    let nrank = comm.size();

    let ncol = part.zcol_count(me);
    let local_z = split_z.local_size(me);

    let columns = (0..nrank).map(|r| split_z.local_size(r) * ncol).collect();
    let planes = (0..nrank).map(|r| part.zcol_count(r) * local_z).collect();

    ExchangeLayout {
        columns: BlockDescriptor::from_counts(columns),
        planes: BlockDescriptor::from_counts(planes),
    }
}

/// Column layout in `zbuf` to plane layout in `aux`; `send` is scratch of
/// the size of `zbuf`.
pub(crate) fn backward(
    comm: &dyn Communicator,
    part: &GvecPartition,
    split_z: &SplitIndex,
    zbuf: &[c64],
    send: &mut [c64],
    aux: &mut [c64],
) -> Result<(), FFT3DError> {
    let n3 = split_z.global_size();
    let ncol = part.zcol_count(comm.rank());
    let desc = layout(comm, part, split_z);

    for r in 0..comm.size() {
        let lz = split_z.local_size(r);
        let z0 = split_z.global_offset(r);
        let block = &mut send[desc.columns.range(r)];

        for icol in 0..ncol {
            block[icol * lz..(icol + 1) * lz].copy_from_slice(&zbuf[icol * n3 + z0..icol * n3 + z0 + lz]);
        }
    }

    comm.alltoallv(send, &desc.columns, aux, &desc.planes)?;

    debug!(
        "rank {}: exchange backward, sent {} received {}",
        comm.rank(),
        desc.columns.total(),
        desc.planes.total()
    );

    Ok(())
}

/// Plane layout in `aux` to column layout in `zbuf`; `recv` is scratch of
/// the size of `zbuf`.
pub(crate) fn forward(
    comm: &dyn Communicator,
    part: &GvecPartition,
    split_z: &SplitIndex,
    aux: &[c64],
    recv: &mut [c64],
    zbuf: &mut [c64],
) -> Result<(), FFT3DError> {
    let n3 = split_z.global_size();
    let ncol = part.zcol_count(comm.rank());
    let desc = layout(comm, part, split_z);

    comm.alltoallv(aux, &desc.planes, recv, &desc.columns)?;

    for r in 0..comm.size() {
        let lz = split_z.local_size(r);
        let z0 = split_z.global_offset(r);
        let block = &recv[desc.columns.range(r)];

        for icol in 0..ncol {
            zbuf[icol * n3 + z0..icol * n3 + z0 + lz].copy_from_slice(&block[icol * lz..(icol + 1) * lz]);
        }
    }

    debug!(
        "rank {}: exchange forward, sent {} received {}",
        comm.rank(),
        desc.planes.total(),
        desc.columns.total()
    );

    Ok(())
}
