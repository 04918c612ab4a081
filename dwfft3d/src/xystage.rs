//! Plane stage: 2-D transforms of the xy-planes of the local z-slab.
//!
//! Columns enter and leave the planes through the column position table.
//! A reduced partition stores one column of every `(x, y) / (-x, -y)` pair,
//! so the partner position receives the conjugate. Two real fields can share
//! one complex transform: the backward stage writes `a1 + i a2` and the
//! forward stage separates the fields with
//! `f1 = (a + conj b) / 2`, `f2 = -i (a - conj b) / 2`
//! where `b` is the value at the partner position.

use crate::workspace::Workers;
use crate::Direction;
use fftgrid::FFTGrid;
use log::debug;
use num_traits::Zero;
use rayon::prelude::*;
use types::{c64, I_C64};
use zcolumns::GvecPartition;

/// Position of every column inside an xy-plane and, for reduced partitions,
/// of its `(-x, -y)` partner.
#[derive(Debug, Clone)]
pub(crate) struct ColumnTable {
    partition_id: usize,
    reduced: bool,
    dc: Option<usize>,
    pos: Vec<usize>,
    pos_neg: Vec<usize>,
}

impl ColumnTable {
    pub fn new(grid: &FFTGrid, part: &GvecPartition) -> ColumnTable {
        let n1 = grid.get_n1();

        let xy = |x: i32, y: i32| grid.coord_by_freq(x, 0) + grid.coord_by_freq(y, 1) * n1;

        let pos = part.zcols().iter().map(|c| xy(c.x, c.y)).collect();

        let pos_neg = if part.reduced() {
            part.zcols().iter().map(|c| xy(-c.x, -c.y)).collect()
        } else {
            Vec::new()
        };

        ColumnTable {
            partition_id: part.id(),
            reduced: part.reduced(),
            dc: part.zcols().iter().position(|c| c.is_dc()),
            pos,
            pos_neg,
        }
    }

    pub fn partition_id(&self) -> usize {
        self.partition_id
    }

    pub fn reduced(&self) -> bool {
        self.reduced
    }

    pub fn dc(&self) -> Option<usize> {
        self.dc
    }

    pub fn num_zcol(&self) -> usize {
        self.pos.len()
    }

    pub fn pos(&self) -> &[usize] {
        &self.pos
    }

    pub fn pos_neg(&self) -> &[usize] {
        &self.pos_neg
    }

    pub fn positions(&self) -> ColumnPositions<'_> {
        ColumnPositions {
            reduced: self.reduced,
            dc: self.dc,
            pos: &self.pos,
            pos_neg: &self.pos_neg,
        }
    }
}

/// Borrowed view of a column position table, wherever it is stored.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnPositions<'a> {
    pub reduced: bool,
    pub dc: Option<usize>,
    pub pos: &'a [usize],
    pub pos_neg: &'a [usize],
}

/// Clears `plane` (local z index `iz`) and fills it with the column values;
/// with `aux2` the second real field goes to the imaginary part.
pub(crate) fn unpack_plane(
    plane: &mut [c64],
    iz: usize,
    local_z: usize,
    cols: ColumnPositions,
    aux1: &[c64],
    aux2: Option<&[c64]>,
) {
    plane.iter_mut().for_each(|v| v.set_zero());

    match aux2 {
        None => {
            for (icol, &p) in cols.pos.iter().enumerate() {
                let a = aux1[icol * local_z + iz];

                plane[p] = a;

                if cols.reduced && cols.dc != Some(icol) {
                    plane[cols.pos_neg[icol]] = a.conj();
                }
            }
        }

        Some(aux2) => {
            for (icol, &p) in cols.pos.iter().enumerate() {
                let a1 = aux1[icol * local_z + iz];
                let a2 = aux2[icol * local_z + iz];

                plane[p] = a1 + I_C64 * a2;

                if cols.dc != Some(icol) {
                    plane[cols.pos_neg[icol]] = a1.conj() + I_C64 * a2.conj();
                }
            }
        }
    }
}

/// Collects the column values of a transformed plane into one row of the
/// packed buffer (`packed[iz * num_zcol + icol]`).
pub(crate) fn pack_plane(plane: &[c64], cols: ColumnPositions, row1: &mut [c64], row2: Option<&mut [c64]>) {
    match row2 {
        None => {
            for (v, &p) in row1.iter_mut().zip(cols.pos.iter()) {
                *v = plane[p];
            }
        }

        Some(row2) => {
            for (icol, &p) in cols.pos.iter().enumerate() {
                let a = plane[p];
                let b = plane[cols.pos_neg[icol]];

                row1[icol] = 0.5 * (a + b.conj());
                row2[icol] = -0.5 * I_C64 * (a - b.conj());
            }
        }
    }
}

/// Host part of the plane stage over the planes `z0..` held in `planes`.
///
/// Backward fills `planes` from `aux`. Forward leaves `planes` untouched and
/// writes the packed rows of these planes into `packed`.
pub(crate) struct HostPlanes<'a> {
    pub workers: &'a Workers,
    pub grid: &'a FFTGrid,
    pub cols: ColumnPositions<'a>,
    pub local_z: usize,
    pub z0: usize,
}

impl<'a> HostPlanes<'a> {
    pub fn backward(&self, planes: &mut [c64], aux1: &[c64], aux2: Option<&[c64]>) {
        let nxy = self.grid.size_xy();

        debug!("xy backward on host: {} planes from z = {}", planes.len() / nxy, self.z0);

        self.workers.install(|| {
            planes.par_chunks_mut(nxy).enumerate().for_each(|(i, plane)| {
                unpack_plane(plane, self.z0 + i, self.local_z, self.cols, aux1, aux2);

                self.workers.with_workspace(|ws| ws.xy(Direction::Backward, plane));
            });
        });
    }

    pub fn forward(&self, planes: &[c64], packed1: &mut [c64], packed2: Option<&mut [c64]>) {
        let nxy = self.grid.size_xy();
        let ncol = self.cols.pos.len();

        debug!("xy forward on host: {} planes from z = {}", planes.len() / nxy, self.z0);

        if ncol == 0 {
            return;
        }

        let forward_one = |plane: &[c64], row1: &mut [c64], row2: Option<&mut [c64]>| {
            self.workers.with_workspace(|ws| {
                ws.plane.copy_from_slice(plane);
                ws.xy_own(Direction::Forward);

                pack_plane(&ws.plane, self.cols, row1, row2);
            });
        };

        self.workers.install(|| match packed2 {
            None => planes
                .par_chunks(nxy)
                .zip(packed1.par_chunks_mut(ncol))
                .for_each(|(plane, row1)| forward_one(plane, row1, None)),

            Some(packed2) => planes
                .par_chunks(nxy)
                .zip(packed1.par_chunks_mut(ncol))
                .zip(packed2.par_chunks_mut(ncol))
                .for_each(|((plane, row1), row2)| forward_one(plane, row1, Some(row2))),
        });
    }
}

/// Packed rows `packed[iz * num_zcol + icol]` to plane layout
/// `aux[icol * local_z + iz]`.
pub(crate) fn packed_to_aux(workers: &Workers, packed: &[c64], aux: &mut [c64], num_zcol: usize, local_z: usize) {
    if local_z == 0 {
        return;
    }

    workers.install(|| {
        aux.par_chunks_mut(local_z).enumerate().for_each(|(icol, col)| {
            for (iz, v) in col.iter_mut().enumerate() {
                *v = packed[iz * num_zcol + icol];
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_table_positions() {
        let grid = FFTGrid::new(4, 5, 4);
        let part = GvecPartition::from_millers(grid, &[[0, 0, 0], [1, -2, 0], [-1, 1, 1]], true, 1).unwrap();
        let table = ColumnTable::new(&grid, &part);

        assert_eq!(table.dc(), Some(0));
        assert_eq!(table.num_zcol(), 3);

        for (icol, col) in part.zcols().iter().enumerate() {
            let x = grid.coord_by_freq(col.x, 0);
            let y = grid.coord_by_freq(col.y, 1);
            assert_eq!(table.pos()[icol], x + y * 4);

            let x = grid.coord_by_freq(-col.x, 0);
            let y = grid.coord_by_freq(-col.y, 1);
            assert_eq!(table.pos_neg()[icol], x + y * 4);
        }
    }

    #[test]
    fn test_pair_pack_separates_fields() {
        let grid = FFTGrid::new(3, 3, 3);
        let part = GvecPartition::from_millers(grid, &[[0, 0, 0], [1, 0, 0], [1, 1, 0]], true, 1).unwrap();
        let table = ColumnTable::new(&grid, &part);

        let f1 = [c64::new(2.0, 0.0), c64::new(0.5, -1.0), c64::new(-0.25, 0.75)];
        let f2 = [c64::new(-1.0, 0.0), c64::new(1.5, 2.0), c64::new(0.0, -0.5)];

        let mut plane = vec![c64::new(0.0, 0.0); 9];
        unpack_plane(&mut plane, 0, 1, table.positions(), &f1, Some(&f2));

        let mut row1 = vec![c64::new(0.0, 0.0); 3];
        let mut row2 = vec![c64::new(0.0, 0.0); 3];
        pack_plane(&plane, table.positions(), &mut row1, Some(&mut row2));

        for icol in 0..3 {
            assert!((row1[icol] - f1[icol]).norm() < 1e-14);
            assert!((row2[icol] - f2[icol]).norm() < 1e-14);
        }
    }
}
