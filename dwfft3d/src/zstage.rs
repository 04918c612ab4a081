//! Column stage: 1-D transforms along z of the columns owned by this rank.
//!
//! The column buffer holds full columns back to back, `zbuf[icol * n3 + z]`
//! with `icol` counted from the first column of the rank.

use crate::workspace::Workers;
use crate::Direction;
use fftgrid::FFTGrid;
use itertools::multizip;
use log::debug;
use num_traits::Zero;
use rayon::prelude::*;
use types::c64;
use zcolumns::ZColumn;

/// Coefficients to full columns: scatter, Hermitian completion of the DC
/// column when `reduced`, inverse transform.
pub(crate) fn backward(
    workers: &Workers,
    grid: &FFTGrid,
    cols: &[ZColumn],
    reduced: bool,
    data: &[c64],
    zbuf: &mut [c64],
) {
    let n3 = grid.get_n3();

    debug!("z backward: {} columns of {}", cols.len(), n3);

    if cols.is_empty() {
        return;
    }

    let base = cols[0].offset;

    workers.install(|| {
        zbuf.par_chunks_mut(n3)
            .zip(cols.par_iter())
            .for_each(|(column, col)| {
                column.iter_mut().for_each(|v| v.set_zero());

                let values = &data[col.offset - base..col.offset - base + col.len()];

                for (&z, &v) in col.z.iter().zip(values.iter()) {
                    column[grid.coord_by_freq(z, 2)] = v;
                }

                if reduced && col.is_dc() {
                    for (&z, &v) in col.z.iter().zip(values.iter()) {
                        if z != 0 {
                            column[grid.coord_by_freq(-z, 2)] = v.conj();
                        }
                    }
                }

                workers.with_workspace(|ws| ws.z(Direction::Backward, column));
            });
    });
}

/// Full columns to coefficients: forward transform and gather of the stored
/// frequencies, scaled by `1 / (n1 * n2 * n3)`. `zbuf` is overwritten.
pub(crate) fn forward(
    workers: &Workers,
    grid: &FFTGrid,
    cols: &[ZColumn],
    zbuf: &mut [c64],
    data: &mut [c64],
) {
    let n3 = grid.get_n3();
    let scale = 1.0 / grid.get_ntotf64();

    debug!("z forward: {} columns of {}", cols.len(), n3);

    let mut rest: &mut [c64] = data;
    let mut outs = Vec::with_capacity(cols.len());

    for col in cols.iter() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(col.len());
        outs.push(head);
        rest = tail;
    }

    workers.install(|| {
        zbuf.par_chunks_mut(n3)
            .zip(cols.par_iter())
            .zip(outs.into_par_iter())
            .for_each(|((column, col), out)| {
                workers.with_workspace(|ws| ws.z(Direction::Forward, column));

                for (&z, v) in multizip((col.z.iter(), out.iter_mut())) {
                    *v = column[grid.coord_by_freq(z, 2)] * scale;
                }
            });
    });
}
