//! Plane-wave coefficients grouped in z-columns and distributed over ranks.
//!
//! A z-column collects all coefficients that share the `(x, y)` frequencies.
//! Columns are the unit of distribution of the parallel FFT: every rank
//! owns a contiguous range of columns and holds the coefficients of those
//! columns, column after column, in its local array.
//!
//! A reduced partition describes a real-valued field. It stores one member
//! of every `(x, y) / (-x, -y)` column pair and, for the `(0, 0)` column,
//! only the non-negative z frequencies; the rest follows from
//! `c(-G) = conj(c(G))`.

use dwmpi::BlockDescriptor;
use fftgrid::FFTGrid;
use itertools::Itertools;
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("partition must be distributed over at least one rank")]
    NoRanks,

    #[error("{nrank} ranks cannot share {n3} z-planes")]
    TooManyRanks { nrank: usize, n3: usize },

    #[error("frequency {0:?} is outside of the FFT grid")]
    OutOfGrid([i32; 3]),

    #[error("frequency {0:?} is listed twice")]
    Duplicate([i32; 3]),

    #[error("reduced set holds both column ({x}, {y}) and its conjugate")]
    ConjugatePairStored { x: i32, y: i32 },

    #[error("reduced set holds negative frequency {0} in the (0, 0) column")]
    NegativeDcFrequency(i32),

    #[error("reduced set holds {0:?} whose negation is not on the FFT grid")]
    NoConjugate([i32; 3]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZColumn {
    pub x: i32,
    pub y: i32,
    /// z frequencies, ascending
    pub z: Vec<i32>,
    /// position of the first coefficient in the global ordering
    pub offset: usize,
}

impl ZColumn {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }

    pub fn is_dc(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

static NEXT_PARTITION_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone)]
pub struct GvecPartition {
    id: usize,
    grid: FFTGrid,
    reduced: bool,
    zcols: Vec<ZColumn>,
    num_gvec: usize,
    zcol_distr: BlockDescriptor,
    gvec_distr: BlockDescriptor,
}

fn in_upper_half(g: [i32; 3]) -> bool {
    g[0] > 0 || (g[0] == 0 && g[1] > 0) || (g[0] == 0 && g[1] == 0 && g[2] >= 0)
}

fn on_grid(grid: &FFTGrid, g: [i32; 3]) -> bool {
    (0..3).all(|d| grid.contains_freq(g[d], d))
}

/// `|f| < n` along every dimension: the frequency has a buffer coordinate,
/// possibly shared with an alias `f - n`.
fn within_period(grid: &FFTGrid, g: [i32; 3]) -> bool {
    (0..3).all(|d| (g[d].unsigned_abs() as usize) < grid.size(d))
}

fn all_grid_freqs(grid: &FFTGrid) -> impl Iterator<Item = [i32; 3]> {
    let (x0, x1) = grid.freq_limits(0);
    let (y0, y1) = grid.freq_limits(1);
    let (z0, z1) = grid.freq_limits(2);

    (x0..=x1)
        .cartesian_product(y0..=y1)
        .cartesian_product(z0..=z1)
        .map(|((x, y), z)| [x, y, z])
}

impl GvecPartition {
    /// All frequencies of the grid; with `reduced` only the upper half of the
    /// frequencies whose negation is also on the grid.
    pub fn full(grid: FFTGrid, reduced: bool, nrank: usize) -> Result<GvecPartition, PartitionError> {
        let millers: Vec<[i32; 3]> = all_grid_freqs(&grid)
            .filter(|&g| !reduced || (in_upper_half(g) && on_grid(&grid, [-g[0], -g[1], -g[2]])))
            .collect();

        GvecPartition::from_millers(grid, &millers, reduced, nrank)
    }

    /// Frequencies inside the sphere `|G|^2 <= gmax^2` in integer units.
    pub fn sphere(
        grid: FFTGrid,
        gmax: f64,
        reduced: bool,
        nrank: usize,
    ) -> Result<GvecPartition, PartitionError> {
        let gmax2 = gmax * gmax;

        let millers: Vec<[i32; 3]> = all_grid_freqs(&grid)
            .filter(|g| {
                let g2 = (g[0] * g[0] + g[1] * g[1] + g[2] * g[2]) as f64;
                g2 <= gmax2
            })
            .filter(|&g| !reduced || (in_upper_half(g) && on_grid(&grid, [-g[0], -g[1], -g[2]])))
            .collect();

        GvecPartition::from_millers(grid, &millers, reduced, nrank)
    }

    /// Groups frequency triplets into z-columns and distributes the columns
    /// over `nrank` ranks.
    ///
    /// The `(0, 0)` column, if present, is always the first column and is
    /// owned by rank 0. Columns are assigned longest first to the rank with
    /// the fewest coefficients so far.
    pub fn from_millers(
        grid: FFTGrid,
        millers: &[[i32; 3]],
        reduced: bool,
        nrank: usize,
    ) -> Result<GvecPartition, PartitionError> {
        if nrank == 0 {
            return Err(PartitionError::NoRanks);
        }

        if nrank > grid.get_n3() {
            return Err(PartitionError::TooManyRanks {
                nrank,
                n3: grid.get_n3(),
            });
        }

        let mut columns: BTreeMap<(i32, i32), Vec<i32>> = BTreeMap::new();

        // reduced sets need the conjugate of every frequency on the grid
        let in_range = |g: [i32; 3]| if reduced { on_grid(&grid, g) } else { within_period(&grid, g) };

        for &g in millers.iter() {
            if !in_range(g) {
                return Err(PartitionError::OutOfGrid(g));
            }

            columns.entry((g[0], g[1])).or_default().push(g[2]);
        }

        for ((x, y), z) in columns.iter_mut() {
            z.sort_unstable();

            if let Some(&a) = z.iter().duplicates_by(|&&zi| grid.coord_by_freq(zi, 2)).next() {
                return Err(PartitionError::Duplicate([*x, *y, a]));
            }
        }

        // aliases such as (0, 0, 3) and (0, 0, -1) on n3 = 4 share a coordinate
        if let Some(&(x, y)) = columns
            .keys()
            .duplicates_by(|&&(x, y)| (grid.coord_by_freq(x, 0), grid.coord_by_freq(y, 1)))
            .next()
        {
            return Err(PartitionError::Duplicate([x, y, columns[&(x, y)][0]]));
        }

        if reduced {
            check_reduced(&grid, &columns)?;
        }

        // DC first, then longest first
        let order: Vec<(i32, i32)> = columns
            .iter()
            .sorted_by_key(|((x, y), z)| (!(*x == 0 && *y == 0), std::cmp::Reverse(z.len()), *x, *y))
            .map(|(&xy, _)| xy)
            .collect();

        let mut load = vec![0usize; nrank];
        let mut owned: Vec<Vec<(i32, i32)>> = vec![Vec::new(); nrank];

        for xy in order.into_iter() {
            let (irank, _) = load
                .iter()
                .enumerate()
                .min_by_key(|(r, l)| (**l, *r))
                .unwrap_or((0, &0));

            load[irank] += columns[&xy].len();
            owned[irank].push(xy);
        }

        let mut zcols = Vec::with_capacity(columns.len());
        let mut offset = 0;

        for xy in owned.iter().flatten() {
            let z = columns.remove(xy).unwrap_or_default();
            let len = z.len();

            zcols.push(ZColumn {
                x: xy.0,
                y: xy.1,
                z,
                offset,
            });

            offset += len;
        }

        let zcol_distr = BlockDescriptor::from_counts(owned.iter().map(|v| v.len()).collect());
        let gvec_distr = BlockDescriptor::from_counts(load);

        debug!(
            "gvec partition: {} columns, {} coefficients, {} ranks, reduced = {}",
            zcols.len(),
            offset,
            nrank,
            reduced
        );

        Ok(GvecPartition {
            id: NEXT_PARTITION_ID.fetch_add(1, Ordering::Relaxed),
            grid,
            reduced,
            zcols,
            num_gvec: offset,
            zcol_distr,
            gvec_distr,
        })
    }

    /// Identity of this partition; clones share it.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn grid(&self) -> &FFTGrid {
        &self.grid
    }

    pub fn reduced(&self) -> bool {
        self.reduced
    }

    pub fn nrank(&self) -> usize {
        self.zcol_distr.size()
    }

    pub fn num_zcol(&self) -> usize {
        self.zcols.len()
    }

    pub fn zcol(&self, icol: usize) -> &ZColumn {
        &self.zcols[icol]
    }

    pub fn zcols(&self) -> &[ZColumn] {
        &self.zcols
    }

    pub fn is_dc(&self, icol: usize) -> bool {
        self.zcols[icol].is_dc()
    }

    /// Total number of coefficients over all ranks.
    pub fn num_gvec(&self) -> usize {
        self.num_gvec
    }

    pub fn zcol_distr(&self) -> &BlockDescriptor {
        &self.zcol_distr
    }

    pub fn gvec_distr(&self) -> &BlockDescriptor {
        &self.gvec_distr
    }

    pub fn zcol_count(&self, rank: usize) -> usize {
        self.zcol_distr.counts[rank]
    }

    pub fn zcol_offset(&self, rank: usize) -> usize {
        self.zcol_distr.offsets[rank]
    }

    pub fn gvec_count(&self, rank: usize) -> usize {
        self.gvec_distr.counts[rank]
    }

    pub fn gvec_offset(&self, rank: usize) -> usize {
        self.gvec_distr.offsets[rank]
    }

    /// Offset of the first coefficient of column `icol` in the local array
    /// of the rank owning it.
    pub fn local_zcol_offset(&self, icol: usize, rank: usize) -> usize {
        self.zcols[icol].offset - self.gvec_distr.offsets[rank]
    }

    /// Frequencies of all coefficients in the global order.
    pub fn millers(&self) -> Vec<[i32; 3]> {
        self.zcols
            .iter()
            .flat_map(|col| col.z.iter().map(move |&z| [col.x, col.y, z]))
            .collect()
    }

    /// Frequencies of the coefficients held by `rank`, in local order.
    pub fn local_millers(&self, rank: usize) -> Vec<[i32; 3]> {
        self.zcols[self.zcol_distr.range(rank)]
            .iter()
            .flat_map(|col| col.z.iter().map(move |&z| [col.x, col.y, z]))
            .collect()
    }
}

fn check_reduced(grid: &FFTGrid, columns: &BTreeMap<(i32, i32), Vec<i32>>) -> Result<(), PartitionError> {
    for (&(x, y), z) in columns.iter() {
        if x == 0 && y == 0 {
            if let Some(&zneg) = z.iter().find(|&&z| z < 0) {
                return Err(PartitionError::NegativeDcFrequency(zneg));
            }
        } else if columns.contains_key(&(-x, -y)) {
            return Err(PartitionError::ConjugatePairStored { x, y });
        }

        for &zi in z.iter() {
            if !on_grid(grid, [-x, -y, -zi]) {
                return Err(PartitionError::NoConjugate([x, y, zi]));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_partition_covers_grid() {
        let grid = FFTGrid::new(4, 4, 4);
        let part = GvecPartition::full(grid, false, 1).unwrap();

        assert_eq!(part.num_zcol(), 16);
        assert_eq!(part.num_gvec(), 64);
        assert!(part.is_dc(0));
        assert_eq!(part.zcol(0).z, vec![-1, 0, 1, 2]);
    }

    #[test]
    fn test_columns_are_contiguous_per_rank() {
        let grid = FFTGrid::new(8, 8, 8);
        let part = GvecPartition::sphere(grid, 3.5, false, 3).unwrap();

        assert_eq!(part.nrank(), 3);
        assert_eq!(part.zcol_distr().total(), part.num_zcol());
        assert_eq!(part.gvec_distr().total(), part.num_gvec());

        for rank in 0..3 {
            let cols = &part.zcols()[part.zcol_distr().range(rank)];
            let ngv: usize = cols.iter().map(|c| c.len()).sum();
            assert_eq!(ngv, part.gvec_count(rank));

            if let Some(first) = cols.first() {
                assert_eq!(first.offset, part.gvec_offset(rank));
            }
        }

        // DC column stays on rank 0
        assert!(part.is_dc(0));
        assert!(part.zcol_count(0) > 0);
    }

    #[test]
    fn test_load_balance() {
        let grid = FFTGrid::new(12, 12, 12);
        let part = GvecPartition::sphere(grid, 5.0, false, 4).unwrap();

        let counts = &part.gvec_distr().counts;
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        let longest = part.zcols().iter().map(|c| c.len()).max().unwrap();

        assert!(max - min <= longest);
    }

    #[test]
    fn test_reduced_sphere_is_half() {
        let grid = FFTGrid::new(9, 9, 9);
        let full = GvecPartition::sphere(grid, 4.0, false, 1).unwrap();
        let half = GvecPartition::sphere(grid, 4.0, true, 1).unwrap();

        // every G except 0 has a distinct partner
        assert_eq!(half.num_gvec(), (full.num_gvec() + 1) / 2);

        assert!(half.reduced());
        assert!(half.zcol(0).z.iter().all(|&z| z >= 0));

        for col in half.zcols().iter().filter(|c| !c.is_dc()) {
            assert!(!half.zcols().iter().any(|c| c.x == -col.x && c.y == -col.y));
        }
    }

    #[test]
    fn test_millers_follow_offsets() {
        let grid = FFTGrid::new(6, 6, 6);
        let part = GvecPartition::sphere(grid, 2.5, true, 2).unwrap();
        let millers = part.millers();

        for (icol, col) in part.zcols().iter().enumerate() {
            for (j, &z) in col.z.iter().enumerate() {
                assert_eq!(millers[col.offset + j], [col.x, col.y, z]);
            }

            let rank = if icol < part.zcol_count(0) { 0 } else { 1 };
            let local = part.local_millers(rank);
            assert_eq!(local[part.local_zcol_offset(icol, rank)], [col.x, col.y, col.z[0]]);
        }
    }

    #[test]
    fn test_reduced_rejects_conjugate_pair() {
        let grid = FFTGrid::new(4, 4, 4);

        let err = GvecPartition::from_millers(grid, &[[1, 0, 0], [-1, 0, 1]], true, 1).unwrap_err();
        assert_eq!(err, PartitionError::ConjugatePairStored { x: -1, y: 0 });

        let err = GvecPartition::from_millers(grid, &[[0, 0, 0], [0, 0, -1]], true, 1).unwrap_err();
        assert_eq!(err, PartitionError::NegativeDcFrequency(-1));

        // -2 is not a frequency of a 4-point grid
        let err = GvecPartition::from_millers(grid, &[[2, 0, 0]], true, 1).unwrap_err();
        assert_eq!(err, PartitionError::NoConjugate([2, 0, 0]));
    }

    #[test]
    fn test_invalid_input() {
        let grid = FFTGrid::new(4, 4, 4);

        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, 4]], false, 1).unwrap_err(),
            PartitionError::OutOfGrid([0, 0, 4])
        );
        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, 3]], true, 1).unwrap_err(),
            PartitionError::OutOfGrid([0, 0, 3])
        );
        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, 1], [0, 0, 1]], false, 1).unwrap_err(),
            PartitionError::Duplicate([0, 0, 1])
        );
        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, 1]], false, 0).unwrap_err(),
            PartitionError::NoRanks
        );
        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, 1]], false, 5).unwrap_err(),
            PartitionError::TooManyRanks { nrank: 5, n3: 4 }
        );
    }

    #[test]
    fn test_aliased_frequencies() {
        let grid = FFTGrid::new(4, 4, 4);

        // 0..n3 instead of the signed range
        let part = GvecPartition::from_millers(grid, &[[0, 0, 0], [0, 0, 1], [0, 0, 2], [0, 0, 3]], false, 1).unwrap();
        assert_eq!(part.num_zcol(), 1);
        assert_eq!(part.zcol(0).z, vec![0, 1, 2, 3]);

        // 3 and -1 land on the same coordinate
        assert_eq!(
            GvecPartition::from_millers(grid, &[[0, 0, -1], [0, 0, 3]], false, 1).unwrap_err(),
            PartitionError::Duplicate([0, 0, 3])
        );
        assert_eq!(
            GvecPartition::from_millers(grid, &[[-1, 0, 0], [3, 0, 1]], false, 1).unwrap_err(),
            PartitionError::Duplicate([3, 0, 1])
        );
    }

    #[test]
    fn test_partition_identity() {
        let grid = FFTGrid::new(4, 4, 4);
        let a = GvecPartition::full(grid, false, 1).unwrap();
        let b = GvecPartition::full(grid, false, 1).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
