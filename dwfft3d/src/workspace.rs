use crate::{Direction, FFT3DError};
use fftgrid::FFTGrid;
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use types::c64;

/// Batched 2-D transform of xy-planes stored with x fastest: row transforms
/// along x, transpose, row transforms along y, transpose back.
#[derive(Clone)]
pub(crate) struct Plan2D {
    n1: usize,
    n2: usize,
    fft_x: Arc<dyn Fft<f64>>,
    fft_y: Arc<dyn Fft<f64>>,
}

impl Plan2D {
    fn new(planner: &mut FftPlanner<f64>, n1: usize, n2: usize, dir: Direction) -> Plan2D {
        let (fft_x, fft_y) = match dir {
            Direction::Forward => (planner.plan_fft_forward(n1), planner.plan_fft_forward(n2)),
            Direction::Backward => (planner.plan_fft_inverse(n1), planner.plan_fft_inverse(n2)),
        };

        Plan2D { n1, n2, fft_x, fft_y }
    }

    fn scratch_len(&self) -> usize {
        self.fft_x
            .get_inplace_scratch_len()
            .max(self.fft_y.get_inplace_scratch_len())
    }

    /// `plane` holds any number of planes back to back.
    pub fn process(&self, plane: &mut [c64], tmp: &mut [c64], scratch: &mut [c64]) {
        let (n1, n2) = (self.n1, self.n2);

        for plane in plane.chunks_exact_mut(n1 * n2) {
            let tmp = &mut tmp[..n1 * n2];

            self.fft_x
                .process_with_scratch(plane, &mut scratch[..self.fft_x.get_inplace_scratch_len()]);

            for (iy, row) in plane.chunks_exact(n1).enumerate() {
                for (ix, v) in row.iter().enumerate() {
                    tmp[ix * n2 + iy] = *v;
                }
            }

            self.fft_y
                .process_with_scratch(tmp, &mut scratch[..self.fft_y.get_inplace_scratch_len()]);

            for (ix, col) in tmp.chunks_exact(n2).enumerate() {
                for (iy, v) in col.iter().enumerate() {
                    plane[iy * n1 + ix] = *v;
                }
            }
        }
    }
}

/// Plans for both directions of the z and the xy transforms.
#[derive(Clone)]
pub(crate) struct FFTPlans {
    z_fwd: Arc<dyn Fft<f64>>,
    z_bwd: Arc<dyn Fft<f64>>,
    xy_fwd: Plan2D,
    xy_bwd: Plan2D,
}

impl FFTPlans {
    pub fn new(grid: &FFTGrid) -> FFTPlans {
        let mut planner = FftPlanner::<f64>::new();

        let [n1, n2, n3] = grid.get_size();

        FFTPlans {
            z_fwd: planner.plan_fft_forward(n3),
            z_bwd: planner.plan_fft_inverse(n3),
            xy_fwd: Plan2D::new(&mut planner, n1, n2, Direction::Forward),
            xy_bwd: Plan2D::new(&mut planner, n1, n2, Direction::Backward),
        }
    }

    fn z(&self, dir: Direction) -> &Arc<dyn Fft<f64>> {
        match dir {
            Direction::Forward => &self.z_fwd,
            Direction::Backward => &self.z_bwd,
        }
    }

    fn xy(&self, dir: Direction) -> &Plan2D {
        match dir {
            Direction::Forward => &self.xy_fwd,
            Direction::Backward => &self.xy_bwd,
        }
    }

    fn scratch_len(&self) -> usize {
        [
            self.z_fwd.get_inplace_scratch_len(),
            self.z_bwd.get_inplace_scratch_len(),
            self.xy_fwd.scratch_len(),
            self.xy_bwd.scratch_len(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// Plans and scratch space private to one worker.
pub(crate) struct FFTWorkspace {
    plans: FFTPlans,
    scratch: Vec<c64>,
    tmp: Vec<c64>,
    pub plane: Vec<c64>,
}

impl FFTWorkspace {
    pub fn new(grid: &FFTGrid, plans: FFTPlans) -> FFTWorkspace {
        let nxy = grid.size_xy();
        let zero = c64::new(0.0, 0.0);

        FFTWorkspace {
            scratch: vec![zero; plans.scratch_len()],
            tmp: vec![zero; nxy],
            plane: vec![zero; nxy],
            plans,
        }
    }

    /// Unscaled 1-D transform of one full z-column.
    pub fn z(&mut self, dir: Direction, column: &mut [c64]) {
        let fft = self.plans.z(dir);

        fft.process_with_scratch(column, &mut self.scratch[..fft.get_inplace_scratch_len()]);
    }

    /// Unscaled 2-D transform of an external plane.
    pub fn xy(&mut self, dir: Direction, plane: &mut [c64]) {
        self.plans.xy(dir).process(plane, &mut self.tmp, &mut self.scratch);
    }

    /// Unscaled 2-D transform of `self.plane`.
    pub fn xy_own(&mut self, dir: Direction) {
        let FFTWorkspace {
            plans,
            scratch,
            tmp,
            plane,
        } = self;

        plans.xy(dir).process(plane, tmp, scratch);
    }
}

/// Worker pool with one workspace per worker thread.
pub(crate) struct Workers {
    pool: ThreadPool,
    workspaces: Vec<Mutex<FFTWorkspace>>,
}

impl Workers {
    pub fn new(grid: &FFTGrid, num_threads: Option<usize>) -> Result<Workers, FFT3DError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.unwrap_or(0))
            .thread_name(|i| format!("dwfft3d-{}", i))
            .build()
            .map_err(|e| FFT3DError::ThreadPool(e.to_string()))?;

        let plans = FFTPlans::new(grid);

        let workspaces = (0..pool.current_num_threads())
            .map(|_| Mutex::new(FFTWorkspace::new(grid, plans.clone())))
            .collect();

        Ok(Workers { pool, workspaces })
    }

    pub fn num_threads(&self) -> usize {
        self.workspaces.len()
    }

    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }

    /// Runs `f` with the workspace of the calling worker.
    pub fn with_workspace<R>(&self, f: impl FnOnce(&mut FFTWorkspace) -> R) -> R {
        let id = rayon::current_thread_index().unwrap_or(0) % self.workspaces.len();

        let mut ws = self.workspaces[id].lock();

        f(&mut ws)
    }
}
