//! Distributed 3-D FFT between plane-wave coefficients and a real-space grid
//! split in z-slabs over the ranks of a communicator.
//!
//! Backward (coefficients to real space, unscaled):
//! column stage, exchange, plane stage. Forward runs the stages in reverse
//! and scales the coefficients by `1 / (n1 * n2 * n3)`.

mod accel;
mod backend;
mod config;
mod error;
mod exchange;
mod workspace;
mod xystage;
mod zstage;

pub use accel::{DeviceBuffer, Residency};
pub use config::{FFTConfig, DEFAULT_GPU_WORKLOAD};
pub use error::FFT3DError;

use backend::{CpuBackend, FFTBackend, HybridBackend};
use dwmpi::{Communicator, SplitIndex};
use fftgrid::FFTGrid;
use log::{debug, info};
use std::convert::TryFrom;
use std::fmt;
use types::{c64, ZERO_C64};
use xystage::ColumnTable;
use zcolumns::GvecPartition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// real space to coefficients, `e^{-iGr}`
    Forward,
    /// coefficients to real space, `e^{+iGr}`
    Backward,
}

impl Direction {
    pub fn sign(&self) -> i32 {
        match self {
            Direction::Forward => -1,
            Direction::Backward => 1,
        }
    }
}

impl TryFrom<i32> for Direction {
    type Error = FFT3DError;

    fn try_from(sign: i32) -> Result<Self, Self::Error> {
        match sign {
            -1 => Ok(Direction::Forward),
            1 => Ok(Direction::Backward),
            _ => Err(FFT3DError::UnknownDirection(sign)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingUnit {
    Cpu,
    Gpu,
}

impl fmt::Display for ProcessingUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcessingUnit::Cpu => write!(f, "cpu"),
            ProcessingUnit::Gpu => write!(f, "gpu"),
        }
    }
}

fn grow(buf: &mut Vec<c64>, len: usize) -> &mut [c64] {
    if buf.len() < len {
        buf.resize(len, ZERO_C64);
    }

    &mut buf[..len]
}

/// Stage buffers; sized by the largest call so far.
#[derive(Default)]
struct StageBuffers {
    /// plane layout, one per field
    aux: [Vec<c64>; 2],
    /// packed rows of the forward plane stage, one per field
    packed: [Vec<c64>; 2],
    /// column layout of the own columns
    zcol: Vec<c64>,
    /// send/receive scratch of the exchange
    exchange: Vec<c64>,
}

pub struct FFT3D {
    grid: FFTGrid,
    comm: Box<dyn Communicator>,
    split_z: SplitIndex,
    pu: ProcessingUnit,
    main: DeviceBuffer,
    buffers: StageBuffers,
    table: Option<ColumnTable>,
    backend: Box<dyn FFTBackend>,
}

impl FFT3D {
    /// Engine with the configuration from the environment and the given
    /// accelerator workload fraction.
    pub fn new<C: Communicator + 'static>(
        grid: FFTGrid,
        comm: C,
        pu: ProcessingUnit,
        gpu_workload: f64,
    ) -> Result<FFT3D, FFT3DError> {
        let config = FFTConfig::from_env().with_gpu_workload(gpu_workload);

        FFT3D::with_config(grid, comm, pu, config)
    }

    pub fn with_config<C: Communicator + 'static>(
        grid: FFTGrid,
        comm: C,
        pu: ProcessingUnit,
        config: FFTConfig,
    ) -> Result<FFT3D, FFT3DError> {
        let split_z = SplitIndex::new(grid.get_n3(), comm.size());
        let local_z = split_z.local_size(comm.rank());

        let cpu = CpuBackend::new(&grid, local_z, config.num_threads)?;

        let backend: Box<dyn FFTBackend> = match pu {
            ProcessingUnit::Cpu => Box::new(cpu),
            ProcessingUnit::Gpu => {
                let nbatch = config.num_device_planes(local_z);
                Box::new(HybridBackend::new(cpu, nbatch, comm.size(), config.device_memory))
            }
        };

        let fft = FFT3D {
            main: DeviceBuffer::new(grid.size_xy() * local_z),
            split_z,
            grid,
            comm: Box::new(comm),
            pu,
            buffers: StageBuffers::default(),
            table: None,
            backend,
        };

        if fft.comm.is_root() {
            info!("{}", fft);
        }

        Ok(fft)
    }

    /// Builds the column position table for `partition` and, on the
    /// accelerator, the device copies of the buffers.
    pub fn prepare(&mut self, partition: &GvecPartition) -> Result<(), FFT3DError> {
        if partition.nrank() != self.comm.size() || *partition.grid() != self.grid {
            return Err(FFT3DError::PartitionMismatch);
        }

        if let Some(table) = self.table.as_ref() {
            if table.partition_id() != partition.id() && self.backend.holds_device_memory() {
                return Err(FFT3DError::StillPrepared);
            }
        }

        let table = ColumnTable::new(&self.grid, partition);

        if let Err(e) = self.backend.prepare(&mut self.main, &table) {
            self.table = None;
            return Err(e);
        }

        debug!(
            "rank {}: prepared for {} columns, reduced = {}",
            self.comm.rank(),
            table.num_zcol(),
            table.reduced()
        );

        self.table = Some(table);

        Ok(())
    }

    /// Releases the device copies; a no-op when not prepared.
    pub fn dismiss(&mut self) {
        self.backend.dismiss(&mut self.main);
        self.table = None;
    }

    pub fn is_prepared(&self) -> bool {
        self.table.is_some()
    }

    fn check(&self, partition: &GvecPartition, data: &[c64]) -> Result<(), FFT3DError> {
        let table = self.table.as_ref().ok_or(FFT3DError::NotPrepared)?;

        if table.partition_id() != partition.id() {
            return Err(FFT3DError::PartitionMismatch);
        }

        let expected = partition.gvec_count(self.comm.rank());

        if data.len() != expected {
            return Err(FFT3DError::BufferSize {
                expected,
                found: data.len(),
            });
        }

        Ok(())
    }

    /// Transform of one field. Backward reads the coefficients of the own
    /// columns from `data` and leaves the real-space slab in the main
    /// buffer; forward transforms the main buffer and writes the
    /// coefficients to `data`.
    pub fn transform(
        &mut self,
        direction: Direction,
        partition: &GvecPartition,
        data: &mut [c64],
    ) -> Result<(), FFT3DError> {
        self.check(partition, data)?;

        match direction {
            Direction::Backward => {
                self.columns_to_planes(partition, data, 0)?;
                self.planes(direction, partition, false)
            }
            Direction::Forward => {
                self.planes(direction, partition, false)?;
                self.planes_to_columns(partition, data, 0)
            }
        }
    }

    /// Transform of two real fields through one complex transform; the
    /// partition must be reduced.
    pub fn transform_pair(
        &mut self,
        direction: Direction,
        partition: &GvecPartition,
        data1: &mut [c64],
        data2: &mut [c64],
    ) -> Result<(), FFT3DError> {
        self.check(partition, data1)?;
        self.check(partition, data2)?;

        if !partition.reduced() {
            return Err(FFT3DError::ReducedRequired);
        }

        match direction {
            Direction::Backward => {
                self.columns_to_planes(partition, data1, 0)?;
                self.columns_to_planes(partition, data2, 1)?;
                self.planes(direction, partition, true)
            }
            Direction::Forward => {
                self.planes(direction, partition, true)?;
                self.planes_to_columns(partition, data1, 0)?;
                self.planes_to_columns(partition, data2, 1)
            }
        }
    }

    /// Column stage and exchange of one field into `aux[slot]`.
    fn columns_to_planes(
        &mut self,
        partition: &GvecPartition,
        data: &mut [c64],
        slot: usize,
    ) -> Result<(), FFT3DError> {
        let me = self.comm.rank();
        let n3 = self.grid.get_n3();
        let cols = &partition.zcols()[partition.zcol_distr().range(me)];
        let aux_len = partition.num_zcol() * self.local_size_z();

        let StageBuffers {
            aux,
            zcol,
            exchange: scratch,
            ..
        } = &mut self.buffers;

        let aux = grow(&mut aux[slot], aux_len);

        if self.comm.size() == 1 {
            // one rank owns all columns over the full z range
            self.backend
                .transform_z(Direction::Backward, &self.grid, cols, partition.reduced(), data, aux);

            return Ok(());
        }

        let zcol = grow(zcol, cols.len() * n3);
        let send = grow(scratch, cols.len() * n3);

        self.backend
            .transform_z(Direction::Backward, &self.grid, cols, partition.reduced(), data, zcol);

        self.backend.exchange(
            Direction::Backward,
            self.comm.as_ref(),
            partition,
            &self.split_z,
            zcol,
            send,
            aux,
        )
    }

    /// Exchange and column stage of one field out of `aux[slot]`.
    fn planes_to_columns(
        &mut self,
        partition: &GvecPartition,
        data: &mut [c64],
        slot: usize,
    ) -> Result<(), FFT3DError> {
        let me = self.comm.rank();
        let n3 = self.grid.get_n3();
        let cols = &partition.zcols()[partition.zcol_distr().range(me)];
        let aux_len = partition.num_zcol() * self.local_size_z();

        let StageBuffers {
            aux,
            zcol,
            exchange: scratch,
            ..
        } = &mut self.buffers;

        let aux = grow(&mut aux[slot], aux_len);

        if self.comm.size() == 1 {
            self.backend
                .transform_z(Direction::Forward, &self.grid, cols, partition.reduced(), data, aux);

            return Ok(());
        }

        let zcol = grow(zcol, cols.len() * n3);
        let recv = grow(scratch, cols.len() * n3);

        self.backend.exchange(
            Direction::Forward,
            self.comm.as_ref(),
            partition,
            &self.split_z,
            zcol,
            recv,
            aux,
        )?;

        self.backend
            .transform_z(Direction::Forward, &self.grid, cols, partition.reduced(), data, zcol);

        Ok(())
    }

    fn planes(&mut self, direction: Direction, partition: &GvecPartition, pair: bool) -> Result<(), FFT3DError> {
        let table = self.table.as_ref().ok_or(FFT3DError::NotPrepared)?;

        let ncol = partition.num_zcol();
        let local_z = self.local_size_z();

        let StageBuffers { aux, packed, .. } = &mut self.buffers;
        let [aux1, aux2] = aux;
        let [packed1, packed2] = packed;

        let aux1 = grow(aux1, ncol * local_z);
        let packed1 = grow(packed1, ncol * local_z);

        if pair {
            let aux2 = grow(aux2, ncol * local_z);
            let packed2 = grow(packed2, ncol * local_z);

            self.backend
                .transform_xy_pair(direction, &mut self.main, table, [aux1, aux2], [packed1, packed2])
        } else {
            self.backend
                .transform_xy(direction, &mut self.main, table, aux1, packed1)
        }
    }

    /// Copies a real-space slab of `local_size()` values into the main buffer.
    pub fn input<T: Copy + Into<c64>>(&mut self, data: &[T]) -> Result<(), FFT3DError> {
        if data.len() != self.local_size() {
            return Err(FFT3DError::BufferSize {
                expected: self.local_size(),
                found: data.len(),
            });
        }

        for (v, &d) in self.main.host_mut().iter_mut().zip(data.iter()) {
            *v = d.into();
        }

        self.backend.sync_input(&mut self.main);

        Ok(())
    }

    /// Copies the main buffer into `out`.
    pub fn output(&mut self, out: &mut [c64]) -> Result<(), FFT3DError> {
        if out.len() != self.local_size() {
            return Err(FFT3DError::BufferSize {
                expected: self.local_size(),
                found: out.len(),
            });
        }

        self.backend.sync_output(&mut self.main);

        out.copy_from_slice(self.main.host());

        Ok(())
    }

    /// Real part of the main buffer.
    pub fn output_real(&mut self, out: &mut [f64]) -> Result<(), FFT3DError> {
        if out.len() != self.local_size() {
            return Err(FFT3DError::BufferSize {
                expected: self.local_size(),
                found: out.len(),
            });
        }

        self.backend.sync_output(&mut self.main);

        for (o, v) in out.iter_mut().zip(self.main.host().iter()) {
            *o = v.re;
        }

        Ok(())
    }

    /// Host side of the main buffer, `x + y * n1 + iz * n1 * n2` for the
    /// local z index `iz`, pulled from the device first if it is stale.
    pub fn buffer(&mut self) -> &[c64] {
        self.backend.sync_output(&mut self.main);

        self.main.host()
    }

    /// Host side of the main buffer for writing. The current content is
    /// pulled from the device first; the next transform pushes it back.
    pub fn buffer_mut(&mut self) -> &mut [c64] {
        self.backend.sync_output(&mut self.main);

        self.main.host_mut()
    }

    pub fn grid(&self) -> &FFTGrid {
        &self.grid
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    /// Total number of grid points.
    pub fn size(&self) -> usize {
        self.grid.get_ntot()
    }

    /// Number of grid points of the local z-slab.
    pub fn local_size(&self) -> usize {
        self.grid.size_xy() * self.local_size_z()
    }

    pub fn local_size_z(&self) -> usize {
        self.split_z.local_size(self.comm.rank())
    }

    pub fn offset_z(&self) -> usize {
        self.split_z.global_offset(self.comm.rank())
    }

    /// Local z-slab size and offset of every rank.
    pub fn split_z(&self) -> &SplitIndex {
        &self.split_z
    }

    pub fn parallel(&self) -> bool {
        self.comm.size() > 1
    }

    pub fn processing_unit(&self) -> ProcessingUnit {
        self.pu
    }

    pub fn hybrid(&self) -> bool {
        self.pu == ProcessingUnit::Gpu
    }

    pub fn gpu_only(&self) -> bool {
        self.backend.gpu_only()
    }

    pub fn num_device_planes(&self) -> usize {
        self.backend.num_device_planes()
    }

    pub fn num_threads(&self) -> usize {
        self.backend.num_threads()
    }

    /// Current length of the plane layout buffer of the first field.
    pub fn aux_size(&self) -> usize {
        self.buffers.aux[0].len()
    }
}

impl fmt::Display for FFT3D {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FFT3D: grid {}, {} rank(s), local z {} at {}, {} with {} thread(s)",
            self.grid,
            self.comm.size(),
            self.local_size_z(),
            self.offset_z(),
            self.pu,
            self.num_threads()
        )?;

        if self.hybrid() {
            write!(f, ", {} device plane(s)", self.num_device_planes())?;

            if self.gpu_only() {
                write!(f, " (accelerator only)")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Forward.sign(), -1);
        assert_eq!(Direction::Backward.sign(), 1);

        assert_eq!(Direction::try_from(1), Ok(Direction::Backward));
        assert_eq!(Direction::try_from(-1), Ok(Direction::Forward));
        assert_eq!(Direction::try_from(0), Err(FFT3DError::UnknownDirection(0)));
    }

    #[test]
    fn test_grow_never_shrinks() {
        let mut buf = Vec::new();

        assert_eq!(grow(&mut buf, 10).len(), 10);
        assert_eq!(grow(&mut buf, 4).len(), 4);
        assert_eq!(buf.len(), 10);
    }
}
