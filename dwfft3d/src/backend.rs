//! Execution backends of the transform stages.
//!
//! `CpuBackend` runs every stage on the worker pool. `HybridBackend` splits
//! the plane stage: planes `[0, nbatch)` go to the accelerator on stream 0
//! while the host workers take `[nbatch, local_z)`; stream 1 moves the host
//! share of the main buffer between host and device.

use crate::accel::{Accelerator, DeviceBuffer, Residency};
use crate::workspace::Workers;
use crate::xystage::{packed_to_aux, ColumnTable, HostPlanes};
use crate::{exchange, zstage, Direction, FFT3DError, ProcessingUnit};
use dwmpi::{Communicator, SplitIndex};
use fftgrid::FFTGrid;
use log::{debug, info, warn};
use std::panic::resume_unwind;
use std::thread;
use types::c64;
use zcolumns::{GvecPartition, ZColumn};

pub(crate) trait FFTBackend: Send {
    fn processing_unit(&self) -> ProcessingUnit;

    fn num_threads(&self) -> usize;

    /// z-planes of the local slab processed on the accelerator.
    fn num_device_planes(&self) -> usize {
        0
    }

    fn gpu_only(&self) -> bool {
        false
    }

    fn holds_device_memory(&self) -> bool {
        false
    }

    fn prepare(&mut self, _main: &mut DeviceBuffer, _table: &ColumnTable) -> Result<(), FFT3DError> {
        Ok(())
    }

    fn dismiss(&mut self, _main: &mut DeviceBuffer) {}

    /// Called after the host side of `main` was written by the caller.
    fn sync_input(&mut self, _main: &mut DeviceBuffer) {}

    /// Called before the host side of `main` is read by the caller.
    fn sync_output(&mut self, _main: &mut DeviceBuffer) {}

    /// Column stage over the columns `cols` owned by this rank. Backward
    /// reads `data` and fills `zbuf`; forward reads `zbuf` and fills `data`.
    fn transform_z(
        &self,
        dir: Direction,
        grid: &FFTGrid,
        cols: &[ZColumn],
        reduced: bool,
        data: &mut [c64],
        zbuf: &mut [c64],
    );

    /// Exchange stage between the column layout in `zbuf` and the plane
    /// layout in `aux`; `scratch` has the size of `zbuf`.
    #[allow(clippy::too_many_arguments)]
    fn exchange(
        &self,
        dir: Direction,
        comm: &dyn Communicator,
        part: &GvecPartition,
        split_z: &SplitIndex,
        zbuf: &mut [c64],
        scratch: &mut [c64],
        aux: &mut [c64],
    ) -> Result<(), FFT3DError> {
        match dir {
            Direction::Backward => exchange::backward(comm, part, split_z, zbuf, scratch, aux),
            Direction::Forward => exchange::forward(comm, part, split_z, aux, scratch, zbuf),
        }
    }

    /// Plane stage of one field. Backward reads `aux` and fills `main`;
    /// forward reads `main` and fills `aux`, using `packed` as scratch.
    fn transform_xy(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: &mut [c64],
        packed: &mut [c64],
    ) -> Result<(), FFT3DError>;

    /// Plane stage of two real fields packed in one complex transform.
    fn transform_xy_pair(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: [&mut [c64]; 2],
        packed: [&mut [c64]; 2],
    ) -> Result<(), FFT3DError>;
}

pub(crate) struct CpuBackend {
    grid: FFTGrid,
    local_z: usize,
    workers: Workers,
}

impl CpuBackend {
    pub fn new(grid: &FFTGrid, local_z: usize, num_threads: Option<usize>) -> Result<CpuBackend, FFT3DError> {
        let workers = Workers::new(grid, num_threads)?;

        debug!("cpu backend with {} workers", workers.num_threads());

        Ok(CpuBackend {
            grid: *grid,
            local_z,
            workers,
        })
    }

    fn host_planes<'a>(&'a self, table: &'a ColumnTable, z0: usize) -> HostPlanes<'a> {
        HostPlanes {
            workers: &self.workers,
            grid: &self.grid,
            cols: table.positions(),
            local_z: self.local_z,
            z0,
        }
    }

    fn unpack_aux(&self, ncol: usize, packed: &[c64], aux: &mut [c64]) {
        packed_to_aux(&self.workers, packed, aux, ncol, self.local_z);
    }

    #[allow(clippy::too_many_arguments)]
    fn planes(
        &self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux1: &mut [c64],
        mut aux2: Option<&mut [c64]>,
        packed1: &mut [c64],
        mut packed2: Option<&mut [c64]>,
    ) {
        let host = self.host_planes(table, 0);

        match dir {
            Direction::Backward => host.backward(main.host_mut(), aux1, aux2.as_deref()),

            Direction::Forward => {
                host.forward(main.host(), packed1, packed2.as_deref_mut());

                self.unpack_aux(table.num_zcol(), packed1, aux1);

                if let (Some(packed2), Some(aux2)) = (packed2, aux2.as_deref_mut()) {
                    self.unpack_aux(table.num_zcol(), packed2, aux2);
                }
            }
        }
    }
}

impl FFTBackend for CpuBackend {
    fn processing_unit(&self) -> ProcessingUnit {
        ProcessingUnit::Cpu
    }

    fn num_threads(&self) -> usize {
        self.workers.num_threads()
    }

    fn transform_z(
        &self,
        dir: Direction,
        grid: &FFTGrid,
        cols: &[ZColumn],
        reduced: bool,
        data: &mut [c64],
        zbuf: &mut [c64],
    ) {
        match dir {
            Direction::Backward => zstage::backward(&self.workers, grid, cols, reduced, data, zbuf),
            Direction::Forward => zstage::forward(&self.workers, grid, cols, zbuf, data),
        }
    }

    fn transform_xy(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: &mut [c64],
        packed: &mut [c64],
    ) -> Result<(), FFT3DError> {
        self.planes(dir, main, table, aux, None, packed, None);

        Ok(())
    }

    fn transform_xy_pair(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: [&mut [c64]; 2],
        packed: [&mut [c64]; 2],
    ) -> Result<(), FFT3DError> {
        let [aux1, aux2] = aux;
        let [packed1, packed2] = packed;

        self.planes(dir, main, table, aux1, Some(aux2), packed1, Some(packed2));

        Ok(())
    }
}

pub(crate) struct HybridBackend {
    cpu: CpuBackend,
    accel: Accelerator,
    nbatch: usize,
    gpu_only: bool,
}

impl HybridBackend {
    /// `nbatch` of the `local_z` planes of `cpu` go to the accelerator.
    pub fn new(cpu: CpuBackend, nbatch: usize, nrank: usize, device_memory: Option<usize>) -> HybridBackend {
        let local_z = cpu.local_z;
        let gpu_only = nrank == 1 && nbatch == local_z;

        if nbatch == 0 {
            warn!("no z-plane of {} goes to the accelerator, raise the gpu workload", local_z);
        }

        info!(
            "hybrid backend: {} of {} planes on the accelerator{}",
            nbatch,
            local_z,
            if gpu_only { " (accelerator only)" } else { "" }
        );

        let accel = Accelerator::new(&cpu.grid, device_memory);

        HybridBackend {
            cpu,
            accel,
            nbatch,
            gpu_only,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn planes(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux1: &mut [c64],
        mut aux2: Option<&mut [c64]>,
        packed1: &mut [c64],
        mut packed2: Option<&mut [c64]>,
    ) -> Result<(), FFT3DError> {
        let nxy = self.cpu.grid.size_xy();
        let local_z = self.cpu.local_z;
        let nbatch = self.nbatch;
        let gpu_only = self.gpu_only;
        let ncol = table.num_zcol();

        let host_planes = self.cpu.host_planes(table, nbatch);
        let accel = &mut self.accel;

        let DeviceBuffer {
            host,
            device,
            residency,
        } = main;

        let device = device.as_mut().ok_or(FFT3DError::NotPrepared)?;

        let (d_lo, d_hi) = device.split_at_mut(nbatch * nxy);

        match dir {
            Direction::Backward => {
                // the device part of the host buffer stays stale
                let (_, h_hi) = host.split_at_mut(nbatch * nxy);
                let aux1 = &*aux1;
                let aux2 = aux2.as_deref();

                thread::scope(|s| {
                    let stream0 = s.spawn(move || accel.backward(d_lo, local_z, aux1, aux2));

                    host_planes.backward(h_hi, aux1, aux2);

                    if !gpu_only {
                        let h_hi = &*h_hi;
                        s.spawn(move || d_hi.copy_from_slice(h_hi));
                    }

                    stream0.join().unwrap_or_else(|e| resume_unwind(e))
                })?;

                *residency = Residency::Device;
            }

            Direction::Forward => {
                let (h_lo, h_hi) = host.split_at_mut(nbatch * nxy);
                let upload_device_part = *residency == Residency::Host;
                let download_host_part = *residency == Residency::Device;

                let (p1_lo, p1_hi) = packed1.split_at_mut(nbatch * ncol);
                let (p2_lo, p2_hi) = match packed2.as_deref_mut() {
                    Some(p) => {
                        let (lo, hi) = p.split_at_mut(nbatch * ncol);
                        (Some(lo), Some(hi))
                    }
                    None => (None, None),
                };

                thread::scope(|s| {
                    let h_lo = &*h_lo;
                    let stream0 = s.spawn(move || {
                        if upload_device_part {
                            d_lo.copy_from_slice(h_lo);
                        }

                        accel.forward(d_lo, p1_lo, p2_lo)
                    });

                    let d_hi = &*d_hi;
                    let stream1 = s.spawn(move || {
                        if download_host_part {
                            h_hi.copy_from_slice(d_hi);
                        }

                        h_hi
                    });

                    let h_hi = stream1.join().unwrap_or_else(|e| resume_unwind(e));

                    host_planes.forward(h_hi, p1_hi, p2_hi);

                    stream0.join().unwrap_or_else(|e| resume_unwind(e))
                })?;

                self.cpu.unpack_aux(ncol, packed1, aux1);

                if let (Some(packed2), Some(aux2)) = (packed2, aux2.as_deref_mut()) {
                    self.cpu.unpack_aux(ncol, packed2, aux2);
                }
            }
        }

        Ok(())
    }
}

impl FFTBackend for HybridBackend {
    fn processing_unit(&self) -> ProcessingUnit {
        ProcessingUnit::Gpu
    }

    fn num_threads(&self) -> usize {
        self.cpu.num_threads()
    }

    fn num_device_planes(&self) -> usize {
        self.nbatch
    }

    fn gpu_only(&self) -> bool {
        self.gpu_only
    }

    fn holds_device_memory(&self) -> bool {
        self.accel.is_allocated()
    }

    fn prepare(&mut self, main: &mut DeviceBuffer, table: &ColumnTable) -> Result<(), FFT3DError> {
        if !main.has_device() {
            let mirror = self.accel.memory().allocate::<c64>(main.len())?;
            main.attach(mirror);
        }

        if let Err(e) = self.accel.allocate(table, self.cpu.local_z, self.nbatch) {
            main.detach();
            return Err(e);
        }

        Ok(())
    }

    fn dismiss(&mut self, main: &mut DeviceBuffer) {
        self.accel.release();
        main.detach();
    }

    fn sync_input(&mut self, main: &mut DeviceBuffer) {
        main.copy_to_device();
    }

    fn sync_output(&mut self, main: &mut DeviceBuffer) {
        if main.residency() == Residency::Device {
            main.copy_to_host();
        }
    }

    fn transform_z(
        &self,
        dir: Direction,
        grid: &FFTGrid,
        cols: &[ZColumn],
        reduced: bool,
        data: &mut [c64],
        zbuf: &mut [c64],
    ) {
        self.cpu.transform_z(dir, grid, cols, reduced, data, zbuf);
    }

    fn transform_xy(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: &mut [c64],
        packed: &mut [c64],
    ) -> Result<(), FFT3DError> {
        self.planes(dir, main, table, aux, None, packed, None)
    }

    fn transform_xy_pair(
        &mut self,
        dir: Direction,
        main: &mut DeviceBuffer,
        table: &ColumnTable,
        aux: [&mut [c64]; 2],
        packed: [&mut [c64]; 2],
    ) -> Result<(), FFT3DError> {
        let [aux1, aux2] = aux;
        let [packed1, packed2] = packed;

        self.planes(dir, main, table, aux1, Some(aux2), packed1, Some(packed2))
    }
}
