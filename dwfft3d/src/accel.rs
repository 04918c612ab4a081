//! Emulated accelerator.
//!
//! The device owns a memory pool of fixed capacity, its own 2-D plans and
//! scratch, and runs work on streams. A stream is a scoped thread; all
//! streams of a stage are joined before the stage returns. Host code only
//! touches device memory through `DeviceBuffer::copy_to_device`,
//! `copy_to_host` and `synchronize`.

use crate::workspace::{FFTPlans, FFTWorkspace};
use crate::xystage::{pack_plane, unpack_plane, ColumnPositions, ColumnTable};
use crate::{Direction, FFT3DError};
use fftgrid::FFTGrid;
use log::{debug, info};
use parking_lot::Mutex;
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use types::{c64, ZERO_C64};

#[derive(Debug)]
pub(crate) struct MemoryPool {
    capacity: usize,
    used: Mutex<usize>,
}

impl MemoryPool {
    pub fn new(capacity: Option<usize>) -> Arc<MemoryPool> {
        Arc::new(MemoryPool {
            capacity: capacity.unwrap_or(usize::MAX),
            used: Mutex::new(0),
        })
    }

    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    pub fn allocate<T: Copy + Default>(self: &Arc<Self>, len: usize) -> Result<DeviceMemory<T>, FFT3DError> {
        let bytes = len * size_of::<T>();

        let mut used = self.used.lock();
        let available = self.capacity - *used;

        if bytes > available {
            return Err(FFT3DError::DeviceAllocation {
                requested: bytes,
                available,
            });
        }

        *used += bytes;

        Ok(DeviceMemory {
            data: vec![T::default(); len],
            bytes,
            pool: Arc::clone(self),
        })
    }
}

/// Allocation in the device memory pool, returned to the pool on drop.
#[derive(Debug)]
pub(crate) struct DeviceMemory<T> {
    data: Vec<T>,
    bytes: usize,
    pool: Arc<MemoryPool>,
}

impl<T> Drop for DeviceMemory<T> {
    fn drop(&mut self) {
        *self.pool.used.lock() -= self.bytes;
    }
}

impl<T> Deref for DeviceMemory<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for DeviceMemory<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Which side holds the current content of a `DeviceBuffer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Host,
    Device,
    Synced,
}

/// Host array with an optional device mirror.
#[derive(Debug)]
pub struct DeviceBuffer {
    pub(crate) host: Vec<c64>,
    pub(crate) device: Option<DeviceMemory<c64>>,
    pub(crate) residency: Residency,
}

impl DeviceBuffer {
    pub(crate) fn new(len: usize) -> DeviceBuffer {
        DeviceBuffer {
            host: vec![ZERO_C64; len],
            device: None,
            residency: Residency::Host,
        }
    }

    pub(crate) fn attach(&mut self, device: DeviceMemory<c64>) {
        self.device = Some(device);
        self.residency = Residency::Host;
    }

    /// Drops the device mirror, keeping its content if it was the current one.
    pub(crate) fn detach(&mut self) {
        if self.residency == Residency::Device {
            self.copy_to_host();
        }

        self.device = None;
        self.residency = Residency::Host;
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    pub fn host(&self) -> &[c64] {
        &self.host
    }

    /// Host side for writing; the device mirror becomes stale.
    pub fn host_mut(&mut self) -> &mut [c64] {
        self.residency = Residency::Host;

        &mut self.host
    }

    pub fn copy_to_device(&mut self) {
        if let Some(device) = self.device.as_mut() {
            device.copy_from_slice(&self.host);
            self.residency = Residency::Synced;
        }
    }

    pub fn copy_to_host(&mut self) {
        if let Some(device) = self.device.as_ref() {
            self.host.copy_from_slice(device);
            self.residency = Residency::Synced;
        }
    }

    /// Brings the stale side up to date.
    pub fn synchronize(&mut self) {
        match self.residency {
            Residency::Host => self.copy_to_device(),
            Residency::Device => self.copy_to_host(),
            Residency::Synced => {}
        }
    }
}

/// Device copies of the column position table and the column buffers of
/// one partition.
struct DeviceColumns {
    reduced: bool,
    dc: Option<usize>,
    pos: DeviceMemory<usize>,
    pos_neg: DeviceMemory<usize>,
    aux: [DeviceMemory<c64>; 2],
    packed: [DeviceMemory<c64>; 2],
}

impl DeviceColumns {
    fn positions(&self) -> ColumnPositions<'_> {
        ColumnPositions {
            reduced: self.reduced,
            dc: self.dc,
            pos: &self.pos,
            pos_neg: &self.pos_neg,
        }
    }
}

pub(crate) struct Accelerator {
    grid: FFTGrid,
    memory: Arc<MemoryPool>,
    workspace: FFTWorkspace,
    columns: Option<DeviceColumns>,
}

impl Accelerator {
    pub fn new(grid: &FFTGrid, capacity: Option<usize>) -> Accelerator {
        match capacity {
            Some(bytes) => info!("accelerator with {} bytes of device memory", bytes),
            None => info!("accelerator with unlimited device memory"),
        }

        Accelerator {
            grid: *grid,
            memory: MemoryPool::new(capacity),
            workspace: FFTWorkspace::new(grid, FFTPlans::new(grid)),
            columns: None,
        }
    }

    pub fn memory(&self) -> &Arc<MemoryPool> {
        &self.memory
    }

    pub fn is_allocated(&self) -> bool {
        self.columns.is_some()
    }

    /// Device copies for a partition of `table` with `nbatch` device planes
    /// out of `local_z`.
    pub fn allocate(&mut self, table: &ColumnTable, local_z: usize, nbatch: usize) -> Result<(), FFT3DError> {
        self.columns = None;

        let ncol = table.num_zcol();
        let nfield = if table.reduced() { 2 } else { 1 };
        let len = |i: usize| if i < nfield { ncol } else { 0 };

        let mut pos = self.memory.allocate::<usize>(ncol)?;
        let mut pos_neg = self.memory.allocate::<usize>(table.pos_neg().len())?;

        let aux = [
            self.memory.allocate::<c64>(len(0) * local_z)?,
            self.memory.allocate::<c64>(len(1) * local_z)?,
        ];

        let packed = [
            self.memory.allocate::<c64>(len(0) * nbatch)?,
            self.memory.allocate::<c64>(len(1) * nbatch)?,
        ];

        pos.copy_from_slice(table.pos());
        pos_neg.copy_from_slice(table.pos_neg());

        self.columns = Some(DeviceColumns {
            reduced: table.reduced(),
            dc: table.dc(),
            pos,
            pos_neg,
            aux,
            packed,
        });

        debug!("device memory in use: {} bytes", self.memory.used());

        Ok(())
    }

    pub fn release(&mut self) {
        self.columns = None;
    }

    /// Stream-0 work of the backward plane stage: copy the columns in,
    /// unpack and transform the planes in `planes` (local z from 0).
    pub fn backward(
        &mut self,
        planes: &mut [c64],
        local_z: usize,
        aux1: &[c64],
        aux2: Option<&[c64]>,
    ) -> Result<(), FFT3DError> {
        let nxy = self.grid.size_xy();
        let cols = self.columns.as_mut().ok_or(FFT3DError::NotPrepared)?;

        cols.aux[0].copy_from_slice(aux1);

        if let Some(aux2) = aux2 {
            cols.aux[1].copy_from_slice(aux2);
        }

        let cols = &*cols;
        let d_aux2 = aux2.map(|_| &cols.aux[1][..]);

        for (iz, plane) in planes.chunks_exact_mut(nxy).enumerate() {
            unpack_plane(plane, iz, local_z, cols.positions(), &cols.aux[0], d_aux2);

            self.workspace.xy(Direction::Backward, plane);
        }

        Ok(())
    }

    /// Stream-0 work of the forward plane stage: transform the planes in
    /// `planes`, pack and copy the packed rows out to `packed1`/`packed2`.
    pub fn forward(
        &mut self,
        planes: &[c64],
        packed1: &mut [c64],
        packed2: Option<&mut [c64]>,
    ) -> Result<(), FFT3DError> {
        let nxy = self.grid.size_xy();
        let cols = self.columns.as_mut().ok_or(FFT3DError::NotPrepared)?;
        let ncol = cols.pos.len();

        if ncol > 0 {
            let positions = ColumnPositions {
                reduced: cols.reduced,
                dc: cols.dc,
                pos: &cols.pos,
                pos_neg: &cols.pos_neg,
            };

            let [d_packed1, d_packed2] = &mut cols.packed;

            for (iz, plane) in planes.chunks_exact(nxy).enumerate() {
                self.workspace.plane.copy_from_slice(plane);
                self.workspace.xy_own(Direction::Forward);

                let row = iz * ncol..(iz + 1) * ncol;
                let row2 = if packed2.is_some() {
                    Some(&mut d_packed2[row.clone()])
                } else {
                    None
                };

                pack_plane(&self.workspace.plane, positions, &mut d_packed1[row], row2);
            }
        }

        packed1.copy_from_slice(&cols.packed[0]);

        if let Some(packed2) = packed2 {
            packed2.copy_from_slice(&cols.packed[1]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_pool_capacity() {
        let pool = MemoryPool::new(Some(1000));

        let a = pool.allocate::<c64>(40).unwrap();
        assert_eq!(pool.used(), 640);

        let err = pool.allocate::<c64>(40).unwrap_err();
        assert_eq!(
            err,
            FFT3DError::DeviceAllocation {
                requested: 640,
                available: 360
            }
        );

        drop(a);
        assert_eq!(pool.used(), 0);
        assert!(pool.allocate::<c64>(40).is_ok());
    }

    #[test]
    fn test_device_buffer_residency() {
        let pool = MemoryPool::new(None);
        let mut buf = DeviceBuffer::new(4);

        buf.host_mut()[1] = c64::new(3.0, 0.0);
        assert_eq!(buf.residency(), Residency::Host);

        // no mirror yet
        buf.synchronize();
        assert_eq!(buf.residency(), Residency::Host);

        buf.attach(pool.allocate(4).unwrap());
        buf.synchronize();
        assert_eq!(buf.residency(), Residency::Synced);

        buf.device.as_mut().unwrap()[2] = c64::new(5.0, 0.0);
        buf.residency = Residency::Device;

        buf.detach();
        assert!(!buf.has_device());
        assert_eq!(buf.host()[1], c64::new(3.0, 0.0));
        assert_eq!(buf.host()[2], c64::new(5.0, 0.0));
        assert_eq!(pool.used(), 0);
    }
}
