use std::sync::{
    atomic::{AtomicU16, Ordering},
    Arc,
};

use crate::{
    config::FrameInfo,
    format::{FourCc, Plane, PlaneLayout},
};

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("No system memory layout for {0:?}")]
    UnsupportedFormat(FourCc),
    #[error("Cannot allocate a pool without surfaces")]
    ZeroSurfaces,
    #[error("Pool of {count} surfaces of {surface_size} bytes does not fit in memory")]
    TooLarge { surface_size: usize, count: usize },
    #[error("Failed to reserve {0} bytes")]
    OutOfMemory(usize),
}

/// Marks a surface as in use by the device.
///
/// The surface stays locked until every lease taken on it has been dropped.
#[derive(Debug)]
pub struct SurfaceLease {
    index: usize,
    lock: Arc<AtomicU16>,
}

impl SurfaceLease {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for SurfaceLease {
    fn drop(&mut self) {
        self.lock.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct Surface {
    offset: usize,
    lock: Arc<AtomicU16>,
}

/// A fixed set of equally sized frame surfaces sharing one allocation.
///
/// Surfaces are never reallocated individually, the plane pointers of
/// surface `i` always start at `base + i * surface_size`.
pub struct SurfacePool {
    buffer: Vec<u8>,
    surface_size: usize,
    info: FrameInfo,
    layout: PlaneLayout,
    surfaces: Vec<Surface>,
}

impl SurfacePool {
    /// Allocate `count` surfaces described by `info`, whose width and height
    /// must already be padded.
    pub fn allocate(info: FrameInfo, count: usize) -> Result<Self, AllocationError> {
        let unsupported = || AllocationError::UnsupportedFormat(info.fourcc);
        let surface_size = info
            .fourcc
            .surface_size(info.width, info.height)
            .ok_or_else(unsupported)?;
        let layout = info
            .fourcc
            .plane_layout(info.width, info.height)
            .ok_or_else(unsupported)?;

        if count == 0 {
            return Err(AllocationError::ZeroSurfaces);
        }

        let total = surface_size
            .checked_mul(count)
            .filter(|total| *total <= isize::MAX as usize)
            .ok_or(AllocationError::TooLarge {
                surface_size,
                count,
            })?;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(total)
            .map_err(|_| AllocationError::OutOfMemory(total))?;
        buffer.resize(total, 0);

        let surfaces = (0..count)
            .map(|i| Surface {
                offset: i * surface_size,
                lock: Arc::new(AtomicU16::new(0)),
            })
            .collect();

        tracing::debug!(
            fourcc = ?info.fourcc,
            width = info.width,
            height = info.height,
            count,
            surface_size,
            "Surface pool allocated"
        );

        Ok(Self {
            buffer,
            surface_size,
            info,
            layout,
            surfaces,
        })
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Size of a single surface in bytes.
    pub fn surface_size(&self) -> usize {
        self.surface_size
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn layout(&self) -> PlaneLayout {
        self.layout
    }

    pub fn base_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    /// Index of the first surface that is not locked by the device.
    pub fn find_free(&self) -> Option<usize> {
        self.surfaces
            .iter()
            .position(|s| s.lock.load(Ordering::Acquire) == 0)
    }

    pub fn locked_count(&self) -> usize {
        self.surfaces
            .iter()
            .filter(|s| s.lock.load(Ordering::Acquire) != 0)
            .count()
    }

    pub fn surface(&self, index: usize) -> Option<SurfaceRef<'_>> {
        let surface = self.surfaces.get(index)?;
        Some(SurfaceRef {
            index,
            info: &self.info,
            layout: self.layout,
            data: &self.buffer[surface.offset..surface.offset + self.surface_size],
            lock: &surface.lock,
        })
    }

    /// Write access to an unlocked surface.
    ///
    /// Returns `None` if the index is out of range or the device still holds the surface.
    pub fn surface_mut(&mut self, index: usize) -> Option<SurfaceMut<'_>> {
        let surface = self.surfaces.get(index)?;
        if surface.lock.load(Ordering::Acquire) != 0 {
            return None;
        }
        let start = surface.offset;
        Some(SurfaceMut {
            index,
            info: self.info,
            layout: self.layout,
            data: &mut self.buffer[start..start + self.surface_size],
        })
    }
}

/// Read-only view of one surface, as handed to the device.
#[derive(Clone, Copy)]
pub struct SurfaceRef<'a> {
    index: usize,
    info: &'a FrameInfo,
    layout: PlaneLayout,
    data: &'a [u8],
    lock: &'a Arc<AtomicU16>,
}

impl<'a> SurfaceRef<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> &'a FrameInfo {
        self.info
    }

    pub fn pitch(&self) -> usize {
        self.layout.pitch
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn plane_ptr(&self, plane: Plane) -> Option<*const u8> {
        let offset = self.layout.planes.offset(plane)?;
        Some(self.data.as_ptr().wrapping_add(offset))
    }

    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Acquire) != 0
    }

    /// Lock the surface until the returned lease is dropped.
    pub fn lease(&self) -> SurfaceLease {
        self.lock.fetch_add(1, Ordering::AcqRel);
        SurfaceLease {
            index: self.index,
            lock: Arc::clone(self.lock),
        }
    }
}

pub struct SurfaceMut<'a> {
    index: usize,
    info: FrameInfo,
    layout: PlaneLayout,
    data: &'a mut [u8],
}

impl<'a> SurfaceMut<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    pub fn layout(&self) -> PlaneLayout {
        self.layout
    }

    /// Stride of the first plane in bytes.
    pub fn pitch(&self) -> usize {
        self.layout.pitch
    }

    /// Note that thanks to the padding of both width and height, each plane
    /// may have extra bytes at the end of each row and extra rows at the end.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }
}
