//! GPU buffers for user data
//!
//! Two memory strategies:
//! - `Dynamic`: host-visible memory mapped once for the buffer's lifetime;
//!   updates are plain memory copies.
//! - `Static` / `Staging`: device-local memory filled through a transient
//!   host-visible staging buffer and a one-shot copy command.

use super::backend::{
    BufferAllocation, BufferHandle, BufferUsage, CommandPoolHandle, GpuBackend, GpuError,
    MemoryLocation, SubmitDesc,
};
use std::ptr::NonNull;
use std::time::Duration;
use thiserror::Error;

/// Buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Buffers must hold at least one byte
    #[error("buffer size must be non-zero")]
    ZeroSize,

    /// Initial data longer than the buffer
    #[error("initial data is {len} bytes but the buffer holds {size}")]
    InitialTooLarge {
        /// Initial data length
        len: usize,
        /// Buffer size
        size: u64,
    },

    /// Write past the end of the buffer
    #[error("write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        /// Write offset
        offset: u64,
        /// Write length
        len: usize,
        /// Buffer size
        size: u64,
    },

    /// Operation only valid on dynamic buffers
    #[error("{0:?} buffers cannot be mapped or updated from the CPU")]
    Unsupported(BufferPattern),

    /// Backend failure
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// What the buffer holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferClass {
    /// Vertex attributes
    Vertex,
    /// Index data
    Index,
    /// Uniform block
    Uniform,
    /// Shader storage
    Storage,
}

impl BufferClass {
    fn usage(self) -> BufferUsage {
        match self {
            Self::Vertex => BufferUsage::VERTEX,
            Self::Index => BufferUsage::INDEX,
            Self::Uniform => BufferUsage::UNIFORM,
            Self::Storage => BufferUsage::STORAGE,
        }
    }
}

/// How the buffer is updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferPattern {
    /// Written once at creation
    Static,
    /// Rewritten from the CPU, persistently mapped
    Dynamic,
    /// Device-local transfer source
    Staging,
}

/// A live GPU buffer
///
/// Owned by the caller; [`Buffer::destroy`] consumes it.
#[derive(Debug)]
pub struct Buffer {
    allocation: BufferAllocation,
    class: BufferClass,
    pattern: BufferPattern,
    canvas: usize,
    mapping: Option<NonNull<u8>>,
}

impl Buffer {
    /// Create a buffer of `size` bytes, optionally filled with `initial`
    ///
    /// For non-dynamic patterns the upload waits on a fence for at most
    /// `timeout`.
    pub fn create(
        backend: &mut dyn GpuBackend,
        canvas: usize,
        class: BufferClass,
        pattern: BufferPattern,
        size: u64,
        initial: Option<&[u8]>,
        timeout: Duration,
    ) -> BufferResult<Self> {
        if size == 0 {
            return Err(BufferError::ZeroSize);
        }
        if let Some(data) = initial {
            if data.len() as u64 > size {
                return Err(BufferError::InitialTooLarge { len: data.len(), size });
            }
        }

        let mut buffer = match pattern {
            BufferPattern::Dynamic => Self::create_dynamic(backend, canvas, class, size)?,
            BufferPattern::Static | BufferPattern::Staging => {
                let usage = class.usage() | BufferUsage::TRANSFER_DST | BufferUsage::TRANSFER_SRC;
                let allocation = backend.create_buffer(size, usage, MemoryLocation::DeviceLocal)?;
                Self {
                    allocation,
                    class,
                    pattern,
                    canvas,
                    mapping: None,
                }
            }
        };

        if let Some(data) = initial.filter(|data| !data.is_empty()) {
            let written = match pattern {
                BufferPattern::Dynamic => buffer.update(data, 0),
                BufferPattern::Static | BufferPattern::Staging => {
                    upload_via_staging(backend, buffer.allocation.buffer, data, timeout)
                }
            };
            if let Err(e) = written {
                log::warn!("Initial upload of {size}-byte {class:?} buffer failed: {e}");
                buffer.destroy(backend);
                return Err(e);
            }
        }

        log::debug!("Created {pattern:?} {class:?} buffer ({size} bytes) for canvas {canvas}");
        Ok(buffer)
    }

    fn create_dynamic(
        backend: &mut dyn GpuBackend,
        canvas: usize,
        class: BufferClass,
        size: u64,
    ) -> BufferResult<Self> {
        let allocation = backend.create_buffer(size, class.usage(), MemoryLocation::HostVisible)?;
        match backend.map_memory(allocation.memory, size) {
            Ok(ptr) => Ok(Self {
                allocation,
                class,
                pattern: BufferPattern::Dynamic,
                canvas,
                mapping: Some(ptr),
            }),
            Err(e) => {
                backend.destroy_buffer(&allocation);
                Err(e.into())
            }
        }
    }

    /// Copy `data` into a dynamic buffer at `offset`
    ///
    /// Out-of-range writes are rejected before anything is written.
    pub fn update(&mut self, data: &[u8], offset: u64) -> BufferResult<()> {
        let size = self.allocation.size;
        let fits = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= size);
        if !fits {
            return Err(BufferError::OutOfBounds {
                offset,
                len: data.len(),
                size,
            });
        }
        let mapped = self.map()?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy a slice of plain-old-data values into a dynamic buffer at `offset`
    pub fn write<T: bytemuck::Pod>(&mut self, values: &[T], offset: u64) -> BufferResult<()> {
        self.update(bytemuck::cast_slice(values), offset)
    }

    /// The persistent mapping of a dynamic buffer
    pub fn map(&mut self) -> BufferResult<&mut [u8]> {
        let ptr = self.mapping.ok_or(BufferError::Unsupported(self.pattern))?;
        // SAFETY: the mapping covers `size` bytes and stays valid until
        // `destroy` unmaps it, which consumes `self`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), self.allocation.size as usize) })
    }

    /// Mappings are persistent, so this is a no-op for every pattern
    pub fn unmap(&mut self) {}

    /// Release the buffer and its memory
    pub fn destroy(self, backend: &mut dyn GpuBackend) {
        if self.mapping.is_some() {
            backend.unmap_memory(self.allocation.memory);
        }
        backend.destroy_buffer(&self.allocation);
        log::trace!("Destroyed {:?} buffer {:?}", self.pattern, self.allocation.buffer);
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.allocation.size
    }

    /// Usage class
    pub fn class(&self) -> BufferClass {
        self.class
    }

    /// Update pattern
    pub fn pattern(&self) -> BufferPattern {
        self.pattern
    }

    /// Index of the owning canvas
    pub fn canvas(&self) -> usize {
        self.canvas
    }

    /// Backend buffer handle
    pub fn handle(&self) -> BufferHandle {
        self.allocation.buffer
    }

    /// Backend allocation
    pub fn allocation(&self) -> &BufferAllocation {
        &self.allocation
    }
}

/// Copy `data` into `dst` through a transient staging buffer
///
/// Every transient object is released whether or not the copy succeeds.
fn upload_via_staging(
    backend: &mut dyn GpuBackend,
    dst: BufferHandle,
    data: &[u8],
    timeout: Duration,
) -> BufferResult<()> {
    let size = data.len() as u64;
    let staging = backend.create_buffer(size, BufferUsage::TRANSFER_SRC, MemoryLocation::HostVisible)?;

    let result = (|| -> BufferResult<()> {
        let ptr = backend.map_memory(staging.memory, size)?;
        // SAFETY: freshly mapped host-visible range of exactly `size` bytes
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr(), data.len()) };
        backend.unmap_memory(staging.memory);

        let pool = backend.create_command_pool()?;
        let copied = copy_once(backend, pool, staging.buffer, dst, size, timeout);
        backend.destroy_command_pool(pool);
        copied
    })();

    backend.destroy_buffer(&staging);
    result
}

fn copy_once(
    backend: &mut dyn GpuBackend,
    pool: CommandPoolHandle,
    src: BufferHandle,
    dst: BufferHandle,
    size: u64,
    timeout: Duration,
) -> BufferResult<()> {
    let command_buffer = backend
        .allocate_command_buffers(pool, 1)?
        .first()
        .copied()
        .ok_or(GpuError::InvalidHandle)?;

    backend.begin_commands(command_buffer, true)?;
    backend.cmd_copy_buffer(command_buffer, src, dst, size);
    backend.end_commands(command_buffer)?;

    let fence = backend.create_fence(false)?;
    let waited = backend
        .submit(&SubmitDesc {
            command_buffer,
            wait: None,
            signal: None,
            fence: Some(fence),
        })
        .and_then(|()| backend.wait_fence(fence, timeout));

    if waited.is_err() {
        // Nothing may still reference the staging buffer when it is freed
        if let Err(e) = backend.wait_idle() {
            log::error!("Idle wait after failed staging copy also failed: {e}");
        }
    }
    backend.destroy_fence(fence);
    waited.map_err(BufferError::from)
}
