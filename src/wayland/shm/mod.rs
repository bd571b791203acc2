//! SHM handling helpers
//!
//! SHM (Shared Memory) is the most basic way wayland clients can send content to
//! the server: by sending a file descriptor to some (likely RAM-backed) storage
//! containing the actual data. This module handles these file descriptors and gives
//! access to their contents as simple `&[u8]` slices.
//!
//! The [`ShmState`] global advertises the two formats every server must support,
//! `ARGB8888` and `XRGB8888`, and nothing else.
//!
//! When the compositing stage receives a committed [`Buffer`], it reads its contents
//! with [`Buffer::with_contents`]:
//!
//! ```
//! use reflector::wayland::shm::{Buffer, BufferAccessError, BufferData};
//!
//! fn checksum(buffer: &Buffer) -> Result<u64, BufferAccessError> {
//!     buffer.with_contents(|slice: &[u8], data: BufferData| {
//!         // `slice` holds exactly `stride * height` bytes
//!         debug_assert_eq!(slice.len(), (data.stride * data.height) as usize);
//!         slice.iter().map(|b| *b as u64).sum()
//!     })
//! }
//! ```
//!
//! The client side of the protocol allocates its pixels in a [`SharedMemoryRegion`].

use std::{fmt, rc::Rc};

use tracing::{debug, warn};

mod pool;
mod region;

pub use self::pool::PoolError;
pub use self::region::{RegionError, SharedMemoryRegion};
use self::pool::MappedPool;

use super::{
    interfaces::{Interface, WL_BUFFER, WL_SHM, WL_SHM_POOL},
    registry::{BindError, GlobalHandler},
    resource::{DispatchContext, ProtocolError, Request, Resource},
    wire::{Message, ObjectId},
};

const SHM_FORMAT: u16 = 0;
const BUFFER_RELEASE: u16 = 0;

/// `wl_shm` error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShmError {
    /// Buffer format is not known
    InvalidFormat = 0,
    /// Invalid size or stride during pool or buffer creation
    InvalidStride = 1,
    /// Mmapping the file descriptor failed
    InvalidFd = 2,
}

/// Pixel formats of shm buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// 32-bit ARGB format, `[31:0] A:R:G:B 8:8:8:8` little endian
    Argb8888,
    /// 32-bit RGB format, `[31:0] x:R:G:B 8:8:8:8` little endian
    Xrgb8888,
}

impl Format {
    /// Every supported format
    pub const ALL: [Format; 2] = [Format::Argb8888, Format::Xrgb8888];

    /// Decode a `wl_shm.format` value
    pub fn from_wire(value: u32) -> Option<Format> {
        match value {
            0 => Some(Format::Argb8888),
            1 => Some(Format::Xrgb8888),
            _ => None,
        }
    }

    /// The `wl_shm.format` value
    pub fn to_wire(self) -> u32 {
        match self {
            Format::Argb8888 => 0,
            Format::Xrgb8888 => 1,
        }
    }

    /// Size of a pixel in bytes
    pub fn bytes_per_pixel(self) -> i32 {
        4
    }
}

/// Error that can occur when accessing an SHM buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferAccessError {
    /// An error occurred while accessing the memory map
    ///
    /// This can happen if the client advertized a wrong size
    /// for the memory map, or shrank the file behind it.
    #[error("the buffer does not fit its memory map")]
    BadMap,
}

/// Invalid buffer parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// The format is not supported
    #[error("format {0} is not supported")]
    InvalidFormat(u32),
    /// Width or height is not positive
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// requested width
        width: i32,
        /// requested height
        height: i32,
    },
    /// The offset is negative
    #[error("invalid offset {0}")]
    InvalidOffset(i32),
    /// The stride cannot hold a row of pixels
    #[error("stride {stride} is too small for a width of {width}")]
    InvalidStride {
        /// requested stride
        stride: i32,
        /// requested width
        width: i32,
    },
    /// The buffer does not fit in its pool
    #[error("buffer ends at {end}, out of bounds of a {size} bytes pool")]
    OutOfBounds {
        /// first byte after the buffer
        end: i64,
        /// pool size
        size: usize,
    },
}

impl BufferError {
    fn code(&self) -> ShmError {
        match self {
            BufferError::InvalidFormat(_) => ShmError::InvalidFormat,
            _ => ShmError::InvalidStride,
        }
    }
}

/// Details of the contents of a buffer relative to its pool
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferData {
    /// Offset of the start of the buffer relative to the beginning of the pool in bytes
    pub offset: i32,
    /// Width of the buffer in pixels
    pub width: i32,
    /// Height of the buffer in pixels
    pub height: i32,
    /// Stride of the buffer in bytes
    pub stride: i32,
    /// Format used by this buffer
    pub format: Format,
}

impl BufferData {
    /// Check these parameters against a pool of `pool_size` bytes
    pub fn validate(&self, pool_size: usize) -> Result<(), BufferError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(BufferError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.offset < 0 {
            return Err(BufferError::InvalidOffset(self.offset));
        }
        if i64::from(self.stride) < i64::from(self.width) * i64::from(self.format.bytes_per_pixel()) {
            return Err(BufferError::InvalidStride {
                stride: self.stride,
                width: self.width,
            });
        }
        let end = self.end();
        if end > pool_size as i64 {
            return Err(BufferError::OutOfBounds { end, size: pool_size });
        }
        Ok(())
    }

    /// Number of bytes covered by the buffer
    pub fn len(&self) -> usize {
        (i64::from(self.stride) * i64::from(self.height)).max(0) as usize
    }

    /// Whether the buffer covers no byte
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn end(&self) -> i64 {
        i64::from(self.offset) + i64::from(self.stride) * i64::from(self.height)
    }
}

struct BufferInner {
    pool: Rc<MappedPool>,
    data: BufferData,
}

/// The contents of a `wl_buffer`
///
/// Cloning is cheap. The pool mapping stays alive as long as any clone exists, even once
/// the client destroyed the pool and the buffer objects.
#[derive(Clone)]
pub struct Buffer {
    inner: Rc<BufferInner>,
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("data", &self.inner.data).finish()
    }
}

impl Buffer {
    /// Layout of the buffer in its pool
    pub fn data(&self) -> BufferData {
        self.inner.data
    }

    /// Whether both handles refer to the same buffer
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Call given closure with the contents of the buffer
    ///
    /// - The first argument is the data slice of the buffer, `stride * height` bytes
    /// - The second argument is the specification of this buffer in its pool
    pub fn with_contents<F, T>(&self, f: F) -> Result<T, BufferAccessError>
    where
        F: FnOnce(&[u8], BufferData) -> T,
    {
        let data = self.inner.data;
        self.inner
            .pool
            .with_data(data.offset as usize, data.len(), |slice| f(slice, data))
    }
}

/// Handler of the `wl_shm` global
#[derive(Debug, Default, Clone, Copy)]
pub struct ShmState;

impl GlobalHandler for ShmState {
    fn bind(
        &self,
        ctx: &mut DispatchContext<'_>,
        id: ObjectId,
        _version: u32,
    ) -> Result<Box<dyn Resource>, BindError> {
        for format in Format::ALL {
            ctx.send(Message::new(id, SHM_FORMAT).uint(format.to_wire()));
        }
        Ok(Box::new(Shm))
    }
}

/// A bound `wl_shm`
#[derive(Debug)]
pub struct Shm;

impl Resource for Shm {
    fn interface(&self) -> &'static Interface {
        &WL_SHM
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        // create_pool
        let this = request.this;
        let id = request.new_id()?;
        let fd = request.fd()?;
        let size = request.int()?;
        let pool = MappedPool::new(fd, size).map_err(|err| {
            ProtocolError::new(this, ShmError::InvalidFd as u32, format!("invalid pool: {}", err))
        })?;
        debug!(client = %ctx.client, pool = %id, size, "New shm pool");
        let version = ctx.version_of(this);
        ctx.insert(id, version, ShmPool { pool: Rc::new(pool) })
    }
}

/// A `wl_shm_pool` object
#[derive(Debug)]
pub struct ShmPool {
    pool: Rc<MappedPool>,
}

impl ShmPool {
    /// Current size of the pool
    pub fn size(&self) -> usize {
        self.pool.size()
    }
}

impl Resource for ShmPool {
    fn interface(&self) -> &'static Interface {
        &WL_SHM_POOL
    }

    fn request(&mut self, ctx: &mut DispatchContext<'_>, mut request: Request) -> Result<(), ProtocolError> {
        let this = request.this;
        match request.opcode {
            // create_buffer
            0 => {
                let id = request.new_id()?;
                let offset = request.int()?;
                let width = request.int()?;
                let height = request.int()?;
                let stride = request.int()?;
                let format = request.uint()?;
                let data = Format::from_wire(format)
                    .ok_or(BufferError::InvalidFormat(format))
                    .and_then(|format| {
                        let data = BufferData {
                            offset,
                            width,
                            height,
                            stride,
                            format,
                        };
                        data.validate(self.pool.size()).map(|()| data)
                    })
                    .map_err(|err| ProtocolError::new(this, err.code() as u32, err.to_string()))?;
                let version = ctx.version_of(this);
                ctx.insert(
                    id,
                    version,
                    ShmBuffer {
                        buffer: Buffer {
                            inner: Rc::new(BufferInner {
                                pool: self.pool.clone(),
                                data,
                            }),
                        },
                    },
                )
            }
            // destroy
            1 => Ok(()),
            // resize
            2 => {
                let size = request.int()?;
                self.pool.resize(size).map_err(|err| {
                    warn!(client = %ctx.client, pool = %this, "Failed to resize shm pool: {}", err);
                    ProtocolError::new(this, ShmError::InvalidFd as u32, format!("invalid resize: {}", err))
                })
            }
            _ => unreachable!(),
        }
    }
}

/// A `wl_buffer` backed by a shm pool
#[derive(Debug)]
pub struct ShmBuffer {
    buffer: Buffer,
}

impl ShmBuffer {
    /// The buffer contents
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn release_event(id: ObjectId) -> Message {
        Message::new(id, BUFFER_RELEASE)
    }
}

impl Resource for ShmBuffer {
    fn interface(&self) -> &'static Interface {
        &WL_BUFFER
    }

    fn request(&mut self, _ctx: &mut DispatchContext<'_>, _request: Request) -> Result<(), ProtocolError> {
        // destroy, surfaces holding the contents keep them
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(offset: i32, width: i32, height: i32, stride: i32) -> BufferData {
        BufferData {
            offset,
            width,
            height,
            stride,
            format: Format::Xrgb8888,
        }
    }

    #[test]
    fn buffer_fills_pool_exactly() {
        assert_eq!(buffer(0, 32, 32, 128).validate(4096), Ok(()));
        assert_eq!(
            buffer(64, 32, 32, 128).validate(4096),
            Err(BufferError::OutOfBounds { end: 4160, size: 4096 })
        );
    }

    #[test]
    fn stride_must_hold_a_row() {
        assert_eq!(
            buffer(0, 32, 4, 100).validate(4096),
            Err(BufferError::InvalidStride { stride: 100, width: 32 })
        );
        assert!(buffer(0, 32, 4, 160).validate(4096).is_ok());
    }

    #[test]
    fn dimensions_and_offset_are_checked() {
        assert!(matches!(
            buffer(0, 0, 4, 128).validate(4096),
            Err(BufferError::InvalidDimensions { .. })
        ));
        assert_eq!(buffer(-4, 4, 4, 16).validate(4096), Err(BufferError::InvalidOffset(-4)));
    }

    #[test]
    fn huge_buffers_do_not_overflow() {
        assert!(matches!(
            buffer(i32::MAX, 1, i32::MAX, i32::MAX).validate(4096),
            Err(BufferError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn formats_are_the_mandatory_pair() {
        assert_eq!(Format::from_wire(0), Some(Format::Argb8888));
        assert_eq!(Format::from_wire(1), Some(Format::Xrgb8888));
        assert_eq!(Format::from_wire(0x3432_5258), None);
        assert_eq!(BufferError::InvalidFormat(7).code(), ShmError::InvalidFormat);
        assert_eq!(buffer(0, 0, 0, 0).validate(0).unwrap_err().code(), ShmError::InvalidStride);
    }
}
