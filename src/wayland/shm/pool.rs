use std::{
    cell::RefCell,
    io,
    ops::Deref,
    os::unix::io::{AsFd, OwnedFd},
    ptr::{self, NonNull},
    slice,
};

use rustix::mm::{self, MapFlags, ProtFlags};
use tracing::{debug, trace};

use super::BufferAccessError;

/// Errors while mapping or resizing a pool
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The requested size is zero, negative, or shrinks the pool
    #[error("invalid pool size {0}")]
    InvalidSize(i64),
    /// The file backing the pool is smaller than the pool
    #[error("file of {file_size} bytes is too small for a pool of {size} bytes")]
    FdTooSmall {
        /// requested pool size
        size: usize,
        /// actual size of the file
        file_size: u64,
    },
    /// Mapping the file failed
    #[error("mmap failed: {0}")]
    Map(#[source] io::Error),
}

/// The memory mapping of a client provided file
///
/// The pool only ever reads from the mapping.
#[derive(Debug)]
pub(crate) struct MappedPool {
    map: RefCell<MemMap>,
    fd: OwnedFd,
}

impl MappedPool {
    /// Map `size` bytes of `fd`, taking ownership of the file descriptor.
    pub(crate) fn new(fd: OwnedFd, size: i32) -> Result<MappedPool, PoolError> {
        if size <= 0 {
            return Err(PoolError::InvalidSize(size.into()));
        }
        let size = size as usize;
        check_file_size(&fd, size)?;
        let map = MemMap::new(&fd, size).map_err(PoolError::Map)?;
        trace!(fd = ?fd, size, "Creating new shm pool");
        Ok(MappedPool {
            map: RefCell::new(map),
            fd,
        })
    }

    /// Grow the pool to `newsize` bytes
    pub(crate) fn resize(&self, newsize: i32) -> Result<(), PoolError> {
        let mut map = self.map.borrow_mut();
        let oldsize = map.size();

        if newsize <= 0 || oldsize > (newsize as usize) {
            return Err(PoolError::InvalidSize(newsize.into()));
        }
        let newsize = newsize as usize;
        check_file_size(&self.fd, newsize)?;

        trace!(fd = ?self.fd, oldsize, newsize, "Resizing shm pool");
        if let Err(err) = map.remap(&self.fd, newsize) {
            debug!(fd = ?self.fd, oldsize, newsize, "SHM pool resize failed: {}", err);
            return Err(PoolError::Map(err));
        }
        Ok(())
    }

    /// Current size of the mapping, `0` after a failed resize
    pub(crate) fn size(&self) -> usize {
        self.map.borrow().size()
    }

    /// Access `len` bytes of the pool starting at `offset`
    ///
    /// A client may shrink the file after handing it over, touching the missing pages would
    /// raise `SIGBUS`. The file size is checked on every access instead.
    pub(crate) fn with_data<T, F: FnOnce(&[u8]) -> T>(
        &self,
        offset: usize,
        len: usize,
        f: F,
    ) -> Result<T, BufferAccessError> {
        let end = offset.checked_add(len).ok_or(BufferAccessError::BadMap)?;
        if check_file_size(&self.fd, end).is_err() {
            debug!(fd = ?self.fd, end, "Backing file of shm pool shrank");
            return Err(BufferAccessError::BadMap);
        }
        let map = self.map.borrow();
        let data = map.get(offset..end).ok_or(BufferAccessError::BadMap)?;
        trace!(fd = ?self.fd, offset, len, "Buffer access on shm pool");
        Ok(f(data))
    }
}

impl Drop for MappedPool {
    fn drop(&mut self) {
        trace!(fd = ?self.fd, "Deleting SHM pool");
    }
}

fn check_file_size(fd: &OwnedFd, size: usize) -> Result<(), PoolError> {
    let stat = rustix::fs::fstat(fd).map_err(|err| PoolError::Map(err.into()))?;
    let file_size = u64::try_from(stat.st_size).unwrap_or(0);
    if file_size < size as u64 {
        return Err(PoolError::FdTooSmall { size, file_size });
    }
    Ok(())
}

#[derive(Debug)]
enum MemMap {
    /// A valid mapping.
    Mapping { ptr: NonNull<u8>, size: usize },

    /// The invalid state.
    ///
    /// This may be set if remapping an shm pool fails after a resize.
    Invalid,
}

impl MemMap {
    fn new(fd: impl AsFd, size: usize) -> io::Result<MemMap> {
        let ptr = unsafe { map(fd, size) }?;
        Ok(MemMap::Mapping { ptr, size })
    }

    fn remap(&mut self, fd: impl AsFd, newsize: usize) -> io::Result<()> {
        match self {
            MemMap::Mapping {
                ptr: mapping_ptr,
                size,
            } => {
                // munmap cannot fail, as we are unmapping a pre-existing map
                let _ = unsafe { unmap(*mapping_ptr, *size) };

                match unsafe { map(fd, newsize) } {
                    Ok(ptr) => {
                        *mapping_ptr = ptr;
                        *size = newsize;
                        Ok(())
                    }
                    Err(err) => {
                        // set ourselves in an empty state
                        *self = MemMap::Invalid;
                        Err(err)
                    }
                }
            }

            // Previous remap has failed.
            MemMap::Invalid => Err(io::Error::new(
                io::ErrorKind::Other,
                "Cannot remap because previous remap has failed.",
            )),
        }
    }

    fn size(&self) -> usize {
        match self {
            MemMap::Mapping { size, .. } => *size,
            MemMap::Invalid => 0,
        }
    }
}

impl Deref for MemMap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            // SAFETY: Readers are required to borrow the MemMap, and the lifetime of the return value is
            // elided to the lifetime of the MemMap. The mapping is read-only and never mutated by us.
            MemMap::Mapping { ptr, size } => unsafe { slice::from_raw_parts(ptr.as_ptr(), *size) },
            MemMap::Invalid => &[],
        }
    }
}

impl Drop for MemMap {
    fn drop(&mut self) {
        if let MemMap::Mapping { ptr, size } = self {
            let _ = unsafe { unmap(*ptr, *size) };
        }
    }
}

unsafe fn map(fd: impl AsFd, size: usize) -> io::Result<NonNull<u8>> {
    let ptr = mm::mmap(ptr::null_mut(), size, ProtFlags::READ, MapFlags::SHARED, fd, 0)?;
    NonNull::new(ptr.cast::<u8>()).ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

unsafe fn unmap(ptr: NonNull<u8>, size: usize) -> io::Result<()> {
    mm::munmap(ptr.as_ptr().cast(), size)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backing_file(len: usize) -> OwnedFd {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![7u8; len]).unwrap();
        file.into()
    }

    #[test]
    fn pool_maps_file_contents() {
        let pool = MappedPool::new(backing_file(64), 64).unwrap();
        assert_eq!(pool.size(), 64);
        let sum = pool
            .with_data(8, 8, |bytes| bytes.iter().map(|b| *b as u32).sum::<u32>())
            .unwrap();
        assert_eq!(sum, 56);
        assert!(pool.with_data(60, 8, |_| ()).is_err());
    }

    #[test]
    fn pool_larger_than_file_is_refused() {
        assert!(matches!(
            MappedPool::new(backing_file(16), 64),
            Err(PoolError::FdTooSmall { size: 64, file_size: 16 })
        ));
        assert!(matches!(
            MappedPool::new(backing_file(16), 0),
            Err(PoolError::InvalidSize(0))
        ));
    }

    #[test]
    fn pool_only_grows() {
        let fd = backing_file(128);
        let pool = MappedPool::new(fd, 64).unwrap();
        assert!(matches!(pool.resize(32), Err(PoolError::InvalidSize(32))));
        pool.resize(128).unwrap();
        assert_eq!(pool.size(), 128);
        assert!(matches!(pool.resize(256), Err(PoolError::FdTooSmall { .. })));
        assert_eq!(pool.size(), 128);
    }
}
