//! Anonymous shared memory, the client side of `wl_shm`.

use std::{
    ffi::OsString,
    io,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    path::{Path, PathBuf},
    ptr::{self, NonNull},
    slice,
};

use rand::{distributions::Alphanumeric, Rng};
use rustix::{
    fs::{ftruncate, open, unlink, Mode, OFlags},
    io::Errno,
    mm::{mmap, munmap, MapFlags, ProtFlags},
};
use tracing::trace;

use super::{BufferData, BufferError};

const NAME_PREFIX: &str = "reflector-shared-";
const NAME_ATTEMPTS: usize = 16;

/// Errors while creating a [`SharedMemoryRegion`]
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// `XDG_RUNTIME_DIR` is not set
    #[error("XDG_RUNTIME_DIR is not set")]
    NoRuntimeDir,
    /// A region must hold at least one byte
    #[error("invalid region size {0}")]
    InvalidSize(usize),
    /// Creating, sizing or mapping the backing file failed
    #[error("shared memory creation failed: {0}")]
    Io(#[from] io::Error),
}

/// An anonymous file, mapped read/write
///
/// The file is created in the runtime directory and unlinked immediately, so that no other
/// process can open it by name: it is only reachable through its file descriptor, which is
/// what gets sent to the server with `wl_shm.create_pool`.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    ptr: NonNull<u8>,
    size: usize,
    fd: OwnedFd,
}

impl SharedMemoryRegion {
    /// Create a region of `size` bytes in `$XDG_RUNTIME_DIR`
    pub fn create(size: usize) -> Result<SharedMemoryRegion, RegionError> {
        let dir = std::env::var_os("XDG_RUNTIME_DIR")
            .filter(|dir| !dir.is_empty())
            .ok_or(RegionError::NoRuntimeDir)?;
        Self::create_in(Path::new(&dir), size)
    }

    /// Create a region of `size` bytes in `dir`
    pub fn create_in(dir: &Path, size: usize) -> Result<SharedMemoryRegion, RegionError> {
        if size == 0 {
            return Err(RegionError::InvalidSize(size));
        }
        let (path, fd) = create_unique(dir)?;
        // the name only served to get a file, nobody else should ever reach it
        unlink(&path).map_err(io::Error::from)?;
        trace!(path = ?path, size, "Created anonymous file");

        ftruncate(&fd, size as u64).map_err(io::Error::from)?;
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
        }
        .map_err(io::Error::from)?;
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(SharedMemoryRegion { ptr, size, fd })
    }

    /// Size of the region in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// The mapped memory
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the mapping lives as long as self and is `size` bytes long
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// The mapped memory, writable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: same as above, and we hold the only reference to the mapping
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }

    /// A duplicate of the backing descriptor, to be sent to the server
    pub fn try_clone_fd(&self) -> io::Result<OwnedFd> {
        self.fd.try_clone()
    }

    /// Check that a buffer with this layout fits in the region
    pub fn check_buffer(&self, data: &BufferData) -> Result<(), BufferError> {
        data.validate(self.size)
    }
}

impl AsFd for SharedMemoryRegion {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // unmapped first; the descriptor closes when `fd` drops right after
        let _ = unsafe { munmap(self.ptr.as_ptr().cast(), self.size) };
    }
}

fn create_unique(dir: &Path) -> io::Result<(PathBuf, OwnedFd)> {
    let mut rng = rand::thread_rng();
    for _ in 0..NAME_ATTEMPTS {
        let mut name = OsString::from(NAME_PREFIX);
        name.push((0..6).map(|_| rng.sample(Alphanumeric) as char).collect::<String>());
        let path = dir.join(name);
        match open(
            &path,
            OFlags::RDWR | OFlags::CREATE | OFlags::EXCL | OFlags::CLOEXEC,
            Mode::RUSR | Mode::WUSR,
        ) {
            Ok(fd) => return Ok((path, fd)),
            Err(Errno::EXIST) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no unique name for the anonymous file",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wayland::shm::Format;

    #[test]
    fn region_is_unlinked_and_sized() {
        let dir = tempfile::tempdir().unwrap();
        let mut region = SharedMemoryRegion::create_in(dir.path(), 4096).unwrap();
        assert_eq!(region.size(), 4096);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let stat = rustix::fs::fstat(&region).unwrap();
        assert_eq!(stat.st_size, 4096);

        region.as_mut_slice()[4095] = 0xAA;
        assert_eq!(region.as_slice()[4095], 0xAA);
    }

    #[test]
    fn empty_region_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SharedMemoryRegion::create_in(dir.path(), 0),
            Err(RegionError::InvalidSize(0))
        ));
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SharedMemoryRegion::create_in(&dir.path().join("missing"), 64),
            Err(RegionError::Io(_))
        ));
    }

    #[test]
    fn buffers_are_checked_against_the_region() {
        let dir = tempfile::tempdir().unwrap();
        let region = SharedMemoryRegion::create_in(dir.path(), 640 * 480 * 4).unwrap();
        let data = BufferData {
            offset: 0,
            width: 640,
            height: 480,
            stride: 640 * 4,
            format: Format::Xrgb8888,
        };
        assert!(region.check_buffer(&data).is_ok());
        assert!(region.check_buffer(&BufferData { offset: 4, ..data }).is_err());
    }
}
