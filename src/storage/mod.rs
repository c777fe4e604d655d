use num_integer::Integer;
use snafu::Snafu;
use std::io::BufReader;
use std::path::Path;

mod block_adapter_storage;
mod block_cache_storage;
mod block_transform_storage;
mod concat_storage;
mod io_storage;
mod linear_adapter_storage;
mod null_storage;
mod shared_storage;
mod slice_storage;
mod storage_io;
mod vec_storage;

pub use block_adapter_storage::BlockAdapterStorage;
pub use block_cache_storage::BlockCacheStorage;
pub use block_transform_storage::{
    block_transforms, AesCtrStorage, AesXtsStorage, BlockTransform, BlockTransformStorage,
};
pub use concat_storage::{ConcatStorage2, ConcatStorageN};
pub use io_storage::{FileRoStorage, FileRwStorage, RoIoStorage, RwIoStorage};
pub use linear_adapter_storage::LinearAdapterStorage;
pub use null_storage::NullStorage;
pub use shared_storage::SharedStorage;
pub use slice_storage::{SliceStorage, SliceStorageError};
pub use storage_io::StorageIo;
pub use vec_storage::VecStorage;

/// A random-access byte source.
///
/// Reads past the end of the storage return a short count instead of an
/// error; a read entirely past the end returns `Ok(0)`.
pub trait ReadableStorage: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn get_size(&self) -> u64;
}

pub trait Storage: ReadableStorage {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError>;
    fn flush(&self) -> Result<(), StorageError>;
    fn set_size(&self, new_size: u64) -> Result<(), StorageError>;
}

impl ReadableStorage for Box<dyn ReadableStorage> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        (**self).read(offset, buf)
    }

    fn get_size(&self) -> u64 {
        (**self).get_size()
    }
}

/// A source addressed in fixed-size blocks. Unlike [`ReadableStorage`],
/// reads must cover whole blocks (except the trailing one, which may be
/// shorter than the block size).
pub trait ReadableBlockStorage: Send + Sync {
    fn block_size(&self) -> u64;
    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError>;
    /// Size in bytes; does not have to be a multiple of the block size.
    fn get_size(&self) -> u64;

    fn read_block_bulk(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_size = self.block_size();
        let block_count = Integer::div_ceil(&(buf.len() as u64), &block_size);
        for i in 0..block_count {
            let buf = &mut buf[(i * block_size) as usize..];
            let read_size = std::cmp::min(block_size, buf.len() as u64);
            self.read_block(block_index + i, &mut buf[..read_size as usize])?;
        }
        Ok(())
    }
}

pub trait ReadableStorageExt: ReadableStorage {
    fn slice(self, offset: u64, size: u64) -> Result<SliceStorage<Self>, SliceStorageError>
    where
        Self: Sized,
    {
        SliceStorage::new(self, offset, size)
    }

    fn shared(self) -> SharedStorage<Self>
    where
        Self: Sized,
    {
        SharedStorage::new(self)
    }

    fn io(self) -> StorageIo<Self>
    where
        Self: Sized,
    {
        StorageIo::new(self)
    }

    fn buf_read(self) -> BufReader<StorageIo<Self>>
    where
        Self: Sized,
    {
        BufReader::new(self.io())
    }

    /// Like [`ReadableStorage::read`], but a short count is an error.
    fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let read = self.read(offset, buf)?;
        if read != buf.len() {
            return Err(StorageError::OutOfBounds {});
        }
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0; self.get_size() as usize];
        self.read_exact(0, &mut buf)?;
        Ok(buf)
    }

    fn copy_to<S: Storage>(&self, other: &S) -> Result<(), StorageError> {
        const BUFFER_SIZE: usize = 0x10000;
        let size = self.get_size();
        other.set_size(size)?;
        let mut buf = vec![0; BUFFER_SIZE];
        for offset in (0..size).step_by(BUFFER_SIZE) {
            let chunk = std::cmp::min(BUFFER_SIZE as u64, size - offset);
            self.read_exact(offset, &mut buf[..chunk as usize])?;
            other.write(offset, &buf[..chunk as usize])?;
        }
        Ok(())
    }

    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        self.copy_to(&FileRwStorage::create(path)?)
    }
}

pub trait ReadableBlockStorageExt: ReadableBlockStorage {
    fn block_count(&self) -> u64 {
        Integer::div_ceil(&self.get_size(), &self.block_size())
    }

    fn nth_block_size(&self, block_index: u64) -> u64 {
        assert!(block_index < self.block_count());
        if block_index == self.block_count() - 1 {
            // the trailing block may be short
            ((self.get_size() - 1) % self.block_size()) + 1
        } else {
            self.block_size()
        }
    }
}

impl<T: ReadableStorage + ?Sized> ReadableStorageExt for T {}
impl<T: ReadableBlockStorage> ReadableBlockStorageExt for T {}

/// Clamp a read request to the storage bounds. Returns the number of bytes
/// that can actually be served.
pub(crate) fn clamp_read_len(size: u64, offset: u64, buf_len: usize) -> usize {
    if offset >= size {
        0
    } else {
        std::cmp::min(buf_len as u64, size - offset) as usize
    }
}

#[derive(Snafu, Debug)]
pub enum StorageError {
    #[snafu(display("IO error during {}: {}", operation, source))]
    Io {
        source: std::io::Error,
        operation: &'static str,
    },
    #[snafu(display("Attempt to write to a read-only storage"))]
    Readonly {},
    #[snafu(display("Attempt to resize a fixed-size storage"))]
    FixedSize {},
    #[snafu(display("Attempt to access a storage out of bounds"))]
    OutOfBounds {},
    #[snafu(display("Block hash does not match the stored digest"))]
    HashMismatch {},
    #[snafu(display("A storage requiring aligned access was accessed with an unaligned offset"))]
    UnalignedAccess {},
}
