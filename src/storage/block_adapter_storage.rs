use crate::storage::{
    ReadableBlockStorage, ReadableStorage, ReadableStorageExt, Storage, StorageError,
};

/// Exposes a linear storage as a block storage with a chosen block size.
#[derive(Debug)]
pub struct BlockAdapterStorage<S: ReadableStorage> {
    storage: S,
    block_size: u64,
}

impl<S: ReadableStorage> BlockAdapterStorage<S> {
    pub fn new(storage: S, block_size: u64) -> Self {
        Self {
            storage,
            block_size,
        }
    }
}

impl<S: ReadableStorage> ReadableBlockStorage for BlockAdapterStorage<S> {
    fn block_size(&self) -> u64 {
        self.block_size
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        assert!(
            buf.len() as u64 <= self.block_size,
            "Read must not span multiple blocks"
        );
        let offset = block_index * self.block_size;
        self.storage.read_exact(offset, buf)
    }

    fn get_size(&self) -> u64 {
        self.storage.get_size()
    }

    fn read_block_bulk(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        assert_eq!(
            buf.len() as u64 % self.block_size,
            0,
            "Only full blocks can be read in bulk"
        );
        let offset = block_index * self.block_size;
        self.storage.read_exact(offset, buf)
    }
}

/// Writing side, used by the few writable sinks (e.g. saving a built NCA).
impl<S: Storage> BlockAdapterStorage<S> {
    pub fn write_block(&self, block_index: u64, buf: &[u8]) -> Result<(), StorageError> {
        assert!(
            buf.len() as u64 <= self.block_size,
            "Write must not span multiple blocks"
        );
        let offset = block_index * self.block_size;
        self.storage.write(offset, buf)
    }
}
