use crate::formats::nca::verification_storage::{
    IntegrityCheckLevel, IntegrityStorageType, DIGEST_SIZE,
};
use crate::storage::{
    ReadableBlockStorage, ReadableBlockStorageExt, ReadableStorage, ReadableStorageExt,
    StorageError,
};
use digest::Digest;
use sha2::Sha256;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BlockStatus {
    Unchecked,
    Invalid,
    Valid,
}

/// One level of a hash tree: a block storage whose every block is checked
/// against a digest read from the level above (`hash_storage`).
///
/// Verification is lazy and memoized: a block is hashed the first time it is
/// read, and the verdict sticks for the lifetime of the storage.
pub struct HashTreeLevelStorage<S: ReadableBlockStorage> {
    storage: S,
    hash_storage: Box<dyn ReadableStorage>,
    level: IntegrityCheckLevel,
    ty: IntegrityStorageType,
    block_statuses: Mutex<Vec<BlockStatus>>,
}

impl<S: ReadableBlockStorage + std::fmt::Debug> std::fmt::Debug for HashTreeLevelStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashTreeLevelStorage")
            .field("storage", &self.storage)
            .field("level", &self.level)
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

impl<S: ReadableBlockStorage> HashTreeLevelStorage<S> {
    pub fn new(
        storage: S,
        hash_storage: Box<dyn ReadableStorage>,
        level: IntegrityCheckLevel,
        ty: IntegrityStorageType,
    ) -> Self {
        let block_count = storage.block_count();
        let block_statuses = vec![BlockStatus::Unchecked; block_count as usize];

        Self {
            storage,
            hash_storage,
            level,
            ty,
            block_statuses: Mutex::new(block_statuses),
        }
    }
}

enum BlockBuffer<'a> {
    Borrowed(&'a mut [u8]),
    Owned(Vec<u8>),
}

impl Deref for BlockBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl DerefMut for BlockBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            BlockBuffer::Borrowed(buf) => buf,
            BlockBuffer::Owned(buf) => buf,
        }
    }
}

impl<S: ReadableBlockStorage> ReadableBlockStorage for HashTreeLevelStorage<S> {
    fn block_size(&self) -> u64 {
        self.storage.block_size()
    }

    fn read_block(&self, block_index: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let block_size = self.storage.block_size();
        let current_block_size = self.nth_block_size(block_index);

        // a partial request still hashes the whole block, so stage it
        let mut block_buf = if buf.len() as u64 == block_size {
            BlockBuffer::Borrowed(buf)
        } else {
            BlockBuffer::Owned(vec![0; block_size as usize])
        };

        self.storage
            .read_block(block_index, &mut block_buf[..current_block_size as usize])?;

        if self.level == IntegrityCheckLevel::None {
            if let BlockBuffer::Owned(block_buf) = block_buf {
                buf.copy_from_slice(&block_buf[..buf.len()]);
            }
            return Ok(());
        }

        let mut block_statuses = self.block_statuses.lock().unwrap();
        let block_status = &mut block_statuses[block_index as usize];

        if *block_status == BlockStatus::Unchecked {
            let bytes_to_hash = match self.ty {
                // HierarchicalSha256 hashes the trailing block unpadded
                IntegrityStorageType::HierarchicalSha256 => current_block_size,
                // IVFC pads it with zeros up to the block size
                IntegrityStorageType::Ivfc => {
                    block_buf[current_block_size as usize..].fill(0);
                    block_size
                }
            };

            let hash = Sha256::digest(&block_buf[..bytes_to_hash as usize]);
            let mut expected_hash = [0; DIGEST_SIZE];
            self.hash_storage
                .read_exact(block_index * DIGEST_SIZE as u64, &mut expected_hash)?;

            *block_status = if hash.as_slice() == expected_hash {
                BlockStatus::Valid
            } else {
                BlockStatus::Invalid
            };
        }

        if *block_status == BlockStatus::Invalid {
            match self.level {
                IntegrityCheckLevel::None => {}
                IntegrityCheckLevel::ErrorOnInvalid => {
                    return Err(StorageError::HashMismatch {});
                }
                IntegrityCheckLevel::Warn => {
                    warn!(block_index, "hash mismatch in integrity-verified storage");
                }
                IntegrityCheckLevel::IgnoreOnInvalid => {
                    // serve zeros in place of the untrusted data
                    block_buf[..current_block_size as usize].fill(0);
                }
            }
        }

        if let BlockBuffer::Owned(block_buf) = block_buf {
            buf.copy_from_slice(&block_buf[..buf.len()]);
        }
        Ok(())
    }

    fn get_size(&self) -> u64 {
        self.storage.get_size()
    }
}
