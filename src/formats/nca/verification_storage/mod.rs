use crate::formats::nca::structs::{IvfcIntegrityInfo, Sha256IntegrityInfo};
use crate::storage::{
    BlockAdapterStorage, BlockCacheStorage, LinearAdapterStorage, ReadableStorage,
    ReadableStorageExt, SharedStorage, SliceStorage, StorageError, VecStorage,
};
use snafu::Snafu;

mod integrity_verification_level_storage;
pub use integrity_verification_level_storage::HashTreeLevelStorage;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntegrityStorageType {
    HierarchicalSha256,
    Ivfc,
}

/// Strictness of on-read verification.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntegrityCheckLevel {
    /// No hashing performed.
    None,
    /// Bad blocks read as zeros and are remembered as invalid.
    IgnoreOnInvalid,
    /// Bad blocks are logged and served as-is.
    Warn,
    /// The first bad block fails the read with a hash mismatch.
    ErrorOnInvalid,
}

/// Outcome of a full-section verification sweep.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Validity {
    Valid,
    Invalid,
    Unchecked,
}

pub(crate) const DIGEST_SIZE: usize = 0x20;
/// Hash-table blocks kept decrypted+verified in the LRU.
const HASH_CACHE_BLOCKS: u64 = 0x80;

#[derive(Snafu, Debug)]
pub enum VerificationStorageError {
    #[snafu(display("Hash level {} lies outside the section", index))]
    LevelBounds {
        index: usize,
        source: crate::storage::SliceStorageError,
    },
    #[snafu(display("Unsupported master hash size {:#x}", size))]
    MasterHashSize { size: u32 },
    #[snafu(display("Unsupported hash level count {}", count))]
    LevelCount { count: u32 },
}

#[derive(Debug, Copy, Clone)]
struct LevelDesc {
    offset: u64,
    size: u64,
    block_size: u64,
}

type DataLevel<S> =
    LinearAdapterStorage<HashTreeLevelStorage<BlockAdapterStorage<SliceStorage<SharedStorage<S>>>>>;

/// The integrity layer over a decrypted section: either a passthrough (hash
/// type `None`) or a chain of hash-tree levels ending in the in-header
/// master hash.
///
/// The chain is built bottom-up, so reads validate top-down on demand: a
/// data block pulls its digest from the level above, whose block pulls its
/// own digest from the level above that, up to the master hash.
#[derive(Debug)]
pub enum NcaVerificationStorage<S: ReadableStorage> {
    Unverified(S),
    HashTree(DataLevel<S>),
}

impl<S: ReadableStorage + 'static> NcaVerificationStorage<S> {
    pub fn new_unverified(storage: S) -> Self {
        Self::Unverified(storage)
    }

    /// Two-level hierarchical SHA-256, the PFS0 scheme: one hash table
    /// level covering the data at `block_size` granularity, master hash
    /// over the whole table.
    pub fn new_sha256_verification_storage(
        storage: S,
        info: &Sha256IntegrityInfo,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Self, VerificationStorageError> {
        if info.level_count != 2 {
            return Err(VerificationStorageError::LevelCount {
                count: info.level_count,
            });
        }

        let levels = [
            LevelDesc {
                offset: info.level_info[0].offset,
                size: info.level_info[0].size,
                // the hash table is validated as a single block
                block_size: info.level_info[0].size,
            },
            LevelDesc {
                offset: info.level_info[1].offset,
                size: info.level_info[1].size,
                block_size: info.block_size as u64,
            },
        ];

        Self::build(
            storage,
            &info.master_hash.0 .0,
            &levels,
            integrity_level,
            IntegrityStorageType::HierarchicalSha256,
        )
    }

    /// Multi-level IVFC, the RomFS scheme. `info.level_count` includes the
    /// master hash, so `level_count - 1` on-disk levels are chained.
    pub fn new_ivfc_verification_storage(
        storage: S,
        info: &IvfcIntegrityInfo,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Self, VerificationStorageError> {
        if info.master_hash_size != DIGEST_SIZE as u32 {
            return Err(VerificationStorageError::MasterHashSize {
                size: info.master_hash_size,
            });
        }
        let level_count = info.level_count.wrapping_sub(1) as usize;
        if level_count == 0 || level_count > 6 {
            return Err(VerificationStorageError::LevelCount {
                count: info.level_count,
            });
        }

        let levels: Vec<LevelDesc> = info.level_info[..level_count]
            .iter()
            .map(|l| LevelDesc {
                offset: l.offset,
                size: l.size,
                block_size: 1u64 << l.block_size,
            })
            .collect();

        let master_hash: [u8; DIGEST_SIZE] = info.master_hash.0[..DIGEST_SIZE]
            .try_into()
            .expect("BUG: master hash slice size");

        Self::build(
            storage,
            &master_hash,
            &levels,
            integrity_level,
            IntegrityStorageType::Ivfc,
        )
    }

    fn build(
        storage: S,
        master_hash: &[u8; DIGEST_SIZE],
        levels: &[LevelDesc],
        integrity_level: IntegrityCheckLevel,
        ty: IntegrityStorageType,
    ) -> Result<Self, VerificationStorageError> {
        let storage = storage.shared();

        // hash levels chain up to the master hash; each gets a block cache
        // since every data block below re-reads it
        let mut hashes: Box<dyn ReadableStorage> =
            Box::new(VecStorage::new(master_hash.to_vec()));
        for (index, level) in levels[..levels.len() - 1].iter().enumerate() {
            let data = SliceStorage::new(storage.clone(), level.offset, level.size)
                .map_err(|source| VerificationStorageError::LevelBounds { index, source })?;
            let data = BlockCacheStorage::new(
                BlockAdapterStorage::new(data, level.block_size),
                HASH_CACHE_BLOCKS,
            );
            hashes = Box::new(LinearAdapterStorage::new(HashTreeLevelStorage::new(
                data,
                hashes,
                integrity_level,
                ty,
            )));
        }

        let data_level = levels[levels.len() - 1];
        let data = SliceStorage::new(storage, data_level.offset, data_level.size).map_err(
            |source| VerificationStorageError::LevelBounds {
                index: levels.len() - 1,
                source,
            },
        )?;
        let data = BlockAdapterStorage::new(data, data_level.block_size);

        Ok(Self::HashTree(LinearAdapterStorage::new(
            HashTreeLevelStorage::new(data, hashes, integrity_level, ty),
        )))
    }

    /// Reads every data block once, reporting whether the whole section
    /// checks out, without materializing the content. Mismatches are
    /// detected through [`StorageError::HashMismatch`], so this must run on
    /// a storage built with [`IntegrityCheckLevel::ErrorOnInvalid`].
    pub fn validate(&self) -> Result<Validity, StorageError> {
        if matches!(self, Self::Unverified(_)) {
            return Ok(Validity::Unchecked);
        }

        const CHUNK: usize = 0x10000;
        let mut buf = vec![0; CHUNK];
        let size = self.get_size();
        for offset in (0..size).step_by(CHUNK) {
            let len = std::cmp::min(CHUNK as u64, size - offset) as usize;
            match self.read(offset, &mut buf[..len]) {
                Ok(_) => {}
                Err(StorageError::HashMismatch {}) => return Ok(Validity::Invalid),
                Err(e) => return Err(e),
            }
        }
        Ok(Validity::Valid)
    }
}

impl<S: ReadableStorage> ReadableStorage for NcaVerificationStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self {
            Self::Unverified(storage) => storage.read(offset, buf),
            Self::HashTree(storage) => storage.read(offset, buf),
        }
    }

    fn get_size(&self) -> u64 {
        match self {
            Self::Unverified(storage) => storage.get_size(),
            Self::HashTree(storage) => storage.get_size(),
        }
    }
}
