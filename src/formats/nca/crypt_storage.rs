use crate::crypto::{AesKey, AesXtsKey};
use crate::formats::nca::bucket_tree::{BucketTree, SubsectionEntry};
use crate::formats::nca::patch_storage::AesCtrExStorage;
use crate::hexstring::HexData;
use crate::storage::block_transforms::{AesCtrBlockTransform, AesXtsBlockTransform};
use crate::storage::{
    AesCtrStorage, AesXtsStorage, BlockAdapterStorage, LinearAdapterStorage, ReadableStorage,
    StorageError,
};

/// The per-section decryption layer, selected by the FS header's encryption
/// type. Decrypts transparently on read; all variants are O(1)-seekable.
#[derive(Debug)]
pub enum NcaCryptStorage<S: ReadableStorage> {
    Plaintext(S),
    AesXts(LinearAdapterStorage<AesXtsStorage<BlockAdapterStorage<S>>>),
    AesCtr(LinearAdapterStorage<AesCtrStorage<BlockAdapterStorage<S>>>),
    AesCtrEx(AesCtrExStorage<S>),
}

/// The 128-bit AES-CTR nonce for an NCA section: the FS header counter in
/// the upper half, the absolute offset in AES blocks in the lower half,
/// both big-endian.
pub fn section_nonce(upper_counter: u64, absolute_offset: u64) -> HexData<0x10> {
    let mut nonce = [0; 0x10];
    nonce[..8].copy_from_slice(&upper_counter.to_be_bytes());
    nonce[8..].copy_from_slice(&(absolute_offset / 0x10).to_be_bytes());
    HexData(nonce)
}

impl<S: ReadableStorage> NcaCryptStorage<S> {
    pub fn new_plaintext(storage: S) -> Self {
        Self::Plaintext(storage)
    }

    /// Legacy NCA0/NCA2 XTS sections; the sector numbering continues the
    /// numbering of the whole file, so the base is the section start in
    /// 0x200 units.
    pub fn new_xts(storage: S, key: AesXtsKey, sector_base: u64) -> Self {
        let block_adapter = BlockAdapterStorage::new(storage, 0x200);
        let transform = AesXtsBlockTransform::new(key, sector_base);
        let xts = AesXtsStorage::new(block_adapter, transform);

        Self::AesXts(LinearAdapterStorage::new(xts))
    }

    pub fn new_ctr(storage: S, key: AesKey, upper_counter: u64, start_offset: u64) -> Self {
        // the block transform adds the in-section block index on top
        let nonce = section_nonce(upper_counter, start_offset);

        let block_adapter = BlockAdapterStorage::new(storage, 0x10);
        let transform = AesCtrBlockTransform::new(key, nonce);
        let aes_ctr = AesCtrStorage::new(block_adapter, transform);

        Self::AesCtr(LinearAdapterStorage::new(aes_ctr))
    }

    pub fn new_ctr_ex(
        storage: S,
        key: AesKey,
        upper_counter: u64,
        start_offset: u64,
        subsections: BucketTree<SubsectionEntry>,
    ) -> Self {
        Self::AesCtrEx(AesCtrExStorage::new(
            storage,
            key,
            upper_counter,
            start_offset,
            subsections,
        ))
    }
}

impl<S: ReadableStorage> ReadableStorage for NcaCryptStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.read(offset, buf),
            NcaCryptStorage::AesXts(storage) => storage.read(offset, buf),
            NcaCryptStorage::AesCtr(storage) => storage.read(offset, buf),
            NcaCryptStorage::AesCtrEx(storage) => storage.read(offset, buf),
        }
    }

    fn get_size(&self) -> u64 {
        match self {
            NcaCryptStorage::Plaintext(storage) => storage.get_size(),
            NcaCryptStorage::AesXts(storage) => storage.get_size(),
            NcaCryptStorage::AesCtr(storage) => storage.get_size(),
            NcaCryptStorage::AesCtrEx(storage) => storage.get_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ReadableStorageExt, VecStorage};

    #[test]
    fn ctr_storage_decrypts_at_unaligned_offsets() {
        let key = AesKey([0x11; 0x10]);
        let upper_counter = 0xDEAD_BEEF_0000_0001;
        let start_offset = 0x200 * 7;

        let plain: Vec<u8> = (0..0x100u32).map(|i| i as u8).collect();
        let mut cipher = plain.clone();
        key.encrypt_ctr(&mut cipher, &section_nonce(upper_counter, start_offset).0);

        let storage =
            NcaCryptStorage::new_ctr(VecStorage::new(cipher), key, upper_counter, start_offset);

        assert_eq!(storage.read_all().unwrap(), plain);

        let mut sub = [0u8; 0x21];
        storage.read_exact(0x33, &mut sub).unwrap();
        assert_eq!(&sub[..], &plain[0x33..0x54]);
    }

    #[test]
    fn xts_storage_decrypts_sectors() {
        let key = AesXtsKey([0x77; 0x20]);
        let sector_base = 4;

        let plain = vec![0x3Cu8; 0x600];
        let mut cipher = plain.clone();
        key.encrypt(&mut cipher, sector_base, 0x200);

        let storage = NcaCryptStorage::new_xts(VecStorage::new(cipher), key, sector_base);
        assert_eq!(storage.read_all().unwrap(), plain);
    }
}
