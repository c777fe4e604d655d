use crate::crypto::keyset::KeyAreaKeyIndex;
use crate::crypto::{EncryptedAesKey, EncryptedAesXtsKey};
use crate::hexstring::HexData;
use crate::ids::{RightsId, TitleId};
use binrw::{BinRead, BinWrite};
use std::fmt::Debug;

pub const BLOCK_SIZE: u64 = 0x200;

/// Logical role of a section, derived from the content type and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcaSectionType {
    /// ExeFS (PFS0 with the code and `main.npdm`)
    Code,
    /// RomFS for Program NCAs, PFS0 for Meta NCAs
    Data,
    Logo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaContentType {
    Program,
    Meta,
    Control,
    Manual,
    Data,
    PublicData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum DistributionType {
    Download,
    GameCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaEncryptionType {
    Auto,
    None,
    XtsOld,
    AesCtr,
    AesCtrEx,
    /// 14.0.0+; hash layers stay plaintext, data is AES-CTR
    AesCtrSkipLayerHash,
    /// 14.0.0+; hash layers stay plaintext, data is AES-CTR-EX
    AesCtrExSkipLayerHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaHashType {
    Auto,
    None,
    Sha256,
    Ivfc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcaFormatType {
    Romfs,
    Pfs0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct NcaSignature(pub HexData<0x100>);

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub enum NcaMagic {
    #[brw(magic = b"NCA0")]
    Nca0,
    #[brw(magic = b"NCA2")]
    Nca2,
    #[brw(magic = b"NCA3")]
    Nca3,
}

/// Offset expressed in 0x200-byte blocks, as the section table stores it.
#[derive(Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct BlockOffset(pub u32);

impl From<BlockOffset> for u64 {
    fn from(v: BlockOffset) -> Self {
        v.0 as u64 * BLOCK_SIZE
    }
}

impl From<u64> for BlockOffset {
    fn from(v: u64) -> Self {
        debug_assert_eq!(v % BLOCK_SIZE, 0);
        BlockOffset((v / BLOCK_SIZE) as u32)
    }
}

impl Debug for BlockOffset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0 as u64 * BLOCK_SIZE)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct SectionTableEntry {
    pub start: BlockOffset,
    pub end: BlockOffset,
    #[brw(pad_after = 0x7)]
    #[br(parse_with = crate::brw_utils::read_bool)]
    #[bw(write_with = crate::brw_utils::write_bool)]
    pub is_enabled: bool,
}

impl SectionTableEntry {
    pub fn size(&self) -> u64 {
        (self.end.0 - self.start.0) as u64 * BLOCK_SIZE
    }
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256Hash(pub HexData<0x20>);

impl Sha256Hash {
    pub fn compute(data: &[u8]) -> Self {
        use digest::Digest;
        let hash = sha2::Sha256::digest(data);
        Self(HexData(hash.into()))
    }

    pub fn verify(&self, data: &[u8]) -> Result<(), ()> {
        (Self::compute(data) == *self).then_some(()).ok_or(())
    }
}

/// The 0x100-byte key area at header offset 0x300.
///
/// For NCA2/NCA3 the first four 16-byte entries are AES-ECB-wrapped keys
/// (an XTS pair, the CTR key and the unused CTR-EX/HW keys); for NCA0 the
/// whole region is one RSA-2048-OAEP blob.
#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct NcaKeyArea(pub HexData<0x100>);

impl NcaKeyArea {
    pub fn encrypted_xts_key(&self) -> EncryptedAesXtsKey {
        EncryptedAesXtsKey(HexData(self.0 .0[..0x20].try_into().unwrap()))
    }

    pub fn encrypted_ctr_key(&self) -> EncryptedAesKey {
        EncryptedAesKey(HexData(self.0 .0[0x20..0x30].try_into().unwrap()))
    }

    pub fn as_rsa_blob(&self) -> &[u8; 0x100] {
        &self.0 .0
    }
}

/// NCA header, the first 0x400 bytes of the decrypted NCA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct NcaHeader {
    pub fixed_key_signature: NcaSignature,
    pub npdm_signature: NcaSignature,
    pub magic: NcaMagic,
    pub distribution_type: DistributionType,
    pub content_type: NcaContentType,
    pub key_generation_1: u8,
    pub key_area_key_index: KeyAreaKeyIndex,
    pub nca_size: u64,
    pub title_id: TitleId,
    pub content_index: u32,
    pub sdk_version: u32,
    #[brw(pad_after = 0xf)]
    pub key_generation_2: u8,
    pub rights_id: RightsId,
    pub section_table: [SectionTableEntry; 4],
    pub fs_header_hashes: [Sha256Hash; 4],
    pub key_area: NcaKeyArea,
}

impl NcaHeader {
    pub fn has_rights_id(&self) -> bool {
        !self.rights_id.is_empty()
    }

    /// The key generation is stored twice (0x206 and 0x220); the effective
    /// value is the larger one, and generations 0 and 1 both map to master
    /// key revision 0.
    pub fn master_key_revision(&self) -> u8 {
        std::cmp::max(self.key_generation_1, self.key_generation_2).saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256IntegrityInfoLevel {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct Sha256IntegrityInfo {
    pub master_hash: Sha256Hash,
    pub block_size: u32,
    pub level_count: u32,
    pub level_info: [Sha256IntegrityInfoLevel; 6],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct IvfcIntegrityInfoLevel {
    pub offset: u64,
    pub size: u64,
    /// log2 of the hash block size
    #[brw(pad_after = 4)]
    pub block_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(magic = b"IVFC")]
pub struct IvfcIntegrityInfo {
    pub version: u32,
    pub master_hash_size: u32,
    /// Includes the master hash as the last level, so the deepest data
    /// level is `level_count - 1`.
    pub level_count: u32,
    pub level_info: [IvfcIntegrityInfoLevel; 6],
    pub salt_source: HexData<0x20>,
    /// Allocated at the maximum hash size; only the first
    /// `master_hash_size` bytes are meaningful.
    pub master_hash: HexData<0x38>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[br(import(hash_type: NcaHashType))]
pub enum IntegrityInfo {
    #[br(pre_assert(hash_type == NcaHashType::None))]
    None,
    #[br(pre_assert(hash_type == NcaHashType::Sha256))]
    Sha256(Sha256IntegrityInfo),
    #[br(pre_assert(hash_type == NcaHashType::Ivfc))]
    Ivfc(IvfcIntegrityInfo),
}

/// The 0x10-byte header embedded in `PatchInfo` for each bucket tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
pub struct BucketTreeHeader {
    pub magic: u32,
    pub version: u32,
    pub entry_count: u32,
    pub reserved: u32,
}

impl BucketTreeHeader {
    pub const MAGIC: u32 = u32::from_le_bytes(*b"BKTR");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
pub struct PatchInfo {
    /// Indirect (base/patch relocation) bucket tree, offsets relative to
    /// the section start.
    pub relocation_tree_offset: u64,
    pub relocation_tree_size: u64,
    pub relocation_tree_header: BucketTreeHeader,
    /// AES-CTR-EX (per-extent counter generation) bucket tree.
    pub encryption_tree_offset: u64,
    pub encryption_tree_size: u64,
    pub encryption_tree_header: BucketTreeHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct SparseInfo {
    pub meta_offset: u64,
    pub meta_size: u64,
    pub meta_header: HexData<0x10>,
    pub physical_offset: u64,
    pub generation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct CompressionInfo {
    pub table_offset: u64,
    pub table_size: u64,
    pub table_header: HexData<0x10>,
}

/// Per-section metadata, one 0x200-byte record at 0x400 + 0x200·i.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct NcaFsHeader {
    pub version: u16,
    pub format_type: NcaFormatType,
    pub hash_type: NcaHashType,
    pub encryption_type: NcaEncryptionType,

    #[brw(pad_before = 0x3)]
    #[br(args(hash_type))]
    #[brw(pad_size_to = 0xf8)]
    pub integrity_info: IntegrityInfo,

    #[brw(pad_size_to = 0x40)]
    pub patch_info: PatchInfo,

    /// Upper 64 bits of the section AES-CTR counter, big-endian on the
    /// wire side of the nonce.
    pub upper_counter: u64,

    #[brw(pad_size_to = 0x30)]
    pub sparse_info: SparseInfo,

    #[brw(pad_size_to = 0x28)]
    #[brw(pad_after = 0x60)]
    pub compression_info: CompressionInfo,
}

impl NcaFsHeader {
    pub fn is_patch_section(&self) -> bool {
        self.patch_info.relocation_tree_size != 0
    }

    pub fn exists_sparse_layer(&self) -> bool {
        self.sparse_info.generation != 0
    }

    pub fn exists_compression_layer(&self) -> bool {
        self.compression_info.table_offset != 0 && self.compression_info.table_size != 0
    }

    /// The generation half of the counter: bytes 4..8 of the nonce, which
    /// AES-CTR-EX subsections override per extent.
    pub fn counter_generation(&self) -> u32 {
        (self.upper_counter & 0xFFFF_FFFF) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrw::{BinRead, BinWrite};
    use std::io::Cursor;

    fn roundtrip_fs_header(header: &NcaFsHeader) -> NcaFsHeader {
        // padding directives seek rather than write, so serialize into a
        // pre-sized record like the header codec does
        let mut buf = vec![0u8; 0x200];
        header.write(&mut Cursor::new(&mut buf[..])).unwrap();

        NcaFsHeader::read(&mut Cursor::new(&buf)).unwrap()
    }

    #[test]
    fn fs_header_layout() {
        let header = NcaFsHeader {
            version: 2,
            format_type: NcaFormatType::Pfs0,
            hash_type: NcaHashType::Sha256,
            encryption_type: NcaEncryptionType::AesCtr,
            integrity_info: IntegrityInfo::Sha256(Sha256IntegrityInfo {
                master_hash: Sha256Hash(HexData([0xAB; 0x20])),
                block_size: 0x1000,
                level_count: 2,
                level_info: [Sha256IntegrityInfoLevel { offset: 0, size: 0x40 }; 6],
            }),
            patch_info: PatchInfo::default(),
            upper_counter: 0x0123_4567_89AB_CDEF,
            sparse_info: SparseInfo {
                meta_offset: 0,
                meta_size: 0,
                meta_header: HexData::ZERO,
                physical_offset: 0,
                generation: 0,
            },
            compression_info: CompressionInfo {
                table_offset: 0,
                table_size: 0,
                table_header: HexData::ZERO,
            },
        };

        assert_eq!(roundtrip_fs_header(&header), header);
    }

    #[test]
    fn fs_header_counter_offset() {
        let header = NcaFsHeader {
            version: 2,
            format_type: NcaFormatType::Romfs,
            hash_type: NcaHashType::None,
            encryption_type: NcaEncryptionType::None,
            integrity_info: IntegrityInfo::None,
            patch_info: PatchInfo::default(),
            upper_counter: 0x1122_3344_5566_7788,
            sparse_info: SparseInfo {
                meta_offset: 0,
                meta_size: 0,
                meta_header: HexData::ZERO,
                physical_offset: 0,
                generation: 0,
            },
            compression_info: CompressionInfo {
                table_offset: 0,
                table_size: 0,
                table_header: HexData::ZERO,
            },
        };

        let mut bytes = vec![0u8; 0x200];
        header.write(&mut Cursor::new(&mut bytes[..])).unwrap();
        // the section counter lives at 0x140
        assert_eq!(&bytes[0x140..0x148], &0x1122_3344_5566_7788u64.to_le_bytes());
    }

    #[test]
    fn master_key_revision_prefers_larger_generation() {
        let mut header_bytes = vec![0u8; 0x400];
        header_bytes[0x200..0x204].copy_from_slice(b"NCA3");
        header_bytes[0x206] = 3; // key_generation_1
        header_bytes[0x220] = 5; // key_generation_2

        let header = NcaHeader::read(&mut Cursor::new(&header_bytes)).unwrap();
        assert_eq!(header.master_key_revision(), 4);

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), header_bytes);
    }
}
