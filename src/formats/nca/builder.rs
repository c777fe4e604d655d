//! Assembling new NCAs: the base+update merger and the fresh-section
//! builders it relies on.
//!
//! The output is a lazy storage: header and section bytes are produced on
//! demand, so building never materializes the whole archive.

use binrw::BinWrite;
use digest::Digest;
use sha2::Sha256;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;
use tracing::info;

use crate::crypto::keyset::KeySet;
use crate::filesystem::{ReadableFile, ReadableFileSystem};
use crate::formats::cnmt::{CnmtParseError, NcmContentType, PackagedContentInfo, PackagedContentMeta};
use crate::formats::nca::structs::{
    IntegrityInfo, IvfcIntegrityInfo, IvfcIntegrityInfoLevel, NcaContentType, NcaEncryptionType,
    NcaFormatType, NcaFsHeader, NcaHashType, NcaHeader, NcaMagic, PatchInfo, SectionTableEntry,
    Sha256Hash, Sha256IntegrityInfo, Sha256IntegrityInfoLevel, SparseInfo, CompressionInfo,
    BLOCK_SIZE,
};
use crate::formats::nca::{Nca, NcaError, ALL_HEADERS_SIZE};
use crate::formats::pfs::PartitionFsBuilder;
use crate::hexstring::HexData;
use crate::ids::NcaId;
use crate::storage::{
    ConcatStorageN, NullStorage, ReadableStorage, ReadableStorageExt, StorageError, VecStorage,
};

#[derive(Snafu, Debug)]
pub enum BuildError {
    #[snafu(display("Section {} was already added to the builder", index))]
    AlreadyAdded { index: usize },
    #[snafu(display("Section index {} out of range", index))]
    SectionIndex { index: usize },
    #[snafu(display("Build precondition violated: {}", what))]
    PreconditionViolation { what: &'static str },
    #[snafu(display("Missing a key required to build the NCA"))]
    MissingKey {
        source: crate::crypto::keyset::MissingKeyError,
    },
    #[snafu(display("Failed to open an input NCA section"))]
    Nca { source: NcaError },
    #[snafu(display("Failed to read an input storage"))]
    Storage { source: StorageError },
    #[snafu(display("Failed to rewrite the CNMT"))]
    Cnmt { source: CnmtParseError },
}

/// The storage type a finished build seals into.
pub type BuiltNcaStorage = ConcatStorageN<Box<dyn ReadableStorage>>;

/// Assembles an NCA3 from finished section images.
///
/// Lifecycle is `from_header` (copies identity and signatures from a
/// donor), `add_section` per emitted section, then `build` which lays the
/// sections out, finalizes the FS-header hashes and re-encrypts the
/// header. Adding the same index twice is refused.
pub struct NcaBuilder {
    header: NcaHeader,
    fs_headers: [Option<NcaFsHeader>; 4],
    sections: [Option<Box<dyn ReadableStorage>>; 4],
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

impl NcaBuilder {
    /// Seeds the builder from an existing header. Signatures and metadata
    /// are carried verbatim; the section table, hashes and size are
    /// recomputed by [`build`](Self::build). The signatures therefore no
    /// longer match the new header bytes: consoles reject such files, and
    /// the open-side verdict will report them `Invalid`.
    pub fn from_header(donor: &NcaHeader) -> Self {
        let mut header = *donor;
        header.magic = NcaMagic::Nca3;
        header.nca_size = 0;
        header.section_table = [SectionTableEntry {
            start: 0u64.into(),
            end: 0u64.into(),
            is_enabled: false,
        }; 4];
        header.fs_header_hashes = [Sha256Hash(HexData::ZERO); 4];

        Self {
            header,
            fs_headers: [None; 4],
            sections: [None, None, None, None],
        }
    }

    /// Stages a section image. The FS header is adopted with its
    /// encryption forced off and any patch info wiped: the emitted section
    /// is self-contained plaintext.
    pub fn add_section(
        &mut self,
        index: usize,
        mut fs_header: NcaFsHeader,
        storage: Box<dyn ReadableStorage>,
    ) -> Result<(), BuildError> {
        if index >= 4 {
            return Err(BuildError::SectionIndex { index });
        }
        if self.sections[index].is_some() {
            return Err(BuildError::AlreadyAdded { index });
        }

        fs_header.encryption_type = NcaEncryptionType::None;
        fs_header.patch_info = PatchInfo::default();

        self.fs_headers[index] = Some(fs_header);
        self.sections[index] = Some(storage);
        Ok(())
    }

    /// Finalizes the archive: assigns section entries, recomputes the
    /// FS-header hash array, encrypts the header and seals everything
    /// into one lazy storage.
    pub fn build(self, key_set: &KeySet) -> Result<BuiltNcaStorage, BuildError> {
        let mut header = self.header;
        let mut parts: Vec<Box<dyn ReadableStorage>> = Vec::new();

        let mut offset = ALL_HEADERS_SIZE as u64;
        for (index, section) in self.sections.into_iter().enumerate() {
            let Some(section) = section else {
                continue;
            };
            let size = section.get_size();
            let aligned = align_up(size, BLOCK_SIZE);

            header.section_table[index] = SectionTableEntry {
                start: offset.into(),
                end: (offset + aligned).into(),
                is_enabled: true,
            };

            parts.push(section);
            if aligned > size {
                parts.push(Box::new(NullStorage::new(aligned - size)));
            }
            offset += aligned;
        }
        header.nca_size = offset;

        let mut header_block = vec![0u8; ALL_HEADERS_SIZE];

        for (index, fs_header) in self.fs_headers.iter().enumerate() {
            let Some(fs_header) = fs_header else {
                continue;
            };
            let region = &mut header_block[0x400 + 0x200 * index..][..0x200];
            let mut cur = Cursor::new(&mut *region);
            fs_header
                .write(&mut cur)
                .expect("BUG: FS header serialization failed");
            header.fs_header_hashes[index] = Sha256Hash::compute(region);
        }

        {
            let region = &mut header_block[..0x400];
            let mut cur = Cursor::new(&mut *region);
            header
                .write(&mut cur)
                .expect("BUG: NCA header serialization failed");
        }

        let key = key_set.header_key().context(MissingKeySnafu)?;
        key.encrypt(&mut header_block[..0x400], 0, 0x200);
        key.encrypt(&mut header_block[0x400..], 2, 0x200);

        parts.insert(0, Box::new(VecStorage::new(header_block)));

        info!(size = offset, "sealed NCA build");
        Ok(ConcatStorageN::new(parts))
    }
}

/// Lays out a fresh hierarchical-SHA-256 section: hash table first, data
/// after it, master hash over the table. Returns the section image and
/// the integrity info describing it.
pub fn build_sha256_section(content: &[u8], block_size: u32) -> (Vec<u8>, Sha256IntegrityInfo) {
    let mut hash_table = Vec::new();
    for block in content.chunks(block_size as usize) {
        // the trailing block is hashed unpadded
        hash_table.extend_from_slice(&Sha256::digest(block));
    }
    if content.is_empty() {
        hash_table.extend_from_slice(&Sha256::digest([]));
    }

    let data_offset = align_up(hash_table.len() as u64, 0x20);
    let mut section = vec![0u8; data_offset as usize + content.len()];
    section[..hash_table.len()].copy_from_slice(&hash_table);
    section[data_offset as usize..].copy_from_slice(content);

    let mut level_info = [Sha256IntegrityInfoLevel { offset: 0, size: 0 }; 6];
    level_info[0] = Sha256IntegrityInfoLevel {
        offset: 0,
        size: hash_table.len() as u64,
    };
    level_info[1] = Sha256IntegrityInfoLevel {
        offset: data_offset,
        size: content.len() as u64,
    };

    let info = Sha256IntegrityInfo {
        master_hash: Sha256Hash::compute(&hash_table),
        block_size,
        level_count: 2,
        level_info,
    };

    (section, info)
}

/// Lays out a fresh IVFC section: hash levels from the top of the tree
/// down, data level last, every level hashed in zero-padded blocks of
/// `1 << block_size_log2`.
pub fn build_ivfc_section(content: &[u8], block_size_log2: u32) -> (Vec<u8>, IvfcIntegrityInfo) {
    let block_size = 1usize << block_size_log2;

    fn hash_level(data: &[u8], block_size: usize) -> Vec<u8> {
        let mut hashes = Vec::new();
        let mut padded = vec![0u8; block_size];
        for block in data.chunks(block_size) {
            padded[..block.len()].copy_from_slice(block);
            padded[block.len()..].fill(0);
            hashes.extend_from_slice(&Sha256::digest(&padded));
        }
        if data.is_empty() {
            hashes.extend_from_slice(&Sha256::digest(&padded));
        }
        hashes
    }

    // bottom-up: hash the data, then each hash level, until one block holds
    // the whole level
    let mut levels = vec![content.to_vec()];
    loop {
        let top = hash_level(levels.last().unwrap(), block_size);
        let done = top.len() <= block_size;
        levels.push(top);
        if done {
            break;
        }
    }
    levels.reverse(); // top hash level first, data last

    let master_hash = {
        let mut padded = vec![0u8; block_size];
        padded[..levels[0].len()].copy_from_slice(&levels[0]);
        Sha256::digest(&padded)
    };

    let mut level_info = [IvfcIntegrityInfoLevel {
        offset: 0,
        size: 0,
        block_size: block_size_log2,
    }; 6];
    let mut section = Vec::new();
    for (index, level) in levels.iter().enumerate() {
        let offset = align_up(section.len() as u64, block_size as u64);
        section.resize(offset as usize, 0);
        section.extend_from_slice(level);
        level_info[index] = IvfcIntegrityInfoLevel {
            offset,
            size: level.len() as u64,
            block_size: block_size_log2,
        };
    }

    let mut master = [0u8; 0x38];
    master[..0x20].copy_from_slice(&master_hash);

    let info = IvfcIntegrityInfo {
        version: 0x2_0000,
        master_hash_size: 0x20,
        level_count: levels.len() as u32 + 1,
        level_info,
        salt_source: HexData::ZERO,
        master_hash: HexData(master),
    };

    (section, info)
}

fn blank_fs_header() -> NcaFsHeader {
    NcaFsHeader {
        version: 2,
        format_type: NcaFormatType::Pfs0,
        hash_type: NcaHashType::None,
        encryption_type: NcaEncryptionType::None,
        integrity_info: IntegrityInfo::None,
        patch_info: PatchInfo::default(),
        upper_counter: 0,
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
    }
}

/// FS header for a freshly built SHA-256 PFS0 section.
pub fn pfs_fs_header(info: Sha256IntegrityInfo) -> NcaFsHeader {
    NcaFsHeader {
        format_type: NcaFormatType::Pfs0,
        hash_type: NcaHashType::Sha256,
        integrity_info: IntegrityInfo::Sha256(info),
        ..blank_fs_header()
    }
}

/// FS header for a freshly built IVFC RomFS section.
pub fn romfs_fs_header(info: IvfcIntegrityInfo) -> NcaFsHeader {
    NcaFsHeader {
        format_type: NcaFormatType::Romfs,
        hash_type: NcaHashType::Ivfc,
        integrity_info: IntegrityInfo::Ivfc(info),
        ..blank_fs_header()
    }
}

/// Merges a base Program NCA with its update into a self-contained NCA:
/// the Logo from the base, the ExeFS from the patch, and the RomFS as the
/// bucket-tree composition of both. Section contents stay bit-exact, so
/// the patch's hash tables remain valid and are carried through.
pub fn build_merged<B, P>(
    key_set: &KeySet,
    base: &Nca<B>,
    patch: &Nca<P>,
) -> Result<BuiltNcaStorage, BuildError>
where
    B: ReadableStorage + 'static,
    P: ReadableStorage + 'static,
{
    if base.content_type() != NcaContentType::Program
        || patch.content_type() != NcaContentType::Program
    {
        return Err(BuildError::PreconditionViolation {
            what: "merging requires two Program NCAs",
        });
    }

    let mut builder = NcaBuilder::from_header(base.header());

    // ExeFS comes from the patch wholesale
    let exefs = patch
        .get_raw_decrypted_section_storage(0)
        .context(NcaSnafu)?
        .ok_or(BuildError::PreconditionViolation {
            what: "patch NCA has no ExeFS section",
        })?;
    let exefs_header = *patch.fs_header(0).expect("BUG: section without FS header");
    builder.add_section(0, exefs_header, Box::new(exefs))?;

    // RomFS is the patched composition over the base
    let romfs = match patch.get_patched_section_storage(1, base) {
        Ok(Some(storage)) => storage,
        Ok(None) => {
            return Err(BuildError::PreconditionViolation {
                what: "patch NCA has no RomFS section",
            })
        }
        Err(NcaError::NotAPatchSection { .. }) => {
            return Err(BuildError::PreconditionViolation {
                what: "patch RomFS carries no patch info",
            })
        }
        Err(source) => return Err(BuildError::Nca { source }),
    };
    let romfs_header = *patch.fs_header(1).expect("BUG: section without FS header");
    builder.add_section(1, romfs_header, Box::new(romfs))?;

    // Logo comes from the base, when present
    if let Some(logo) = base
        .get_raw_decrypted_section_storage(2)
        .context(NcaSnafu)?
    {
        let logo_header = *base.fs_header(2).expect("BUG: section without FS header");
        builder.add_section(2, logo_header, Box::new(logo))?;
    }

    info!(
        title_id = %base.header().title_id,
        "merging base and update NCA"
    );
    builder.build(key_set)
}

/// Computes the CNMT content record for a produced NCA: streaming SHA-256
/// over the whole image, content id from the first half of the digest.
pub fn packaged_content_info_for(
    storage: &impl ReadableStorage,
    ty: NcmContentType,
) -> Result<PackagedContentInfo, StorageError> {
    const CHUNK: usize = 0x10000;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    let size = storage.get_size();
    for offset in (0..size).step_by(CHUNK) {
        let len = std::cmp::min(CHUNK as u64, size - offset) as usize;
        storage.read_exact(offset, &mut buf[..len])?;
        hasher.update(&buf[..len]);
    }
    let hash: [u8; 0x20] = hasher.finalize().into();

    Ok(PackagedContentInfo {
        hash: HexData(hash),
        content_info: crate::formats::cnmt::ContentInfo {
            id: NcaId(hash[..0x10].try_into().unwrap()),
            size,
            content_attributes: 0,
            ty,
            id_offset: 0,
        },
    })
}

/// Rebuilds a Meta NCA around a rewritten CNMT: the base Meta NCA's
/// `.cnmt` is reparsed, its content-entry list replaced with `contents`,
/// and the result packed into a fresh SHA-256 PFS0 section.
pub fn patch_content_meta<S>(
    key_set: &KeySet,
    base_meta: &Nca<S>,
    contents: Vec<PackagedContentInfo>,
) -> Result<BuiltNcaStorage, BuildError>
where
    S: ReadableStorage + 'static,
{
    use crate::filesystem::{Entry, ReadableDirectory};

    if base_meta.content_type() != NcaContentType::Meta {
        return Err(BuildError::PreconditionViolation {
            what: "meta patching requires a Meta NCA",
        });
    }

    let fs = base_meta
        .get_section_fs(0, crate::formats::nca::IntegrityCheckLevel::ErrorOnInvalid)
        .context(NcaSnafu)?
        .ok_or(BuildError::PreconditionViolation {
            what: "Meta NCA has no data section",
        })?;

    let cnmt_file = fs
        .root()
        .entries()
        .filter_map(|e| match e {
            Entry::File(f) => Some(f),
            Entry::Directory(_) => None,
        })
        .find(|f| f.name().ends_with(".cnmt"))
        .ok_or(BuildError::PreconditionViolation {
            what: "Meta NCA carries no .cnmt entry",
        })?;

    let cnmt_name = cnmt_file.name().to_string();
    let cnmt_data = cnmt_file
        .storage()
        .map_err(|_| BuildError::PreconditionViolation {
            what: "malformed PFS0 in Meta NCA",
        })?
        .read_all()
        .context(StorageSnafu)?;

    let mut meta = PackagedContentMeta::parse(&cnmt_data).context(CnmtSnafu)?;
    meta.replace_content_entries(contents);

    let mut pfs = PartitionFsBuilder::new();
    pfs.add_file(cnmt_name, meta.to_bytes());
    let (section, integrity) = build_sha256_section(&pfs.build(), 0x1000);

    let mut builder = NcaBuilder::from_header(base_meta.header());
    builder.add_section(0, pfs_fs_header(integrity), Box::new(VecStorage::new(section)))?;
    builder.build(key_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_section_verifies_against_its_own_info() {
        let content = vec![0x5Au8; 0x2800];
        let (section, info) = build_sha256_section(&content, 0x1000);

        // data is recoverable at the recorded offset
        let data_at = info.level_info[1].offset as usize;
        assert_eq!(&section[data_at..], &content[..]);

        // every stored digest matches its block
        for (i, block) in content.chunks(0x1000).enumerate() {
            let digest = &section[i * 0x20..(i + 1) * 0x20];
            assert_eq!(digest, Sha256::digest(block).as_slice());
        }

        // master hash covers the table
        let table = &section[..info.level_info[0].size as usize];
        assert_eq!(
            info.master_hash.0 .0,
            <[u8; 0x20]>::from(Sha256::digest(table))
        );
    }

    #[test]
    fn ivfc_levels_chain_up_to_the_master_hash() {
        let content = vec![0xC3u8; 0x3456];
        let (section, info) = build_ivfc_section(&content, 12);

        let data_levels = info.level_count as usize - 1;
        assert!(data_levels >= 2);

        // data level content round-trips
        let data = info.level_info[data_levels - 1];
        assert_eq!(
            &section[data.offset as usize..][..data.size as usize],
            &content[..]
        );

        // the first data block's digest sits at the start of the deepest
        // hash level
        let hash_level = info.level_info[data_levels - 2];
        let mut padded = vec![0u8; 0x1000];
        padded[..0x1000].copy_from_slice(&content[..0x1000]);
        assert_eq!(
            &section[hash_level.offset as usize..][..0x20],
            Sha256::digest(&padded).as_slice()
        );
    }

    #[test]
    fn builder_rejects_duplicate_sections() {
        let donor: NcaHeader = {
            // a zeroed header with valid enums is enough for the builder
            let mut bytes = vec![0u8; 0x400];
            bytes[0x200..0x204].copy_from_slice(b"NCA3");
            <NcaHeader as binrw::BinRead>::read(&mut Cursor::new(&bytes)).unwrap()
        };

        let mut builder = NcaBuilder::from_header(&donor);
        builder
            .add_section(
                0,
                blank_fs_header(),
                Box::new(VecStorage::new(vec![0; 0x10])),
            )
            .unwrap();
        let err = builder
            .add_section(
                0,
                blank_fs_header(),
                Box::new(VecStorage::new(vec![0; 0x10])),
            )
            .unwrap_err();
        assert!(matches!(err, BuildError::AlreadyAdded { index: 0 }));
    }
}
