pub mod bucket_tree;
pub mod builder;
mod crypt_storage;
pub mod filesystem;
mod patch_storage;
mod structs;
mod verification_storage;

use binrw::BinRead;
use snafu::{OptionExt, ResultExt, Snafu};
use std::io::Cursor;
use tracing::debug;

use crate::crypto::keyset::KeySet;
use crate::crypto::signature::{check_pss, SignatureError, SignatureVerdict};
use crate::crypto::{AesKey, AesXtsKey};
use crate::formats::nca::bucket_tree::{
    BucketTree, BucketTreeError, RelocationEntry, SubsectionEntry,
};
use crate::formats::nca::filesystem::NcaFileSystem;
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
    StorageError,
};

pub use crypt_storage::{section_nonce, NcaCryptStorage};
pub use patch_storage::{AesCtrExStorage, IndirectStorage};
pub use structs::{
    BlockOffset, BucketTreeHeader, CompressionInfo, DistributionType, IntegrityInfo,
    IvfcIntegrityInfo, IvfcIntegrityInfoLevel, NcaContentType, NcaEncryptionType, NcaFormatType,
    NcaFsHeader, NcaHashType, NcaHeader, NcaKeyArea, NcaMagic, NcaSectionType, NcaSignature,
    PatchInfo, SectionTableEntry, Sha256Hash, Sha256IntegrityInfo, Sha256IntegrityInfoLevel,
    SparseInfo, BLOCK_SIZE,
};
pub use verification_storage::{
    IntegrityCheckLevel, NcaVerificationStorage, Validity, VerificationStorageError,
};

#[derive(Snafu, Debug)]
pub enum NcaError {
    #[snafu(display("Failed to read the NCA storage"))]
    Storage { source: StorageError },
    #[snafu(display("Missing a key required to open the NCA"))]
    MissingKey {
        source: crate::crypto::keyset::MissingKeyError,
    },
    #[snafu(display("Missing the title key for this NCA"))]
    MissingTitleKey {
        source: crate::crypto::keyset::MissingTitleKeyError,
    },
    #[snafu(display("Missing the NCA0 RSA-OAEP key area key"))]
    MissingNca0KeyAreaKey,
    #[snafu(display("Failed to unwrap the NCA0 key area"))]
    Nca0KeyArea { source: SignatureError },
    #[snafu(display("Failed to parse the NCA header"))]
    NcaHeaderParsing { source: binrw::Error },
    #[snafu(display("Failed to parse the FS header of section {}", index))]
    FsHeaderParsing { index: usize, source: binrw::Error },
    #[snafu(display("FS header hash mismatch for section {}", index))]
    FsHeaderHashMismatch { index: usize },
    #[snafu(display("NCA size field says {:#x}, storage is {:#x}", expected, actual))]
    StorageSizeMismatch { expected: u64, actual: u64 },
    #[snafu(display("Section {} lies outside the file", index))]
    SectionOutOfBounds { index: usize },
    #[snafu(display("Section table entries overlap or are out of order"))]
    SectionTableOrder,
    #[snafu(display("Failed to slice a section storage"))]
    SectionSlice { source: SliceStorageError },
    #[snafu(display("Unsupported NCA feature: {}", what))]
    UnsupportedFormat { what: &'static str },
    #[snafu(display("Failed to parse a patch bucket tree"))]
    PatchTable { source: BucketTreeError },
    #[snafu(display("Section {} carries no patch info", index))]
    NotAPatchSection { index: usize },
    #[snafu(display("The base NCA has no section {}", index))]
    MissingBaseSection { index: usize },
    #[snafu(display("Failed to set up integrity verification"))]
    Verification {
        source: VerificationStorageError,
    },
    #[snafu(display("Failed to parse the section filesystem"))]
    SectionFs {
        source: filesystem::NcaFsParseError,
    },
}

#[derive(Debug)]
enum NcaContentKeys {
    /// NCA is decrypted, no keys are needed.
    Plaintext,
    /// Keys unwrapped from the key area (directly, or through the NCA0
    /// RSA-OAEP blob).
    KeyArea { ctr: AesKey, xts: AesXtsKey },
    /// Key for rights-id crypto, resolved through the external key set.
    RightsId(AesKey),
}

/// An opened NCA: parsed + validated headers, resolved content keys, and a
/// shared handle on the backing storage that section pipelines clone.
#[derive(Debug)]
pub struct Nca<S: ReadableStorage> {
    storage: SharedStorage<S>,
    header: NcaHeader,
    fs_headers: [Option<NcaFsHeader>; 4],
    content_key: NcaContentKeys,
    /// Plaintext header bytes 0x200..0xC00, the range both signatures cover.
    signed_region: Vec<u8>,
    fixed_key_verdict: SignatureVerdict,
}

pub const ALL_HEADERS_SIZE: usize = 0xc00;
const NCA_HEADER_SIZE: usize = 0x400;
const HEADER_SECTOR_SIZE: usize = 0x200;

pub type RawEncryptedSectionStorage<S> = SliceStorage<SharedStorage<S>>;
pub type RawDecryptedSectionStorage<S> = NcaCryptStorage<RawEncryptedSectionStorage<S>>;
pub type PatchedSectionStorage<S, B> =
    IndirectStorage<RawDecryptedSectionStorage<B>, RawDecryptedSectionStorage<S>>;

/// A section storage before integrity checking: either this NCA's own
/// decrypted bytes or the patched composition over a base NCA.
#[derive(Debug)]
pub enum NcaSectionStorage<S: ReadableStorage, B: ReadableStorage> {
    Plain(RawDecryptedSectionStorage<S>),
    Patched(PatchedSectionStorage<S, B>),
}

impl<S: ReadableStorage, B: ReadableStorage> ReadableStorage for NcaSectionStorage<S, B> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self {
            Self::Plain(storage) => storage.read(offset, buf),
            Self::Patched(storage) => storage.read(offset, buf),
        }
    }

    fn get_size(&self) -> u64 {
        match self {
            Self::Plain(storage) => storage.get_size(),
            Self::Patched(storage) => storage.get_size(),
        }
    }
}

pub type VerifiedSectionStorage<S, B> = NcaVerificationStorage<NcaSectionStorage<S, B>>;
pub type SectionFileSystem<S, B> = NcaFileSystem<VerifiedSectionStorage<S, B>>;

impl<S: ReadableStorage> Nca<S> {
    pub fn new(key_set: &KeySet, storage: S) -> Result<Self, NcaError> {
        let (header, fs_headers, signed_region, is_decrypted) =
            Self::parse_headers(key_set, &storage)?;

        if header.nca_size != storage.get_size() {
            return Err(NcaError::StorageSizeMismatch {
                expected: header.nca_size,
                actual: storage.get_size(),
            });
        }
        Self::validate_section_table(&header, storage.get_size())?;

        let content_key = Self::resolve_content_key(key_set, &header, is_decrypted)?;

        let fixed_key_verdict = check_pss(
            key_set.fixed_key_modulus(),
            &signed_region,
            &header.fixed_key_signature.0 .0,
        );

        debug!(
            content_type = ?header.content_type,
            title_id = %header.title_id,
            plaintext = is_decrypted,
            "opened NCA"
        );

        Ok(Self {
            storage: SharedStorage::new(storage),
            header,
            fs_headers,
            content_key,
            signed_region,
            fixed_key_verdict,
        })
    }

    fn validate_section_table(header: &NcaHeader, file_size: u64) -> Result<(), NcaError> {
        let mut last_end = 0u32;
        for (index, entry) in header.section_table.iter().enumerate() {
            if !entry.is_enabled {
                continue;
            }
            if entry.end.0 < entry.start.0 || entry.start.0 < last_end {
                return Err(NcaError::SectionTableOrder);
            }
            if u64::from(entry.end) > file_size {
                return Err(NcaError::SectionOutOfBounds { index });
            }
            last_end = entry.end.0;
        }
        Ok(())
    }

    fn resolve_content_key(
        key_set: &KeySet,
        header: &NcaHeader,
        is_decrypted: bool,
    ) -> Result<NcaContentKeys, NcaError> {
        if is_decrypted {
            return Ok(NcaContentKeys::Plaintext);
        }

        if header.has_rights_id() {
            let access_key = key_set
                .access_key(&header.rights_id)
                .context(MissingTitleKeySnafu)?;
            let title_kek = key_set
                .title_kek(header.master_key_revision() as usize)
                .context(MissingKeySnafu)?;

            return Ok(NcaContentKeys::RightsId(access_key.decrypt(title_kek)));
        }

        if header.magic == NcaMagic::Nca0 {
            let key = key_set
                .nca0_key_area_key()
                .context(MissingNca0KeyAreaKeySnafu)?;
            let keys =
                crate::crypto::signature::unwrap_nca0_key_area(key, header.key_area.as_rsa_blob())
                    .context(Nca0KeyAreaSnafu)?;

            return Ok(NcaContentKeys::KeyArea {
                xts: AesXtsKey(keys[..0x20].try_into().unwrap()),
                ctr: AesKey(keys[0x20..0x30].try_into().unwrap()),
            });
        }

        let kak = key_set
            .key_area_key(
                header.master_key_revision() as usize,
                header.key_area_key_index,
            )
            .context(MissingKeySnafu)?;

        Ok(NcaContentKeys::KeyArea {
            ctr: kak.unwrap_key(header.key_area.encrypted_ctr_key()),
            xts: kak.unwrap_xts_key(header.key_area.encrypted_xts_key()),
        })
    }

    pub fn is_plaintext(&self) -> bool {
        matches!(self.content_key, NcaContentKeys::Plaintext)
    }

    fn try_parse_nca_header(header: &[u8]) -> Result<NcaHeader, NcaError> {
        assert_eq!(header.len(), NCA_HEADER_SIZE);
        let mut cur = Cursor::new(header);

        let res = NcaHeader::read(&mut cur).context(NcaHeaderParsingSnafu)?;
        assert_eq!(cur.position(), NCA_HEADER_SIZE as u64);
        Ok(res)
    }

    fn parse_headers(
        key_set: &KeySet,
        storage: &S,
    ) -> Result<(NcaHeader, [Option<NcaFsHeader>; 4], Vec<u8>, bool), NcaError> {
        let mut headers_data = [0; ALL_HEADERS_SIZE];
        storage
            .read_exact(0, &mut headers_data)
            .context(StorageSnafu)?;

        let (nca_header_data, fs_header_data) = headers_data.split_at_mut(NCA_HEADER_SIZE);

        let mut is_decrypted = false;

        let nca_header = if let Ok(nca_header) = Self::try_parse_nca_header(nca_header_data) {
            // parseable before decryption means the dump is already plaintext
            is_decrypted = true;
            nca_header
        } else {
            let key = key_set.header_key().context(MissingKeySnafu)?;

            key.decrypt(nca_header_data, 0, HEADER_SECTOR_SIZE);

            let nca_header = Self::try_parse_nca_header(nca_header_data)?;

            match nca_header.magic {
                NcaMagic::Nca0 | NcaMagic::Nca2 => {
                    // each FS header is encrypted as if it were sector 0
                    for i in 0..4 {
                        key.decrypt(
                            &mut fs_header_data[i * HEADER_SECTOR_SIZE..][..HEADER_SECTOR_SIZE],
                            0,
                            HEADER_SECTOR_SIZE,
                        );
                    }
                }
                NcaMagic::Nca3 => {
                    // sector numbering continues through the FS headers
                    key.decrypt(fs_header_data, 2, HEADER_SECTOR_SIZE);
                }
            }

            nca_header
        };

        let mut fs_headers = [None; 4];
        for (index, data) in fs_header_data.chunks_exact(HEADER_SECTOR_SIZE).enumerate() {
            let section_entry = nca_header.section_table[index];

            if section_entry.is_enabled {
                let hash = nca_header.fs_header_hashes[index];
                hash.verify(data)
                    .map_err(|_| NcaError::FsHeaderHashMismatch { index })?;

                let mut cur = Cursor::new(data);

                fs_headers[index] =
                    Some(NcaFsHeader::read(&mut cur).context(FsHeaderParsingSnafu { index })?);
                assert_eq!(cur.position(), HEADER_SECTOR_SIZE as u64);
            }
        }

        let signed_region = headers_data[HEADER_SECTOR_SIZE..].to_vec();

        Ok((nca_header, fs_headers, signed_region, is_decrypted))
    }

    pub fn header(&self) -> &NcaHeader {
        &self.header
    }

    pub fn content_type(&self) -> NcaContentType {
        self.header.content_type
    }

    pub fn fs_header(&self, index: usize) -> Option<&NcaFsHeader> {
        self.fs_headers.get(index).and_then(|h| h.as_ref())
    }

    /// Verdict of the fixed-key signature check performed at open time.
    /// Never fatal; a forged or re-built NCA simply reports `Invalid`.
    pub fn fixed_key_signature_verdict(&self) -> SignatureVerdict {
        self.fixed_key_verdict
    }

    /// Best-effort check of the second header signature against the RSA
    /// modulus extracted from the ExeFS `main.npdm` by the caller. Without
    /// a modulus (no ExeFS, no NPDM) the verdict is `Unchecked`.
    pub fn verify_npdm_signature(&self, modulus: Option<&[u8; 0x100]>) -> SignatureVerdict {
        check_pss(modulus, &self.signed_region, &self.header.npdm_signature.0 .0)
    }
}

impl<S: ReadableStorage + 'static> Nca<S> {
    pub fn get_raw_encrypted_section_storage(
        &self,
        index: usize,
    ) -> Option<RawEncryptedSectionStorage<S>> {
        let section_entry = self.header.section_table.get(index).copied()?;

        if !section_entry.is_enabled {
            return None;
        }

        Some(
            self.storage
                .clone()
                .slice(section_entry.start.into(), section_entry.size())
                .expect("BUG: section bounds validated at open"),
        )
    }

    fn get_ctr_key(&self) -> Result<AesKey, NcaError> {
        match self.content_key {
            NcaContentKeys::Plaintext => Err(NcaError::UnsupportedFormat {
                what: "content key requested for a plaintext NCA",
            }),
            NcaContentKeys::KeyArea { ctr: key, .. } | NcaContentKeys::RightsId(key) => Ok(key),
        }
    }

    fn get_xts_key(&self) -> Result<AesXtsKey, NcaError> {
        match self.content_key {
            NcaContentKeys::KeyArea { xts, .. } => Ok(xts),
            _ => Err(NcaError::UnsupportedFormat {
                what: "XTS section outside a key-area NCA",
            }),
        }
    }

    fn check_section_layers(&self, fs_header: &NcaFsHeader) -> Result<(), NcaError> {
        if fs_header.exists_sparse_layer() {
            return Err(NcaError::UnsupportedFormat {
                what: "sparse storage layer",
            });
        }
        if fs_header.exists_compression_layer() {
            return Err(NcaError::UnsupportedFormat {
                what: "compressed storage layer",
            });
        }
        Ok(())
    }

    pub fn get_raw_decrypted_section_storage(
        &self,
        index: usize,
    ) -> Result<Option<RawDecryptedSectionStorage<S>>, NcaError> {
        let Some(storage) = self.get_raw_encrypted_section_storage(index) else {
            return Ok(None);
        };
        let fs_header = self.fs_headers[index]
            .as_ref()
            .expect("BUG: enabled section without FS header");
        self.check_section_layers(fs_header)?;

        if self.is_plaintext() {
            return Ok(Some(NcaCryptStorage::new_plaintext(storage)));
        }

        let start_offset: u64 = self.header.section_table[index].start.into();

        Ok(Some(match fs_header.encryption_type {
            NcaEncryptionType::Auto => {
                return Err(NcaError::UnsupportedFormat {
                    what: "auto encryption type",
                })
            }
            NcaEncryptionType::None => NcaCryptStorage::new_plaintext(storage),
            NcaEncryptionType::XtsOld => NcaCryptStorage::new_xts(
                storage,
                self.get_xts_key()?,
                start_offset / HEADER_SECTOR_SIZE as u64,
            ),
            NcaEncryptionType::AesCtr | NcaEncryptionType::AesCtrSkipLayerHash => {
                NcaCryptStorage::new_ctr(
                    storage,
                    self.get_ctr_key()?,
                    fs_header.upper_counter,
                    start_offset,
                )
            }
            NcaEncryptionType::AesCtrEx | NcaEncryptionType::AesCtrExSkipLayerHash => {
                let subsections = self.parse_subsection_table(index, fs_header)?;
                NcaCryptStorage::new_ctr_ex(
                    storage,
                    self.get_ctr_key()?,
                    fs_header.upper_counter,
                    start_offset,
                    subsections,
                )
            }
        }))
    }

    /// A view of the section that decrypts everything with the plain
    /// section counter. This is how the patch bucket trees are read: they
    /// sit past the data region and are not covered by the subsection
    /// table.
    fn get_plain_ctr_view(&self, index: usize) -> Result<RawDecryptedSectionStorage<S>, NcaError> {
        let storage = self
            .get_raw_encrypted_section_storage(index)
            .ok_or(NcaError::MissingBaseSection { index })?;
        let fs_header = self.fs_headers[index]
            .as_ref()
            .expect("BUG: enabled section without FS header");

        if self.is_plaintext() {
            return Ok(NcaCryptStorage::new_plaintext(storage));
        }

        let start_offset: u64 = self.header.section_table[index].start.into();
        Ok(match fs_header.encryption_type {
            NcaEncryptionType::None => NcaCryptStorage::new_plaintext(storage),
            _ => NcaCryptStorage::new_ctr(
                storage,
                self.get_ctr_key()?,
                fs_header.upper_counter,
                start_offset,
            ),
        })
    }

    fn parse_subsection_table(
        &self,
        index: usize,
        fs_header: &NcaFsHeader,
    ) -> Result<BucketTree<SubsectionEntry>, NcaError> {
        let patch_info = &fs_header.patch_info;
        let section_size = self.header.section_table[index].size();

        let plain = self.get_plain_ctr_view(index)?;
        let tree = BucketTree::<SubsectionEntry>::parse(
            &plain,
            patch_info.encryption_tree_offset,
            patch_info.encryption_tree_size,
        )
        .context(PatchTableSnafu)?;

        // the trees region itself is encrypted with the plain counter; a
        // trailing subsection with the header generation covers it
        let mut entries = tree.entries().to_vec();
        if tree.end_offset() < section_size {
            entries.push(SubsectionEntry {
                offset: tree.end_offset(),
                reserved: 0,
                generation: fs_header.counter_generation(),
            });
        }
        BucketTree::new(entries, section_size).context(PatchTableSnafu)
    }

    fn parse_relocation_table(
        &self,
        index: usize,
        fs_header: &NcaFsHeader,
    ) -> Result<BucketTree<RelocationEntry>, NcaError> {
        let patch_info = &fs_header.patch_info;
        let plain = self.get_plain_ctr_view(index)?;
        BucketTree::<RelocationEntry>::parse(
            &plain,
            patch_info.relocation_tree_offset,
            patch_info.relocation_tree_size,
        )
        .context(PatchTableSnafu)
    }

    /// Compose this (patch) NCA's section over the matching base section.
    /// The result is the virtual patched section image, still unverified.
    pub fn get_patched_section_storage<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        base: &Nca<B>,
    ) -> Result<Option<PatchedSectionStorage<S, B>>, NcaError> {
        let Some(fs_header) = self.fs_headers.get(index).and_then(|h| h.as_ref()).copied() else {
            return Ok(None);
        };
        if !fs_header.is_patch_section() {
            return Err(NcaError::NotAPatchSection { index });
        }

        let relocations = self.parse_relocation_table(index, &fs_header)?;

        let base_storage = base
            .get_raw_decrypted_section_storage(index)?
            .ok_or(NcaError::MissingBaseSection { index })?;
        let patch_storage = self
            .get_raw_decrypted_section_storage(index)?
            .expect("BUG: patch section disappeared between header and open");

        Ok(Some(IndirectStorage::new(
            base_storage,
            patch_storage,
            relocations,
        )))
    }

    fn open_section(
        &self,
        index: usize,
    ) -> Result<Option<NcaSectionStorage<S, S>>, NcaError> {
        Ok(self
            .get_raw_decrypted_section_storage(index)?
            .map(NcaSectionStorage::Plain))
    }

    fn open_section_with_base<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        base: &Nca<B>,
    ) -> Result<Option<NcaSectionStorage<S, B>>, NcaError> {
        let fs_header = self.fs_headers.get(index).and_then(|h| h.as_ref());
        match fs_header {
            None => Ok(None),
            Some(h) if h.is_patch_section() => Ok(self
                .get_patched_section_storage(index, base)?
                .map(NcaSectionStorage::Patched)),
            Some(_) => Ok(self
                .get_raw_decrypted_section_storage(index)?
                .map(NcaSectionStorage::Plain)),
        }
    }

    fn verify_storage<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        storage: NcaSectionStorage<S, B>,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<VerifiedSectionStorage<S, B>, NcaError> {
        let fs_header = self.fs_headers[index]
            .as_ref()
            .expect("BUG: enabled section without FS header");

        Ok(match &fs_header.integrity_info {
            IntegrityInfo::None => NcaVerificationStorage::new_unverified(storage),
            IntegrityInfo::Sha256(info) => NcaVerificationStorage::new_sha256_verification_storage(
                storage,
                info,
                integrity_level,
            )
            .context(VerificationSnafu)?,
            IntegrityInfo::Ivfc(info) => NcaVerificationStorage::new_ivfc_verification_storage(
                storage,
                info,
                integrity_level,
            )
            .context(VerificationSnafu)?,
        })
    }

    /// The canonical read surface of a section: decrypted and
    /// integrity-checked at the requested strictness.
    pub fn get_section_storage(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Option<VerifiedSectionStorage<S, S>>, NcaError> {
        self.open_section(index)?
            .map(|storage| self.verify_storage(index, storage, integrity_level))
            .transpose()
    }

    /// Like [`get_section_storage`](Self::get_section_storage), but composes
    /// patch sections over `base` first.
    pub fn get_section_storage_with_base<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
        base: &Nca<B>,
    ) -> Result<Option<VerifiedSectionStorage<S, B>>, NcaError> {
        self.open_section_with_base(index, base)?
            .map(|storage| self.verify_storage(index, storage, integrity_level))
            .transpose()
    }

    fn fs_from_storage<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        storage: VerifiedSectionStorage<S, B>,
    ) -> Result<SectionFileSystem<S, B>, NcaError> {
        let fs_header = self.fs_headers[index]
            .as_ref()
            .expect("BUG: enabled section without FS header");

        match fs_header.format_type {
            NcaFormatType::Romfs => NcaFileSystem::new_romfs(storage).context(SectionFsSnafu),
            NcaFormatType::Pfs0 => NcaFileSystem::new_pfs(storage).context(SectionFsSnafu),
        }
    }

    pub fn get_section_fs(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Option<SectionFileSystem<S, S>>, NcaError> {
        self.get_section_storage(index, integrity_level)?
            .map(|storage| self.fs_from_storage(index, storage))
            .transpose()
    }

    pub fn get_section_fs_with_base<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        integrity_level: IntegrityCheckLevel,
        base: &Nca<B>,
    ) -> Result<Option<SectionFileSystem<S, B>>, NcaError> {
        self.get_section_storage_with_base(index, integrity_level, base)?
            .map(|storage| self.fs_from_storage(index, storage))
            .transpose()
    }

    /// Sweep every data block of the section and report its validity.
    /// Sections without a hash scheme come back `Unchecked`.
    pub fn verify_section(&self, index: usize) -> Result<Option<Validity>, NcaError> {
        self.get_section_storage(index, IntegrityCheckLevel::ErrorOnInvalid)?
            .map(|storage| storage.validate().context(StorageSnafu))
            .transpose()
    }

    pub fn verify_section_with_base<B: ReadableStorage + 'static>(
        &self,
        index: usize,
        base: &Nca<B>,
    ) -> Result<Option<Validity>, NcaError> {
        self.get_section_storage_with_base(index, IntegrityCheckLevel::ErrorOnInvalid, base)?
            .map(|storage| storage.validate().context(StorageSnafu))
            .transpose()
    }

    /// Content-type-dependent mapping from section index to role.
    pub fn get_section_type(&self, index: usize) -> Option<NcaSectionType> {
        use NcaContentType::Program;
        use NcaSectionType::{Code, Data, Logo};

        match (index, self.header.content_type) {
            (0, Program) => Some(Code),
            (1, Program) => Some(Data),
            (2, Program) => Some(Logo),
            (0, _) => Some(Data),
            _ => None,
        }
    }

    pub fn get_fs(
        &self,
        ty: NcaSectionType,
        integrity_level: IntegrityCheckLevel,
    ) -> Result<Option<SectionFileSystem<S, S>>, NcaError> {
        let Some(index) = (0..4).find(|&i| self.get_section_type(i) == Some(ty)) else {
            return Ok(None);
        };

        self.get_section_fs(index, integrity_level)
    }
}
