//! End-to-end tests over synthesized NCAs: open, verify, patch-compose and
//! merge, all against in-memory fixtures with fixed test keys.

use std::io::Cursor;

use ncafs::binrw::BinRead;
use ncafs::crypto::keyset::{KeyAreaKeyIndex, KeySet};
use ncafs::crypto::signature::SignatureVerdict;
use ncafs::crypto::{AccessKey, AesKey, AesXtsKey};
use ncafs::filesystem::{ReadableDirectory, ReadableFile, ReadableFileSystem};
use ncafs::formats::cnmt::{NcmContentType, PackagedContentMeta};
use ncafs::formats::nca::bucket_tree::{BucketTree, RelocationEntry};
use ncafs::formats::nca::builder::{
    build_ivfc_section, build_merged, build_sha256_section, packaged_content_info_for,
    patch_content_meta, pfs_fs_header, romfs_fs_header, BuildError, NcaBuilder,
};
use ncafs::formats::nca::{
    section_nonce, BucketTreeHeader, IntegrityCheckLevel, IntegrityInfo, Nca, NcaError,
    NcaFsHeader, NcaHeader, NcaMagic, PatchInfo, SectionTableEntry, Sha256Hash, Validity,
};
use ncafs::formats::pfs::PartitionFsBuilder;
use ncafs::formats::romfs::RomFsBuilder;
use ncafs::storage::{ReadableStorage, ReadableStorageExt, StorageError, VecStorage};

const HEADER_KEY: AesXtsKey = AesXtsKey([0x42; 0x20]);
const TITLE_KEK: AesKey = AesKey([0x77; 0x10]);
const KEY_AREA_KEY: AesKey = AesKey([0x33; 0x10]);

fn test_key_set() -> KeySet {
    let mut key_set = KeySet::default();
    key_set.set_header_key(HEADER_KEY);
    key_set.set_title_kek(0, TITLE_KEK);
    key_set.set_key_area_key(0, KeyAreaKeyIndex::Application, KEY_AREA_KEY);
    key_set
}

fn blank_header() -> NcaHeader {
    let mut bytes = vec![0u8; 0x400];
    bytes[0x200..0x204].copy_from_slice(b"NCA3");
    NcaHeader::read(&mut Cursor::new(&bytes)).unwrap()
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Assembles and header-encrypts an NCA image without going through
/// `NcaBuilder`, so fixtures can keep patch info and encrypted sections.
fn seal_nca(
    mut header: NcaHeader,
    fs_headers: [Option<NcaFsHeader>; 4],
    sections: [Option<Vec<u8>>; 4],
) -> Vec<u8> {
    use ncafs::binrw::BinWrite;

    let mut out = vec![0u8; 0xC00];
    let mut offset = 0xC00u64;
    for (i, section) in sections.into_iter().enumerate() {
        let Some(data) = section else { continue };
        let aligned = align_up(data.len() as u64, 0x200);
        header.section_table[i] = SectionTableEntry {
            start: offset.into(),
            end: (offset + aligned).into(),
            is_enabled: true,
        };
        out.extend_from_slice(&data);
        out.resize(out.len() + (aligned as usize - data.len()), 0);
        offset += aligned;
    }
    header.nca_size = offset;

    for (i, fs_header) in fs_headers.iter().enumerate() {
        let Some(fs_header) = fs_header else { continue };
        let region = &mut out[0x400 + 0x200 * i..][..0x200];
        fs_header.write(&mut Cursor::new(&mut *region)).unwrap();
        header.fs_header_hashes[i] = Sha256Hash::compute(region);
    }

    {
        let region = &mut out[..0x400];
        header.write(&mut Cursor::new(&mut *region)).unwrap();
    }

    HEADER_KEY.encrypt(&mut out[..0x400], 0, 0x200);
    match header.magic {
        NcaMagic::Nca3 => HEADER_KEY.encrypt(&mut out[0x400..0xC00], 2, 0x200),
        NcaMagic::Nca0 | NcaMagic::Nca2 => {
            for i in 0..4 {
                HEADER_KEY.encrypt(&mut out[0x400 + 0x200 * i..][..0x200], 0, 0x200);
            }
        }
    }
    out
}

fn sample_exefs(tag: &[u8]) -> Vec<u8> {
    let mut pfs = PartitionFsBuilder::new();
    pfs.add_file("main", tag.to_vec());
    pfs.add_file("main.npdm", vec![0u8; 0x80]);
    pfs.build()
}

fn sample_romfs(data_bin: &[u8]) -> Vec<u8> {
    let mut romfs = RomFsBuilder::new();
    romfs.add_file("/hello.txt", b"Hello from the fixture RomFS".to_vec());
    romfs.add_file("/data.bin", data_bin.to_vec());
    romfs.add_file("/nested/other.bin", (0u8..=0xFF).collect());
    romfs.build()
}

/// A three-section Program NCA: ExeFS (SHA-256 PFS0), RomFS (IVFC), Logo
/// (unchecked raw bytes).
fn build_program_nca(key_set: &KeySet, data_bin: &[u8]) -> Vec<u8> {
    let (exefs, exefs_info) = build_sha256_section(&sample_exefs(b"base code"), 0x1000);
    let (romfs, romfs_info) = build_ivfc_section(&sample_romfs(data_bin), 12);
    let logo = vec![0u8; 0x4000];

    let mut builder = NcaBuilder::from_header(&blank_header());
    builder
        .add_section(0, pfs_fs_header(exefs_info), Box::new(VecStorage::new(exefs)))
        .unwrap();
    builder
        .add_section(1, romfs_fs_header(romfs_info), Box::new(VecStorage::new(romfs)))
        .unwrap();
    let mut logo_header = pfs_fs_header(build_sha256_section(&logo, 0x1000).1);
    logo_header.integrity_info = IntegrityInfo::None;
    logo_header.hash_type = ncafs::formats::nca::NcaHashType::None;
    builder
        .add_section(2, logo_header, Box::new(VecStorage::new(logo)))
        .unwrap();

    builder.build(key_set).unwrap().read_all().unwrap()
}

#[test]
fn s1_read_file_from_verified_romfs() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes)).unwrap();
    let fs = nca
        .get_section_fs(1, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();

    let file = fs.open_file("/hello.txt").unwrap();
    assert_eq!(file.size(), 28);
    assert_eq!(
        file.storage().unwrap().read_all().unwrap(),
        b"Hello from the fixture RomFS"
    );

    let nested = fs.open_file("/nested/other.bin").unwrap();
    assert_eq!(
        nested.storage().unwrap().read_all().unwrap(),
        (0u8..=0xFF).collect::<Vec<u8>>()
    );
}

#[test]
fn s2_bit_flip_fails_with_hash_mismatch() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    // locate the romfs data level inside the file
    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes.clone())).unwrap();
    let section_start: u64 = {
        let entry = nca.header().section_table[1];
        entry.start.into()
    };
    let data_offset = match &nca.fs_header(1).unwrap().integrity_info {
        IntegrityInfo::Ivfc(info) => info.level_info[info.level_count as usize - 2].offset,
        _ => panic!("fixture should be IVFC"),
    };

    let mut corrupted = nca_bytes;
    corrupted[(section_start + data_offset + 0x10) as usize] ^= 0x01;

    let nca = Nca::new(&key_set, VecStorage::new(corrupted)).unwrap();
    let storage = nca
        .get_section_storage(1, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();

    let mut buf = vec![0u8; 0x40];
    let err = storage.read_exact(0, &mut buf).unwrap_err();
    assert!(matches!(err, StorageError::HashMismatch {}));

    assert_eq!(nca.verify_section(1).unwrap().unwrap(), Validity::Invalid);
}

#[test]
fn verification_is_idempotent() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);
    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes)).unwrap();

    assert_eq!(nca.verify_section(0).unwrap().unwrap(), Validity::Valid);
    assert_eq!(nca.verify_section(1).unwrap().unwrap(), Validity::Valid);
    assert_eq!(nca.verify_section(1).unwrap().unwrap(), Validity::Valid);
    // hash type None never gets a verdict
    assert_eq!(nca.verify_section(2).unwrap().unwrap(), Validity::Unchecked);
}

#[test]
fn ignore_level_serves_zeros_for_bad_blocks() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes.clone())).unwrap();
    let section_start: u64 = nca.header().section_table[1].start.into();
    let data_offset = match &nca.fs_header(1).unwrap().integrity_info {
        IntegrityInfo::Ivfc(info) => info.level_info[info.level_count as usize - 2].offset,
        _ => unreachable!(),
    };

    let mut corrupted = nca_bytes;
    corrupted[(section_start + data_offset) as usize] ^= 0xFF;

    let nca = Nca::new(&key_set, VecStorage::new(corrupted)).unwrap();
    let storage = nca
        .get_section_storage(1, IntegrityCheckLevel::IgnoreOnInvalid)
        .unwrap()
        .unwrap();

    let mut block = vec![0u8; 0x100];
    storage.read_exact(0, &mut block).unwrap();
    assert!(block.iter().all(|&b| b == 0), "bad block must read as zeros");
}

#[test]
fn s3_title_key_nca_requires_external_key() {
    let key_set = test_key_set();

    let title_key = AesKey([0xAA; 0x10]);
    let rights_id = "000102030405060708090a0b0c0d0e10".parse().unwrap();

    // a single CTR-encrypted PFS section keyed by the title key
    let (section, info) = build_sha256_section(&sample_exefs(b"title keyed"), 0x1000);
    let mut fs_header = pfs_fs_header(info);
    fs_header.encryption_type = ncafs::formats::nca::NcaEncryptionType::AesCtr;
    fs_header.upper_counter = 0xDEAD_0000_0000_0001;

    let mut encrypted = section;
    encrypted.resize(align_up(encrypted.len() as u64, 0x200) as usize, 0);
    title_key.encrypt_ctr(&mut encrypted, &section_nonce(fs_header.upper_counter, 0xC00).0);

    let mut header = blank_header();
    header.content_type = ncafs::formats::nca::NcaContentType::Meta;
    header.rights_id = rights_id;

    let nca_bytes = seal_nca(
        header,
        [Some(fs_header), None, None, None],
        [Some(encrypted), None, None, None],
    );

    // without the title key: MissingTitleKey at open
    let err = Nca::new(&key_set, VecStorage::new(nca_bytes.clone())).unwrap_err();
    assert!(matches!(err, NcaError::MissingTitleKey { .. }));

    // after registering it: opens and decrypts
    let mut key_set = key_set;
    assert!(key_set.insert_title_key(rights_id, AccessKey::encrypt(title_key, TITLE_KEK)));

    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes)).unwrap();
    let fs = nca
        .get_section_fs(0, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();
    let main = fs.open_file("main").unwrap();
    assert_eq!(main.storage().unwrap().read_all().unwrap(), b"title keyed");
}

#[test]
fn key_area_nca_decrypts_with_wrapped_keys() {
    let key_set = test_key_set();

    let ctr_key = AesKey([0x59; 0x10]);
    let (section, info) = build_sha256_section(&sample_exefs(b"key area"), 0x1000);
    let mut fs_header = pfs_fs_header(info);
    fs_header.encryption_type = ncafs::formats::nca::NcaEncryptionType::AesCtr;
    fs_header.upper_counter = 0x0102_0304_0000_0000;

    let mut encrypted = section;
    encrypted.resize(align_up(encrypted.len() as u64, 0x200) as usize, 0);
    ctr_key.encrypt_ctr(&mut encrypted, &section_nonce(fs_header.upper_counter, 0xC00).0);

    let mut header = blank_header();
    header.content_type = ncafs::formats::nca::NcaContentType::Meta;
    // wrap the ctr key into key-area slot 2 (offset 0x20 in the area)
    let wrapped = KEY_AREA_KEY.wrap_key(ctr_key);
    header.key_area.0 .0[0x20..0x30].copy_from_slice(&wrapped.0 .0);

    let nca_bytes = seal_nca(
        header,
        [Some(fs_header), None, None, None],
        [Some(encrypted), None, None, None],
    );

    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes)).unwrap();
    let fs = nca
        .get_section_fs(0, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();
    assert_eq!(
        fs.open_file("main")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        b"key area"
    );
}

/// Splits two equal-size images into 16-byte runs and produces the
/// relocation entries + patch extents that rebuild `patched` over `base`.
fn diff_relocations(base: &[u8], patched: &[u8]) -> (Vec<RelocationEntry>, Vec<u8>) {
    assert_eq!(base.len(), patched.len());

    let mut entries: Vec<RelocationEntry> = Vec::new();
    let mut patch_data = Vec::new();

    let mut pos = 0usize;
    while pos < base.len() {
        let end = std::cmp::min(pos + 0x10, base.len());
        let same = base[pos..end] == patched[pos..end];

        let source = if same {
            RelocationEntry::SOURCE_BASE
        } else {
            RelocationEntry::SOURCE_PATCH
        };

        match entries.last() {
            Some(last) if last.source == source && same => {}
            Some(last) if last.source == source && !same => {
                patch_data.extend_from_slice(&patched[pos..end]);
            }
            _ => {
                let source_offset = if same {
                    pos as u64
                } else {
                    let at = patch_data.len() as u64;
                    patch_data.extend_from_slice(&patched[pos..end]);
                    at
                };
                entries.push(RelocationEntry {
                    virtual_offset: pos as u64,
                    source_offset,
                    source,
                });
            }
        }
        pos = end;
    }

    (entries, patch_data)
}

/// Builds the patch (update) NCA for S4: fresh ExeFS, BKTR RomFS referring
/// back to the base for unchanged ranges.
fn build_patch_nca(base_romfs_section: &[u8], patched_data_bin: &[u8]) -> Vec<u8> {
    let (patched_section, patched_info) = build_ivfc_section(&sample_romfs(patched_data_bin), 12);
    assert_eq!(base_romfs_section.len(), patched_section.len());

    let (relocations, patch_data) = diff_relocations(base_romfs_section, &patched_section);
    let tree_block = BucketTree::write_block(&relocations, patched_section.len() as u64);

    let tree_offset = align_up(patch_data.len() as u64, 0x10);
    let mut physical = patch_data;
    physical.resize(tree_offset as usize, 0);
    physical.extend_from_slice(&tree_block);

    let mut romfs_header = romfs_fs_header(patched_info);
    romfs_header.patch_info = PatchInfo {
        relocation_tree_offset: tree_offset,
        relocation_tree_size: tree_block.len() as u64,
        relocation_tree_header: BucketTreeHeader {
            magic: BucketTreeHeader::MAGIC,
            version: 1,
            entry_count: relocations.len() as u32,
            reserved: 0,
        },
        encryption_tree_offset: 0,
        encryption_tree_size: 0,
        encryption_tree_header: BucketTreeHeader::default(),
    };

    let (exefs, exefs_info) = build_sha256_section(&sample_exefs(b"updated code"), 0x1000);

    seal_nca(
        blank_header(),
        [Some(pfs_fs_header(exefs_info)), Some(romfs_header), None, None],
        [Some(exefs), Some(physical), None, None],
    )
}

#[test]
fn s4_merge_composes_patched_romfs() {
    let key_set = test_key_set();

    let base_data: Vec<u8> = (0..0x100u32).map(|i| i as u8).collect();
    let mut patched_data = base_data.clone();
    patched_data[..0x10].copy_from_slice(&[0xEE; 0x10]);

    let base_bytes = build_program_nca(&key_set, &base_data);
    let base = Nca::new(&key_set, VecStorage::new(base_bytes)).unwrap();

    // the base's stored romfs section image is what the diff runs against
    let base_romfs_section = base
        .get_raw_decrypted_section_storage(1)
        .unwrap()
        .unwrap()
        .read_all()
        .unwrap();
    // trim the 0x200 alignment tail the section padding added
    let romfs_image_size = match &base.fs_header(1).unwrap().integrity_info {
        IntegrityInfo::Ivfc(info) => {
            let last = info.level_count as usize - 2;
            info.level_info[last].offset + info.level_info[last].size
        }
        _ => unreachable!(),
    };
    let base_romfs_section = &base_romfs_section[..romfs_image_size as usize];

    let patch_bytes = build_patch_nca(base_romfs_section, &patched_data);
    let patch = Nca::new(&key_set, VecStorage::new(patch_bytes)).unwrap();

    // the patched view alone already composes correctly
    let patched_fs = patch
        .get_section_fs_with_base(1, IntegrityCheckLevel::ErrorOnInvalid, &base)
        .unwrap()
        .unwrap();
    assert_eq!(
        patched_fs
            .open_file("/data.bin")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        patched_data
    );

    // and the merged NCA is self-contained
    let merged_bytes = build_merged(&key_set, &base, &patch)
        .unwrap()
        .read_all()
        .unwrap();
    let merged = Nca::new(&key_set, VecStorage::new(merged_bytes)).unwrap();

    let fs = merged
        .get_section_fs(1, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();
    assert_eq!(
        fs.open_file("/data.bin")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        patched_data
    );
    assert_eq!(
        fs.open_file("/hello.txt")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        b"Hello from the fixture RomFS"
    );

    // merged sections carry no patch info and are fully valid
    assert_eq!(merged.fs_header(1).unwrap().patch_info, PatchInfo::default());
    assert_eq!(merged.verify_section(1).unwrap().unwrap(), Validity::Valid);

    // ExeFS comes from the patch
    let exefs = merged
        .get_section_fs(0, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();
    assert_eq!(
        exefs
            .open_file("main")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        b"updated code"
    );

    // signatures were carried verbatim and can no longer be valid; with no
    // modulus loaded the verdict stays unchecked rather than failing open
    assert_eq!(
        merged.fixed_key_signature_verdict(),
        SignatureVerdict::Unchecked
    );
}

#[test]
fn s5_nca0_oaep_key_area() {
    use rand::rngs::OsRng;

    let mut key_set = test_key_set();

    let private = rsa::RsaPrivateKey::new(&mut OsRng, 2048).unwrap();
    let public = rsa::RsaPublicKey::from(&private);

    let ctr_key = AesKey([0x91; 0x10]);
    let mut keys = [0u8; 0x40];
    keys[0x20..0x30].copy_from_slice(&ctr_key.0);

    let blob =
        ncafs::crypto::signature::wrap_nca0_key_area(&public, &keys, &mut OsRng).unwrap();

    let (section, info) = build_sha256_section(&sample_exefs(b"nca0 content"), 0x1000);
    let mut fs_header = pfs_fs_header(info);
    fs_header.encryption_type = ncafs::formats::nca::NcaEncryptionType::AesCtr;
    fs_header.upper_counter = 0x0BAD_F00D_0000_0000;

    let mut encrypted = section;
    encrypted.resize(align_up(encrypted.len() as u64, 0x200) as usize, 0);
    ctr_key.encrypt_ctr(&mut encrypted, &section_nonce(fs_header.upper_counter, 0xC00).0);

    let mut header = blank_header();
    header.magic = NcaMagic::Nca0;
    header.content_type = ncafs::formats::nca::NcaContentType::Meta;
    header.key_area.0 .0.copy_from_slice(&blob);

    let nca_bytes = seal_nca(
        header,
        [Some(fs_header), None, None, None],
        [Some(encrypted), None, None, None],
    );

    // without the private key the key area cannot be unwrapped
    let err = Nca::new(&key_set, VecStorage::new(nca_bytes.clone())).unwrap_err();
    assert!(matches!(err, NcaError::MissingNca0KeyAreaKey));

    key_set.set_nca0_key_area_key(private);
    let nca = Nca::new(&key_set, VecStorage::new(nca_bytes)).unwrap();
    let fs = nca
        .get_section_fs(0, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();

    let names: Vec<String> = fs
        .root()
        .entries()
        .filter_map(|e| e.file())
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names, ["main", "main.npdm"]);
    assert_eq!(
        fs.open_file("main")
            .unwrap()
            .storage()
            .unwrap()
            .read_all()
            .unwrap(),
        b"nca0 content"
    );
}

#[test]
fn s6_corrupt_magic_is_an_invalid_header() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    let mut corrupted = nca_bytes;
    HEADER_KEY.decrypt(&mut corrupted[..0x400], 0, 0x200);
    corrupted[0x200..0x204].copy_from_slice(b"NCA9");
    HEADER_KEY.encrypt(&mut corrupted[..0x400], 0, 0x200);

    let err = Nca::new(&key_set, VecStorage::new(corrupted)).unwrap_err();
    assert!(matches!(err, NcaError::NcaHeaderParsing { .. }));
}

#[test]
fn header_roundtrips_bit_exact() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    let mut decrypted = nca_bytes[..0x400].to_vec();
    HEADER_KEY.decrypt(&mut decrypted, 0, 0x200);

    let header = NcaHeader::read(&mut Cursor::new(&decrypted)).unwrap();

    use ncafs::binrw::BinWrite;
    let mut emitted = Cursor::new(Vec::new());
    header.write(&mut emitted).unwrap();
    assert_eq!(emitted.into_inner(), decrypted);
}

#[test]
fn truncated_file_is_rejected_at_open() {
    let key_set = test_key_set();
    let nca_bytes = build_program_nca(&key_set, &[0xA5; 0x100]);

    let truncated = nca_bytes[..nca_bytes.len() - 0x200].to_vec();
    let err = Nca::new(&key_set, VecStorage::new(truncated)).unwrap_err();
    assert!(matches!(err, NcaError::StorageSizeMismatch { .. }));
}

#[test]
fn meta_patching_rewrites_the_cnmt() {
    let key_set = test_key_set();

    // a base Meta NCA holding an Application cnmt with no entries yet
    let cnmt = PackagedContentMeta {
        id: ncafs::ids::TitleId(0x0100_0000_0000_1234),
        version: 0,
        ty: ncafs::formats::cnmt::ContentMetaType::Application,
        field_d: 0,
        extended_header_size: 0x10,
        content_count: 0,
        content_meta_count: 0,
        attributes: ncafs::formats::cnmt::ContentMetaAttribute::empty(),
        storage_id: ncafs::formats::cnmt::StorageId::None,
        content_install_type: ncafs::formats::cnmt::ContentInstallType::Full,
        install_state: 0,
        required_download_system_version: 0,
        extended_header: vec![0; 0x10],
        content_info: vec![],
        content_meta_info: vec![],
        trailing: vec![0; 0x20],
    };

    let mut pfs = PartitionFsBuilder::new();
    pfs.add_file("Application_0100000000001234.cnmt", cnmt.to_bytes());
    let (section, info) = build_sha256_section(&pfs.build(), 0x1000);

    let mut header = blank_header();
    header.content_type = ncafs::formats::nca::NcaContentType::Meta;
    let mut builder = NcaBuilder::from_header(&header);
    builder
        .add_section(0, pfs_fs_header(info), Box::new(VecStorage::new(section)))
        .unwrap();
    let meta_bytes = builder.build(&key_set).unwrap().read_all().unwrap();
    let base_meta = Nca::new(&key_set, VecStorage::new(meta_bytes)).unwrap();

    // pretend this program NCA is the freshly merged output
    let program_bytes = build_program_nca(&key_set, &[0x11; 0x100]);
    let program_storage = VecStorage::new(program_bytes);
    let entry = packaged_content_info_for(&program_storage, NcmContentType::Program).unwrap();

    let patched_bytes = patch_content_meta(&key_set, &base_meta, vec![entry])
        .unwrap()
        .read_all()
        .unwrap();

    let patched = Nca::new(&key_set, VecStorage::new(patched_bytes)).unwrap();
    assert_eq!(
        patched.verify_section(0).unwrap().unwrap(),
        Validity::Valid
    );

    let fs = patched
        .get_section_fs(0, IntegrityCheckLevel::ErrorOnInvalid)
        .unwrap()
        .unwrap();
    let cnmt_data = fs
        .open_file("Application_0100000000001234.cnmt")
        .unwrap()
        .storage()
        .unwrap()
        .read_all()
        .unwrap();
    let reparsed = PackagedContentMeta::parse(&cnmt_data).unwrap();

    assert_eq!(reparsed.content_info.len(), 1);
    assert_eq!(reparsed.content_info[0], entry);
    assert_eq!(
        reparsed.content_info[0].content_info.size,
        program_storage.get_size()
    );
}

#[test]
fn merge_refuses_non_patch_updates() {
    let key_set = test_key_set();

    let base_bytes = build_program_nca(&key_set, &[0x00; 0x100]);
    let base = Nca::new(&key_set, VecStorage::new(base_bytes.clone())).unwrap();
    // a second plain NCA posing as the update: no patch info anywhere
    let fake_patch = Nca::new(&key_set, VecStorage::new(base_bytes)).unwrap();

    let err = build_merged(&key_set, &base, &fake_patch).unwrap_err();
    assert!(matches!(err, BuildError::PreconditionViolation { .. }));
}
