use crate::hexstring::HexData;
use crate::ids::{NcaId, TitleId};
use binrw::{BinRead, BinWrite};
use bitflags::bitflags;
use snafu::{ResultExt, Snafu};
use std::io::Cursor;

#[derive(Snafu, Debug)]
#[snafu(display("Failed to parse the CNMT"))]
pub struct CnmtParseError {
    source: binrw::Error,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum ContentMetaType {
    SystemProgram = 1,
    SystemData = 2,
    SystemUpdate = 3,
    BootImagePackage = 4,
    BootImagePackageSafe = 5,
    /// A user program (base game).
    Application = 0x80,
    /// A patch for a user program (update).
    Patch = 0x81,
    AddOnContent = 0x82,
    Delta = 0x83,
    DataPatch = 0x84,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum StorageId {
    None = 0,
    Host = 1,
    GameCard = 2,
    BuiltInSystem = 3,
    BuiltInUser = 4,
    SdCard = 5,
    Any = 6,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum ContentInstallType {
    Full = 0,
    FragmentOnly = 1,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentMetaAttribute(pub u8);
bitflags! {
    impl ContentMetaAttribute: u8 {
        const INCLUDES_EXFAT_DRIVER = 0x01;
        const REBOOTLESS = 0x02;
        const COMPACTED = 0x04;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum NcmContentType {
    Meta = 0,
    Program = 1,
    Data = 2,
    Control = 3,
    HtmlDocument = 4,
    LegalInformation = 5,
    DeltaFragment = 6,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentInfo {
    pub id: NcaId,
    #[br(parse_with = crate::brw_utils::read_u40)]
    #[bw(write_with = crate::brw_utils::write_u40)]
    pub size: u64,
    pub content_attributes: u8,
    pub ty: NcmContentType,
    pub id_offset: u8,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct PackagedContentInfo {
    pub hash: HexData<0x20>,
    pub content_info: ContentInfo,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
pub struct ContentMetaInfo {
    pub title_id: TitleId,
    pub version: u32,
    pub ty: NcmContentType,
    #[brw(pad_after = 2)]
    pub attributes: ContentMetaAttribute,
}

/// A packaged content meta (`.cnmt`) record.
///
/// The extended header is kept as raw bytes: the rewriting path only
/// touches the content-entry list and must round-trip everything else
/// bit-exactly regardless of meta type.
#[derive(Debug, Clone, Eq, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct PackagedContentMeta {
    pub id: TitleId,
    pub version: u32,
    pub ty: ContentMetaType,
    pub field_d: u8,
    pub extended_header_size: u16,
    pub content_count: u16,
    pub content_meta_count: u16,
    pub attributes: ContentMetaAttribute,
    pub storage_id: StorageId,
    pub content_install_type: ContentInstallType,
    pub install_state: u8,
    #[brw(pad_after = 4)]
    pub required_download_system_version: u32,

    #[br(count = extended_header_size)]
    pub extended_header: Vec<u8>,

    #[br(count = content_count)]
    pub content_info: Vec<PackagedContentInfo>,
    #[br(count = content_meta_count)]
    pub content_meta_info: Vec<ContentMetaInfo>,

    /// Extended data (patch history et al.) plus the trailing digest.
    #[br(parse_with = binrw::helpers::until_eof)]
    pub trailing: Vec<u8>,
}

impl PackagedContentMeta {
    pub fn parse(data: &[u8]) -> Result<Self, CnmtParseError> {
        Self::read(&mut Cursor::new(data)).context(CnmtParseSnafu)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cur = Cursor::new(Vec::new());
        self.write(&mut cur)
            .expect("BUG: CNMT serialization failed");
        cur.into_inner()
    }

    /// Swaps the content-entry list, keeping the counts coherent.
    pub fn replace_content_entries(&mut self, entries: Vec<PackagedContentInfo>) {
        self.content_count = entries.len() as u16;
        self.content_info = entries;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackagedContentMeta {
        PackagedContentMeta {
            id: TitleId(0x0100_0000_0000_1234),
            version: 0x10000,
            ty: ContentMetaType::Application,
            field_d: 0,
            extended_header_size: 0x10,
            content_count: 1,
            content_meta_count: 0,
            attributes: ContentMetaAttribute::empty(),
            storage_id: StorageId::None,
            content_install_type: ContentInstallType::Full,
            install_state: 0,
            required_download_system_version: 0,
            extended_header: vec![0; 0x10],
            content_info: vec![PackagedContentInfo {
                hash: HexData([0x11; 0x20]),
                content_info: ContentInfo {
                    id: NcaId([0x11; 0x10]),
                    size: 0x1234_5678_9A,
                    content_attributes: 0,
                    ty: NcmContentType::Program,
                    id_offset: 0,
                },
            }],
            content_meta_info: vec![],
            trailing: vec![0; 0x20],
        }
    }

    #[test]
    fn roundtrip() {
        let meta = sample();
        let bytes = meta.to_bytes();
        // fixed header + ext header + one content entry + digest
        assert_eq!(bytes.len(), 0x20 + 0x10 + 0x38 + 0x20);
        assert_eq!(PackagedContentMeta::parse(&bytes).unwrap(), meta);
    }

    #[test]
    fn replace_entries_updates_count() {
        let mut meta = sample();
        meta.replace_content_entries(vec![
            meta.content_info[0],
            PackagedContentInfo {
                hash: HexData([0x22; 0x20]),
                content_info: ContentInfo {
                    id: NcaId([0x22; 0x10]),
                    size: 0x100,
                    content_attributes: 0,
                    ty: NcmContentType::Control,
                    id_offset: 0,
                },
            },
        ]);
        assert_eq!(meta.content_count, 2);

        let reparsed = PackagedContentMeta::parse(&meta.to_bytes()).unwrap();
        assert_eq!(reparsed.content_info.len(), 2);
        assert_eq!(reparsed.content_info[1].content_info.size, 0x100);
    }
}
