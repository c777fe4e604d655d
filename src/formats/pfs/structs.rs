use binrw::{BinRead, BinWrite};

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct PartitionFsEntry {
    /// Relative to the end of the header (the data region).
    pub offset: u64,
    pub size: u64,
    #[brw(pad_after = 4)]
    pub string_table_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"PFS0")]
pub struct PartitionFsHeader {
    pub num_files: u32,
    pub string_table_size: u32,

    #[brw(pad_before = 4)]
    #[br(count = num_files)]
    pub file_entries: Vec<PartitionFsEntry>,

    #[br(count = string_table_size)]
    pub string_table: Vec<u8>,
}

impl PartitionFsHeader {
    /// Size of the serialized header, which is also where the data region
    /// begins.
    pub fn byte_size(&self) -> u64 {
        0x10 + 0x18 * self.file_entries.len() as u64 + self.string_table.len() as u64
    }
}

pub fn get_string(string_table: &[u8], offset: u32) -> String {
    let start = offset as usize;
    let end = string_table[start..]
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(string_table.len() - start);

    String::from_utf8_lossy(&string_table[start..start + end]).into_owned()
}
