use crate::formats::pfs::structs::{PartitionFsEntry, PartitionFsHeader};
use binrw::BinWrite;
use std::io::Cursor;

/// Serializes a PFS0 image from in-memory files. Entries keep insertion
/// order; the string table is padded so the data region starts 0x20-aligned.
#[derive(Debug, Default)]
pub struct PartitionFsBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl PartitionFsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, name: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.files.push((name.into(), data));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut string_table = Vec::new();
        let mut entries = Vec::new();
        let mut data_offset = 0u64;

        for (name, data) in &self.files {
            entries.push(PartitionFsEntry {
                offset: data_offset,
                size: data.len() as u64,
                string_table_offset: string_table.len() as u32,
            });
            string_table.extend_from_slice(name.as_bytes());
            string_table.push(0);
            data_offset += data.len() as u64;
        }

        // pad the string table so the header ends 0x20-aligned
        let header_size = 0x10 + 0x18 * entries.len() + string_table.len();
        string_table.resize(string_table.len() + (0x20 - header_size % 0x20) % 0x20, 0);

        let header = PartitionFsHeader {
            num_files: entries.len() as u32,
            string_table_size: string_table.len() as u32,
            file_entries: entries,
            string_table,
        };

        let mut out = Cursor::new(Vec::new());
        header
            .write(&mut out)
            .expect("BUG: PFS0 header serialization failed");
        let mut out = out.into_inner();
        for (_, data) in self.files {
            out.extend_from_slice(&data);
        }
        out
    }
}
