use crate::formats::romfs::structs::{RomFsHeader, ROMFS_HEADER_SIZE};
use binrw::BinWrite;
use std::io::Cursor;

const ENTRY_NONE: u32 = 0xFF_FF_FF_FF;
const DIR_ENTRY_SIZE: u32 = 0x18;
const FILE_ENTRY_SIZE: u32 = 0x20;
/// File data begins at a fixed offset past the header.
const DATA_OFFSET: u64 = 0x200;

#[derive(Debug)]
struct DirEnt {
    name: String,
    parent: usize,
    children: Vec<usize>,
    files: Vec<usize>,
    entry_offset: u32,
}

#[derive(Debug)]
struct FileEnt {
    name: String,
    parent: usize,
    data: Vec<u8>,
    entry_offset: u32,
    data_offset: u64,
}

/// Builds a RomFS image from in-memory files.
///
/// The hash-table sizing and entry layout reproduce what the console's own
/// tooling emits, so the result round-trips through [`RomFileSystem`].
///
/// [`RomFileSystem`]: crate::formats::romfs::RomFileSystem
#[derive(Debug)]
pub struct RomFsBuilder {
    dirs: Vec<DirEnt>,
    files: Vec<FileEnt>,
}

fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

// The table size is the smallest "convenient prime-ish" number of buckets
// at least the entry count; this mirrors the upstream implementation.
fn hash_table_count(num_entries: usize) -> usize {
    let mut count = num_entries;
    if count < 3 {
        3
    } else if count < 19 {
        count | 1
    } else {
        while count % 2 == 0
            || count % 3 == 0
            || count % 5 == 0
            || count % 7 == 0
            || count % 11 == 0
            || count % 13 == 0
            || count % 17 == 0
        {
            count += 1;
        }
        count
    }
}

fn path_hash(parent_entry_offset: u32, name: &str) -> u32 {
    let mut hash = parent_entry_offset ^ 123_456_789;
    for c in name.bytes() {
        hash = (hash >> 5) | (hash << 27);
        hash ^= u32::from(c);
    }
    hash
}

fn name_size_aligned(name: &str) -> u32 {
    (name.len() as u32 + 3) & !3
}

impl Default for RomFsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RomFsBuilder {
    pub fn new() -> Self {
        Self {
            dirs: vec![DirEnt {
                name: String::new(),
                parent: 0,
                children: vec![],
                files: vec![],
                entry_offset: 0,
            }],
            files: vec![],
        }
    }

    fn find_or_create_dir(&mut self, parent: usize, name: &str) -> usize {
        if let Some(&child) = self.dirs[parent]
            .children
            .iter()
            .find(|&&c| self.dirs[c].name == name)
        {
            return child;
        }

        let child = self.dirs.len();
        self.dirs.push(DirEnt {
            name: name.to_string(),
            parent,
            children: vec![],
            files: vec![],
            entry_offset: 0,
        });
        self.dirs[parent].children.push(child);
        let dirs = &self.dirs;
        let mut children = dirs[parent].children.clone();
        children.sort_by(|&a, &b| dirs[a].name.cmp(&dirs[b].name));
        self.dirs[parent].children = children;
        child
    }

    /// Adds a file at the given absolute path, creating intermediate
    /// directories. Duplicate paths are a caller bug.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) -> &mut Self {
        let path = path.strip_prefix('/').unwrap_or(path);
        let mut parent = 0;

        let mut components = path.split('/').peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                let file = self.files.len();
                self.files.push(FileEnt {
                    name: component.to_string(),
                    parent,
                    data,
                    entry_offset: 0,
                    data_offset: 0,
                });
                self.dirs[parent].files.push(file);
                let files = &self.files;
                let mut dir_files = self.dirs[parent].files.clone();
                dir_files.sort_by(|&a, &b| files[a].name.cmp(&files[b].name));
                self.dirs[parent].files = dir_files;
                break;
            }
            if !component.is_empty() {
                parent = self.find_or_create_dir(parent, component);
            }
        }
        self
    }

    /// Depth-first order rooted at the root directory, the order entry
    /// offsets are assigned in.
    fn dir_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.dirs.len());
        let mut stack = vec![0];
        while let Some(dir) = stack.pop() {
            order.push(dir);
            for &child in self.dirs[dir].children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    pub fn build(mut self) -> Vec<u8> {
        // assign meta-table offsets
        let dir_order = self.dir_order();
        let mut offset = 0u32;
        for &dir in &dir_order {
            self.dirs[dir].entry_offset = offset;
            offset += DIR_ENTRY_SIZE + name_size_aligned(&self.dirs[dir].name);
        }
        let dir_table_size = offset;

        let file_order: Vec<usize> = dir_order
            .iter()
            .flat_map(|&d| self.dirs[d].files.iter().copied())
            .collect();
        let mut offset = 0u32;
        let mut data_offset = 0u64;
        for &file in &file_order {
            self.files[file].entry_offset = offset;
            offset += FILE_ENTRY_SIZE + name_size_aligned(&self.files[file].name);

            data_offset = align_up(data_offset, 0x10);
            self.files[file].data_offset = data_offset;
            data_offset += self.files[file].data.len() as u64;
        }
        let file_table_size = offset;
        let data_size = data_offset;

        // populate hash + meta tables
        let mut dir_hash_table = vec![ENTRY_NONE; hash_table_count(self.dirs.len())];
        let mut dir_table = vec![0u8; dir_table_size as usize];
        for &dir in &dir_order {
            let ent = &self.dirs[dir];
            let parent = &self.dirs[ent.parent];
            let sibling = self.next_sibling_dir(dir);
            let hash = path_hash(parent.entry_offset, &ent.name);
            let bucket = hash as usize % dir_hash_table.len();

            let mut cur = Cursor::new(&mut dir_table[ent.entry_offset as usize..]);
            write_u32(&mut cur, parent.entry_offset);
            write_u32(&mut cur, sibling);
            write_u32(
                &mut cur,
                ent.children
                    .first()
                    .map(|&c| self.dirs[c].entry_offset)
                    .unwrap_or(ENTRY_NONE),
            );
            write_u32(
                &mut cur,
                ent.files
                    .first()
                    .map(|&f| self.files[f].entry_offset)
                    .unwrap_or(ENTRY_NONE),
            );
            write_u32(&mut cur, dir_hash_table[bucket]);
            write_u32(&mut cur, ent.name.len() as u32);
            write_name(&mut cur, &ent.name);

            dir_hash_table[bucket] = ent.entry_offset;
        }

        let mut file_hash_table = vec![ENTRY_NONE; hash_table_count(self.files.len())];
        let mut file_table = vec![0u8; file_table_size as usize];
        for &file in &file_order {
            let ent = &self.files[file];
            let parent = &self.dirs[ent.parent];
            let sibling = self.next_sibling_file(file);
            let hash = path_hash(parent.entry_offset, &ent.name);
            let bucket = hash as usize % file_hash_table.len();

            let mut cur = Cursor::new(&mut file_table[ent.entry_offset as usize..]);
            write_u32(&mut cur, parent.entry_offset);
            write_u32(&mut cur, sibling);
            write_u64(&mut cur, ent.data_offset);
            write_u64(&mut cur, ent.data.len() as u64);
            write_u32(&mut cur, file_hash_table[bucket]);
            write_u32(&mut cur, ent.name.len() as u32);
            write_name(&mut cur, &ent.name);

            file_hash_table[bucket] = ent.entry_offset;
        }

        // lay out: header | data | dir hash | dir meta | file hash | file meta
        let dir_hash_offset = align_up(DATA_OFFSET + data_size, 4);
        let dir_hash_size = dir_hash_table.len() as u64 * 4;
        let dir_meta_offset = dir_hash_offset + dir_hash_size;
        let file_hash_offset = dir_meta_offset + dir_table.len() as u64;
        let file_hash_size = file_hash_table.len() as u64 * 4;
        let file_meta_offset = file_hash_offset + file_hash_size;
        let total_size = file_meta_offset + file_table.len() as u64;

        let header = RomFsHeader {
            header_size: ROMFS_HEADER_SIZE,
            dir_hash_table_offset: dir_hash_offset,
            dir_hash_table_size: dir_hash_size,
            dir_meta_table_offset: dir_meta_offset,
            dir_meta_table_size: dir_table.len() as u64,
            file_hash_table_offset: file_hash_offset,
            file_hash_table_size: file_hash_size,
            file_meta_table_offset: file_meta_offset,
            file_meta_table_size: file_table.len() as u64,
            data_offset: DATA_OFFSET,
        };

        let mut out = vec![0u8; total_size as usize];
        let mut cur = Cursor::new(&mut out[..]);
        header
            .write(&mut cur)
            .expect("BUG: RomFS header serialization failed");

        for &file in &file_order {
            let ent = &self.files[file];
            let at = (DATA_OFFSET + ent.data_offset) as usize;
            out[at..at + ent.data.len()].copy_from_slice(&ent.data);
        }

        let mut at = dir_hash_offset as usize;
        for hash in dir_hash_table {
            out[at..at + 4].copy_from_slice(&hash.to_le_bytes());
            at += 4;
        }
        out[at..at + dir_table.len()].copy_from_slice(&dir_table);
        at += dir_table.len();
        for hash in file_hash_table {
            out[at..at + 4].copy_from_slice(&hash.to_le_bytes());
            at += 4;
        }
        out[at..at + file_table.len()].copy_from_slice(&file_table);

        out
    }

    fn next_sibling_dir(&self, dir: usize) -> u32 {
        let parent = &self.dirs[self.dirs[dir].parent];
        if self.dirs[dir].parent == dir {
            // the root is its own parent and has no siblings
            return ENTRY_NONE;
        }
        parent
            .children
            .windows(2)
            .find(|w| w[0] == dir)
            .map(|w| self.dirs[w[1]].entry_offset)
            .unwrap_or(ENTRY_NONE)
    }

    fn next_sibling_file(&self, file: usize) -> u32 {
        let parent = &self.dirs[self.files[file].parent];
        parent
            .files
            .windows(2)
            .find(|w| w[0] == file)
            .map(|w| self.files[w[1]].entry_offset)
            .unwrap_or(ENTRY_NONE)
    }
}

fn write_u32(cur: &mut Cursor<&mut [u8]>, value: u32) {
    use std::io::Write;
    cur.write_all(&value.to_le_bytes())
        .expect("BUG: meta table overflow");
}

fn write_u64(cur: &mut Cursor<&mut [u8]>, value: u64) {
    use std::io::Write;
    cur.write_all(&value.to_le_bytes())
        .expect("BUG: meta table overflow");
}

fn write_name(cur: &mut Cursor<&mut [u8]>, name: &str) {
    use std::io::Write;
    cur.write_all(name.as_bytes())
        .expect("BUG: meta table overflow");
}
