mod builder;
mod dictionary;
mod structs;
mod tables;

use crate::filesystem as fstraits;
use crate::formats::romfs::dictionary::RomFsDictionary;
use crate::formats::romfs::structs::{
    DirectoryRomEntry, FileRomEntry, FindPosition, RomFileInfo, RomFsHeader,
};
use crate::formats::romfs::tables::HierarchicalRomTables;
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;

pub use builder::RomFsBuilder;
pub use structs::{RomId, ROMFS_HEADER_SIZE};

#[derive(Snafu, Debug)]
pub enum RomFsError {
    #[snafu(display("Failed to parse the RomFS header"))]
    Parse { source: binrw::Error },
    #[snafu(display("RomFS table or file lies outside the image"))]
    Slice { source: SliceStorageError },
}

/// RomFS: a hash-bucketed hierarchy of directories and files over a data
/// region.
#[derive(Debug)]
pub struct RomFileSystem<S: ReadableStorage> {
    storage: SharedStorage<S>,
    table: HierarchicalRomTables,
    data_offset: u64,
}

pub type FileStorage<S> = SliceStorage<SharedStorage<S>>;

pub struct Directory<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    position: FindPosition,
}

pub struct File<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    name: &'a str,
    info: RomFileInfo,
}

impl<'a, S: ReadableStorage> Directory<'a, S> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn entries(&self) -> DirectoryIter<'a, S> {
        DirectoryIter {
            fs: self.fs,
            position: self.position,
        }
    }
}

impl<'a, S: ReadableStorage> File<'a, S> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn storage(&self) -> Result<FileStorage<S>, RomFsError> {
        let storage = self.fs.storage.clone();
        let offset = self.info.offset + self.fs.data_offset;
        let size = self.info.size;
        SliceStorage::new(storage, offset, size).context(SliceSnafu)
    }
}

impl<'a, S: ReadableStorage> fstraits::ReadableFile for File<'a, S> {
    type Storage = FileStorage<S>;
    type Error = RomFsError;

    fn name(&self) -> &str {
        self.name
    }

    fn size(&self) -> u64 {
        self.info.size
    }

    fn storage(&self) -> Result<Self::Storage, Self::Error> {
        File::storage(self)
    }
}

impl<'a, S: ReadableStorage> fstraits::ReadableDirectory for Directory<'a, S> {
    type File = File<'a, S>;
    type Iter = DirectoryIter<'a, S>;

    fn name(&self) -> &str {
        self.name
    }

    fn entries(&self) -> Self::Iter {
        Directory::entries(self)
    }
}

impl<'a, S: ReadableStorage> Debug for Directory<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("name", &self.name)
            .field("position", &self.position)
            .finish()
    }
}

impl<'a, S: ReadableStorage> Debug for File<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("info", &self.info)
            .finish()
    }
}

pub type Entry<'a, S> = fstraits::Entry<File<'a, S>, Directory<'a, S>>;

pub struct DirectoryIter<'a, S: ReadableStorage> {
    fs: &'a RomFileSystem<S>,
    position: FindPosition,
}

impl<'a, S: ReadableStorage> Iterator for DirectoryIter<'a, S> {
    type Item = Entry<'a, S>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((name, position)) = self.fs.table.next_directory(&mut self.position) {
            return Some(fstraits::Entry::Directory(Directory {
                fs: self.fs,
                name,
                position,
            }));
        }
        if let Some((name, info)) = self.fs.table.next_file(&mut self.position) {
            return Some(fstraits::Entry::File(File {
                fs: self.fs,
                name,
                info,
            }));
        }

        None
    }
}

impl<S: ReadableStorage> RomFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, RomFsError> {
        let storage = storage.shared();
        let mut io = storage.clone().buf_read();

        let header = RomFsHeader::read(&mut io).context(ParseSnafu)?;

        let dir_hash_table = storage
            .clone()
            .slice(header.dir_hash_table_offset, header.dir_hash_table_size)
            .context(SliceSnafu)?;
        let dir_meta_table = storage
            .clone()
            .slice(header.dir_meta_table_offset, header.dir_meta_table_size)
            .context(SliceSnafu)?;
        let file_hash_table = storage
            .clone()
            .slice(header.file_hash_table_offset, header.file_hash_table_size)
            .context(SliceSnafu)?;
        let file_meta_table = storage
            .clone()
            .slice(header.file_meta_table_offset, header.file_meta_table_size)
            .context(SliceSnafu)?;

        let directories =
            RomFsDictionary::<DirectoryRomEntry>::from_storage(dir_hash_table, dir_meta_table)
                .context(ParseSnafu)?;
        let files = RomFsDictionary::<FileRomEntry>::from_storage(file_hash_table, file_meta_table)
            .context(ParseSnafu)?;

        let table = HierarchicalRomTables::new(files, directories);

        Ok(Self {
            storage,
            table,
            data_offset: header.data_offset,
        })
    }

    pub fn root(&self) -> Directory<'_, S> {
        let (name, position) = self
            .table
            .get_directory("/")
            .expect("Malformed RomFS: no root directory");

        Directory {
            fs: self,
            name,
            position,
        }
    }

    pub fn open_directory(&self, path: &str) -> Option<Directory<'_, S>> {
        let (name, position) = self.table.get_directory(path)?;

        Some(Directory {
            fs: self,
            name,
            position,
        })
    }

    pub fn open_file(&self, path: &str) -> Option<File<'_, S>> {
        let (name, info) = self.table.get_file(path)?;

        Some(File {
            fs: self,
            name,
            info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    fn sample_image() -> Vec<u8> {
        let mut builder = RomFsBuilder::new();
        builder.add_file("/hello.txt", b"Hello RomFS".to_vec());
        builder.add_file("/sub/dir/nested.bin", vec![0xAA; 0x30]);
        builder.add_file("/sub/other.bin", vec![0x55; 0x10]);
        builder.build()
    }

    #[test]
    fn open_files_by_path() {
        let fs = RomFileSystem::new(VecStorage::new(sample_image())).unwrap();

        let file = fs.open_file("/hello.txt").unwrap();
        assert_eq!(file.size(), 11);
        assert_eq!(file.storage().unwrap().read_all().unwrap(), b"Hello RomFS");

        let nested = fs.open_file("/sub/dir/nested.bin").unwrap();
        assert_eq!(nested.storage().unwrap().read_all().unwrap(), vec![0xAA; 0x30]);

        assert!(fs.open_file("/sub/dir/missing.bin").is_none());
        assert!(fs.open_file("/hello.txt/not-a-dir").is_none());
    }

    fn collect_paths<S: ReadableStorage>(prefix: &str, dir: &Directory<'_, S>, out: &mut Vec<String>) {
        for entry in dir.entries() {
            match entry {
                fstraits::Entry::Directory(d) => {
                    let path = format!("{}/{}", prefix, d.name());
                    collect_paths(&path, &d, out);
                    out.push(path);
                }
                fstraits::Entry::File(f) => out.push(format!("{}/{}", prefix, f.name())),
            }
        }
    }

    #[test]
    fn directory_walk() {
        let fs = RomFileSystem::new(VecStorage::new(sample_image())).unwrap();

        let sub = fs.open_directory("/sub").unwrap();
        assert_eq!(sub.name(), "sub");
        assert!(fs.open_directory("/nope").is_none());

        let mut paths = Vec::new();
        collect_paths("", &fs.root(), &mut paths);
        paths.sort();
        assert_eq!(
            paths,
            [
                "/hello.txt",
                "/sub",
                "/sub/dir",
                "/sub/dir/nested.bin",
                "/sub/other.bin"
            ]
        );
    }
}
