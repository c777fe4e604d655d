mod builder;
mod structs;

use crate::filesystem as fstraits;
use crate::storage::{
    ReadableStorage, ReadableStorageExt, SharedStorage, SliceStorage, SliceStorageError,
};
use binrw::BinRead;
use snafu::{ResultExt, Snafu};
use std::fmt::Debug;

pub use builder::PartitionFsBuilder;
pub use structs::{get_string, PartitionFsEntry, PartitionFsHeader};

#[derive(Snafu, Debug)]
#[snafu(display("Failed to parse the PFS0 header"))]
pub struct PfsParseError {
    source: binrw::Error,
}

#[derive(Snafu, Debug)]
#[snafu(display("PFS0 entry lies outside the partition"))]
pub struct PfsOpenError {
    source: SliceStorageError,
}

#[derive(Debug, Copy, Clone)]
struct FileInfo {
    offset: u64,
    size: u64,
}

/// PFS0: a flat table of named files over a contiguous data region.
pub struct PartitionFileSystem<S: ReadableStorage> {
    storage: SharedStorage<S>,
    data_offset: u64,
    /// Table order preserved; PFS0 archives are small enough that name
    /// lookup stays linear.
    files: Vec<(String, FileInfo)>,
}

impl<S: ReadableStorage> Debug for PartitionFileSystem<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionFileSystem")
            .field("data_offset", &self.data_offset)
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

pub type FileStorage<S> = SliceStorage<SharedStorage<S>>;

pub struct File<'a, S: ReadableStorage> {
    fs: &'a PartitionFileSystem<S>,
    name: &'a str,
    info: FileInfo,
}

impl<'a, S: ReadableStorage> File<'a, S> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn size(&self) -> u64 {
        self.info.size
    }

    pub fn storage(&self) -> Result<FileStorage<S>, PfsOpenError> {
        let storage = self.fs.storage.clone();
        let offset = self.fs.data_offset + self.info.offset;
        SliceStorage::new(storage, offset, self.info.size).context(PfsOpenSnafu)
    }
}

impl<'a, S: ReadableStorage> fstraits::ReadableFile for File<'a, S> {
    type Storage = FileStorage<S>;
    type Error = PfsOpenError;

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
        Directory::name(self)
    }

    fn entries(&self) -> Self::Iter {
        Directory::entries(self)
    }
}

impl<'a, S: ReadableStorage> Debug for File<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("offset", &self.info.offset)
            .field("size", &self.info.size)
            .finish()
    }
}

/// The (single, flat) directory of a PFS0.
#[derive(Debug)]
pub struct Directory<'a, S: ReadableStorage> {
    fs: &'a PartitionFileSystem<S>,
}

impl<'a, S: ReadableStorage> Directory<'a, S> {
    pub fn name(&self) -> &str {
        ""
    }

    pub fn entries(&self) -> DirectoryIter<'a, S> {
        DirectoryIter {
            fs: self.fs,
            next: 0,
        }
    }
}

pub struct DirectoryIter<'a, S: ReadableStorage> {
    fs: &'a PartitionFileSystem<S>,
    next: usize,
}

impl<'a, S: ReadableStorage> Iterator for DirectoryIter<'a, S> {
    type Item = fstraits::Entry<File<'a, S>, Directory<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        let (name, info) = self.fs.files.get(self.next)?;
        self.next += 1;
        Some(fstraits::Entry::File(File {
            fs: self.fs,
            name: name.as_str(),
            info: *info,
        }))
    }
}

impl<S: ReadableStorage> PartitionFileSystem<S> {
    pub fn new(storage: S) -> Result<Self, PfsParseError> {
        let mut io = storage.buf_read();

        let header = PartitionFsHeader::read(&mut io).context(PfsParseSnafu)?;
        let data_offset = header.byte_size();

        let files = header
            .file_entries
            .iter()
            .map(|e| {
                let name = get_string(&header.string_table, e.string_table_offset);
                let info = FileInfo {
                    offset: e.offset,
                    size: e.size,
                };
                (name, info)
            })
            .collect();

        let storage = io.into_inner().into_inner().shared();
        Ok(Self {
            storage,
            data_offset,
            files,
        })
    }

    pub fn root(&self) -> Directory<'_, S> {
        Directory { fs: self }
    }

    pub fn open_directory(&self, path: &str) -> Option<Directory<'_, S>> {
        matches!(path, "" | "/").then_some(Directory { fs: self })
    }

    pub fn open_file(&self, path: &str) -> Option<File<'_, S>> {
        let name = path.strip_prefix('/').unwrap_or(path);
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, info)| File {
                fs: self,
                name: n.as_str(),
                info: *info,
            })
    }

    pub fn iter(&self) -> DirectoryIter<'_, S> {
        self.root().entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    #[test]
    fn parse_built_partition() {
        let mut builder = PartitionFsBuilder::new();
        builder.add_file("alpha.bin", vec![1, 2, 3, 4]);
        builder.add_file("beta.txt", b"hello".to_vec());
        let image = builder.build();

        let pfs = PartitionFileSystem::new(VecStorage::new(image)).unwrap();

        let file = pfs.open_file("beta.txt").unwrap();
        assert_eq!(file.size(), 5);
        assert_eq!(file.storage().unwrap().read_all().unwrap(), b"hello");

        let names: Vec<_> = pfs
            .iter()
            .filter_map(|e| e.file())
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(names, ["alpha.bin", "beta.txt"]);

        assert!(pfs.open_file("missing").is_none());
    }
}
