use crate::formats::romfs::dictionary::{RomEntryKey, RomFsDictionary};
use crate::formats::romfs::structs::{
    DirectoryRomEntry, FileRomEntry, FindPosition, RomFileInfo, RomId,
};

/// Path resolution over the directory and file dictionaries.
#[derive(Debug)]
pub struct HierarchicalRomTables {
    file_table: RomFsDictionary<FileRomEntry>,
    directory_table: RomFsDictionary<DirectoryRomEntry>,
}

impl HierarchicalRomTables {
    pub fn new(
        file_table: RomFsDictionary<FileRomEntry>,
        directory_table: RomFsDictionary<DirectoryRomEntry>,
    ) -> Self {
        Self {
            file_table,
            directory_table,
        }
    }

    /// Walks every component of `path` through the directory table and
    /// returns the id of the final directory. `""` and `"/"` resolve to the
    /// root.
    fn resolve_directory(&self, path: &str) -> Option<RomId> {
        let mut id = self.root_id()?;

        for part in path.split('/').filter(|p| !p.is_empty()) {
            let key = RomEntryKey {
                name: part,
                parent: id,
            };
            (_, id) = self.directory_table.get_offset_from_key(key)?;
        }

        Some(id)
    }

    fn root_id(&self) -> Option<RomId> {
        self.directory_table
            .get_offset_from_key(RomEntryKey {
                name: "",
                parent: RomId(0),
            })
            .map(|(_, id)| id)
    }

    /// Splits a path into its parent directory and final component.
    fn resolve_parent<'a>(&self, path: &'a str) -> Option<(RomId, &'a str)> {
        let path = path.strip_prefix('/').unwrap_or(path);
        let (dir_path, name) = match path.rfind('/') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };
        Some((self.resolve_directory(dir_path)?, name))
    }

    pub fn get_file(&self, path: &str) -> Option<(&str, RomFileInfo)> {
        let (parent, name) = self.resolve_parent(path)?;

        self.file_table
            .get_entry_by_key(RomEntryKey { name, parent })
            .map(|(name, v)| (name, v.value.info))
    }

    pub fn get_directory(&self, path: &str) -> Option<(&str, FindPosition)> {
        let id = self.resolve_directory(path.strip_prefix('/').unwrap_or(path))?;
        let (name, entry) = self.directory_table.get_entry_by_id(id);

        Some((name, entry.value.position))
    }

    pub fn next_file(&self, position: &mut FindPosition) -> Option<(&str, RomFileInfo)> {
        if position.next_file.is_none() {
            return None;
        }

        let (name, entry) = self.file_table.get_entry_by_id(position.next_file);

        position.next_file = entry.value.next_sibling;

        Some((name, entry.value.info))
    }

    pub fn next_directory(&self, position: &mut FindPosition) -> Option<(&str, FindPosition)> {
        if position.next_directory.is_none() {
            return None;
        }

        let (name, entry) = self
            .directory_table
            .get_entry_by_id(position.next_directory);

        position.next_directory = entry.value.next_sibling;

        Some((name, entry.value.position))
    }
}
