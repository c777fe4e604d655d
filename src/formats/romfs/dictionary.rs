use crate::formats::romfs::structs::{RomFsEntry, RomId};
use crate::storage::{ReadableStorage, ReadableStorageExt};
use binrw::{BinRead, BinWrite};
use std::marker::PhantomData;

/// One of the two RomFS dictionaries (directories or files): a hash-bucket
/// table pointing into a packed entry table, chained through each entry's
/// `next` pointer.
#[derive(Debug)]
pub struct RomFsDictionary<
    T: for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + 'static,
> {
    buckets: Vec<RomId>,
    entries: Vec<u8>,
    phantom: PhantomData<T>,
}

impl<T: for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + 'static>
    RomFsDictionary<T>
{
    pub fn new(buckets: Vec<RomId>, entries: Vec<u8>) -> Self {
        Self {
            buckets,
            entries,
            phantom: PhantomData,
        }
    }

    pub fn from_storage(
        buckets: impl ReadableStorage,
        entries: impl ReadableStorage,
    ) -> Result<Self, binrw::Error> {
        let buckets_data = buckets.read_all().map_err(std_io_err)?;
        let buckets = buckets_data
            .chunks_exact(4)
            .map(|c| RomId(i32::from_le_bytes(c.try_into().unwrap())))
            .collect();
        let entries = entries.read_all().map_err(std_io_err)?;

        Ok(Self::new(buckets, entries))
    }

    pub fn get_offset_from_key(&self, key: RomEntryKey) -> Option<(&str, RomId)> {
        if self.buckets.is_empty() {
            return None;
        }
        let hash = key.hash();
        let index = hash as usize % self.buckets.len();
        let mut id = self.buckets[index];

        while id.is_some() {
            let (name, entry) = self.get_entry_by_id(id);

            if entry.parent == key.parent && name == key.name {
                return Some((name, id));
            }

            id = entry.next;
        }

        None
    }

    pub fn get_entry_by_key(&self, key: RomEntryKey) -> Option<(&str, RomFsEntry<T>)> {
        let (_name, id) = self.get_offset_from_key(key)?;

        Some(self.get_entry_by_id(id))
    }

    pub fn get_entry_by_id(&self, id: RomId) -> (&str, RomFsEntry<T>) {
        assert!(id.is_some());

        let mut cur = std::io::Cursor::new(&self.entries);
        cur.set_position(id.0 as u64);

        let entry = RomFsEntry::read_le(&mut cur).expect("Malformed RomFS entry table");

        let key = &self.entries[cur.position() as usize..][..entry.key_length as usize];
        let key = std::str::from_utf8(key).expect("Invalid UTF-8 in RomFS entry name");

        (key, entry)
    }
}

fn std_io_err(e: crate::storage::StorageError) -> binrw::Error {
    binrw::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RomEntryKey<'a> {
    pub name: &'a str,
    pub parent: RomId,
}

impl<'a> RomEntryKey<'a> {
    pub fn hash(&self) -> u32 {
        let mut hash = 123456789 ^ self.parent.0 as u32;

        for c in self.name.bytes() {
            hash = (c as u32) ^ ((hash << 27) | (hash >> 5));
        }

        hash
    }
}
