use crate::storage::{ReadableStorage, ReadableStorageExt, StorageError};
use binrw::{BinRead, BinWrite};
use snafu::{ResultExt, Snafu};
use std::io::Cursor;
use std::ops::Range;

/// Nodes of a bucket tree are fixed 0x4000-byte records: one offset node
/// followed by the entry buckets.
pub const NODE_SIZE: u64 = 0x4000;
const NODE_HEADER_SIZE: usize = 0x10;

#[derive(Snafu, Debug)]
pub enum BucketTreeError {
    #[snafu(display("Failed to read bucket tree node"))]
    Storage { source: StorageError },
    #[snafu(display("Failed to parse bucket tree node"))]
    Parse { source: binrw::Error },
    #[snafu(display("Malformed bucket tree: {}", reason))]
    Malformed { reason: &'static str },
}

#[derive(Debug, Clone, Copy, BinRead, BinWrite)]
#[brw(little)]
struct NodeHeader {
    _index: u32,
    count: u32,
    end_offset: u64,
}

/// An entry of a sorted on-disk interval index. The key is the offset where
/// the entry's interval begins; the interval ends where the next entry (or
/// the tree) begins.
pub trait BucketTreeEntry:
    for<'a> BinRead<Args<'a> = ()> + for<'a> BinWrite<Args<'a> = ()> + Copy + Send + Sync + 'static
{
    const ENTRY_SIZE: usize;

    fn key_offset(&self) -> u64;
}

/// Maps a virtual byte range to (base | patch, source offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct RelocationEntry {
    pub virtual_offset: u64,
    pub source_offset: u64,
    /// 0 = base NCA, 1 = patch NCA
    pub source: u32,
}

impl RelocationEntry {
    pub const SOURCE_BASE: u32 = 0;
    pub const SOURCE_PATCH: u32 = 1;
}

impl BucketTreeEntry for RelocationEntry {
    const ENTRY_SIZE: usize = 0x14;

    fn key_offset(&self) -> u64 {
        self.virtual_offset
    }
}

/// Overrides the counter generation for a physical byte range of an
/// AES-CTR-EX section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SubsectionEntry {
    pub offset: u64,
    pub reserved: u32,
    pub generation: u32,
}

impl BucketTreeEntry for SubsectionEntry {
    const ENTRY_SIZE: usize = 0x10;

    fn key_offset(&self) -> u64 {
        self.offset
    }
}

/// A fully parsed bucket tree, flattened into a sorted entry list.
///
/// Trees are small (kilobytes for real patches), so reading them eagerly
/// keeps every later lookup a binary search with no I/O.
#[derive(Debug)]
pub struct BucketTree<E> {
    entries: Vec<E>,
    end_offset: u64,
}

impl<E: BucketTreeEntry> BucketTree<E> {
    pub fn new(entries: Vec<E>, end_offset: u64) -> Result<Self, BucketTreeError> {
        if entries.is_empty() {
            return Err(BucketTreeError::Malformed {
                reason: "tree has no entries",
            });
        }
        if entries[0].key_offset() != 0 {
            return Err(BucketTreeError::Malformed {
                reason: "first entry does not start at offset 0",
            });
        }
        if !entries.windows(2).all(|w| w[0].key_offset() < w[1].key_offset()) {
            return Err(BucketTreeError::Malformed {
                reason: "entry offsets are not strictly ascending",
            });
        }
        if entries.last().unwrap().key_offset() >= end_offset {
            return Err(BucketTreeError::Malformed {
                reason: "last entry starts past the covered range",
            });
        }
        Ok(Self {
            entries,
            end_offset,
        })
    }

    /// Parses the on-disk block at `tree_offset` within `storage`.
    pub fn parse<S: ReadableStorage>(
        storage: &S,
        tree_offset: u64,
        tree_size: u64,
    ) -> Result<Self, BucketTreeError> {
        if tree_size < NODE_SIZE * 2 {
            return Err(BucketTreeError::Malformed {
                reason: "tree is smaller than an offset node plus one bucket",
            });
        }

        let mut node = vec![0; NODE_SIZE as usize];
        storage
            .read_exact(tree_offset, &mut node)
            .context(StorageSnafu)?;
        let offset_node = NodeHeader::read(&mut Cursor::new(&node)).context(ParseSnafu)?;

        let bucket_count = offset_node.count as u64;
        if bucket_count == 0 || NODE_SIZE * (1 + bucket_count) > tree_size {
            return Err(BucketTreeError::Malformed {
                reason: "bucket count does not fit the tree size",
            });
        }

        let mut entries = Vec::new();
        for bucket in 0..bucket_count {
            storage
                .read_exact(tree_offset + NODE_SIZE * (1 + bucket), &mut node)
                .context(StorageSnafu)?;
            let mut cur = Cursor::new(&node);
            let bucket_node = NodeHeader::read(&mut cur).context(ParseSnafu)?;

            let capacity = (NODE_SIZE as usize - NODE_HEADER_SIZE) / E::ENTRY_SIZE;
            if bucket_node.count as usize > capacity {
                return Err(BucketTreeError::Malformed {
                    reason: "bucket entry count exceeds node capacity",
                });
            }
            for _ in 0..bucket_node.count {
                entries.push(E::read_le(&mut cur).context(ParseSnafu)?);
            }
        }

        Self::new(entries, offset_node.end_offset)
    }

    /// Total size of the virtual range the tree covers.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn entries(&self) -> &[E] {
        &self.entries
    }

    /// Iterate `(covered_range, entry)` pairs starting from the entry that
    /// contains `offset`. A reader of `[a, b)` keeps pulling until the
    /// yielded range reaches `b`.
    pub fn lookup_iter(&self, offset: u64) -> BucketTreeIter<'_, E> {
        let index = self
            .entries
            .partition_point(|e| e.key_offset() <= offset)
            .saturating_sub(1);
        BucketTreeIter { tree: self, index }
    }

    /// Serializes to the on-disk node layout. The inverse of [`parse`](Self::parse).
    pub fn write_block(entries: &[E], end_offset: u64) -> Vec<u8> {
        let capacity = (NODE_SIZE as usize - NODE_HEADER_SIZE) / E::ENTRY_SIZE;
        let buckets: Vec<&[E]> = entries.chunks(capacity).collect();

        let mut out = Cursor::new(vec![0u8; NODE_SIZE as usize * (1 + buckets.len())]);

        NodeHeader {
            _index: 0,
            count: buckets.len() as u32,
            end_offset,
        }
        .write(&mut out)
        .expect("BUG: node header serialization failed");
        // offset table: the starting key of every bucket
        for bucket in buckets.iter() {
            bucket[0]
                .key_offset()
                .write_le(&mut out)
                .expect("BUG: offset table serialization failed");
        }

        for (i, bucket) in buckets.iter().enumerate() {
            out.set_position(NODE_SIZE * (1 + i as u64));
            let bucket_end = buckets
                .get(i + 1)
                .map(|next| next[0].key_offset())
                .unwrap_or(end_offset);
            NodeHeader {
                _index: i as u32,
                count: bucket.len() as u32,
                end_offset: bucket_end,
            }
            .write(&mut out)
            .expect("BUG: bucket header serialization failed");
            for entry in bucket.iter() {
                entry
                    .write_le(&mut out)
                    .expect("BUG: entry serialization failed");
            }
        }

        out.into_inner()
    }
}

pub struct BucketTreeIter<'a, E> {
    tree: &'a BucketTree<E>,
    index: usize,
}

impl<'a, E: BucketTreeEntry> Iterator for BucketTreeIter<'a, E> {
    type Item = (Range<u64>, &'a E);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.tree.entries.get(self.index)?;
        let start = entry.key_offset();
        let end = self
            .tree
            .entries
            .get(self.index + 1)
            .map(|e| e.key_offset())
            .unwrap_or(self.tree.end_offset);
        self.index += 1;
        Some((start..end, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    fn sample_entries() -> Vec<RelocationEntry> {
        vec![
            RelocationEntry {
                virtual_offset: 0,
                source_offset: 0,
                source: RelocationEntry::SOURCE_BASE,
            },
            RelocationEntry {
                virtual_offset: 0x100,
                source_offset: 0,
                source: RelocationEntry::SOURCE_PATCH,
            },
            RelocationEntry {
                virtual_offset: 0x180,
                source_offset: 0x180,
                source: RelocationEntry::SOURCE_BASE,
            },
        ]
    }

    #[test]
    fn roundtrip_through_disk_layout() {
        let entries = sample_entries();
        let block = BucketTree::write_block(&entries, 0x1000);
        assert_eq!(block.len(), 0x8000);

        let storage = VecStorage::new(block);
        let tree = BucketTree::<RelocationEntry>::parse(&storage, 0, 0x8000).unwrap();

        assert_eq!(tree.end_offset(), 0x1000);
        assert_eq!(tree.entries(), &entries[..]);
    }

    #[test]
    fn lookup_finds_containing_interval() {
        let tree = BucketTree::new(sample_entries(), 0x1000).unwrap();

        let (range, entry) = tree.lookup_iter(0x17F).next().unwrap();
        assert_eq!(range, 0x100..0x180);
        assert_eq!(entry.source, RelocationEntry::SOURCE_PATCH);

        let covered: Vec<_> = tree.lookup_iter(0x150).map(|(r, _)| r).collect();
        assert_eq!(covered, vec![0x100..0x180, 0x180..0x1000]);
    }

    #[test]
    fn rejects_unsorted_entries() {
        let mut entries = sample_entries();
        entries.swap(1, 2);
        assert!(BucketTree::new(entries, 0x1000).is_err());
    }

    #[test]
    fn multi_bucket_roundtrip() {
        let entries: Vec<SubsectionEntry> = (0..0x500u64)
            .map(|i| SubsectionEntry {
                offset: i * 0x10,
                reserved: 0,
                generation: i as u32,
            })
            .collect();

        let block = BucketTree::write_block(&entries, 0x500 * 0x10);
        let storage = VecStorage::new(block);
        let tree = BucketTree::<SubsectionEntry>::parse(
            &storage,
            0,
            NODE_SIZE * 3,
        )
        .unwrap();
        assert_eq!(tree.entries().len(), 0x500);
        assert_eq!(tree.entries()[0x4FF].generation, 0x4FF);
    }
}
