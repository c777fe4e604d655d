use crate::crypto::AesKey;
use crate::formats::nca::bucket_tree::{BucketTree, RelocationEntry, SubsectionEntry};
use crate::storage::{clamp_read_len, ReadableStorage, ReadableStorageExt, StorageError};

pub use crate::formats::nca::bucket_tree::BucketTreeError;

/// Splices a base section and a patch section into the patched view:
/// every read range is routed byte-for-byte to one of the two sources by
/// the relocation bucket tree.
#[derive(Debug)]
pub struct IndirectStorage<B, P> {
    base: B,
    patch: P,
    table: BucketTree<RelocationEntry>,
}

impl<B: ReadableStorage, P: ReadableStorage> IndirectStorage<B, P> {
    pub fn new(base: B, patch: P, table: BucketTree<RelocationEntry>) -> Self {
        Self { base, patch, table }
    }

    pub fn table(&self) -> &BucketTree<RelocationEntry> {
        &self.table
    }
}

impl<B: ReadableStorage, P: ReadableStorage> ReadableStorage for IndirectStorage<B, P> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let total = clamp_read_len(self.get_size(), offset, buf.len());
        let end = offset + total as u64;

        let mut pos = offset;
        for (range, entry) in self.table.lookup_iter(offset) {
            if pos >= end {
                break;
            }

            let seg_end = std::cmp::min(range.end, end);
            let chunk = &mut buf[(pos - offset) as usize..(seg_end - offset) as usize];
            let source_offset = entry.source_offset + (pos - range.start);

            match entry.source {
                RelocationEntry::SOURCE_BASE => self.base.read_exact(source_offset, chunk)?,
                RelocationEntry::SOURCE_PATCH => self.patch.read_exact(source_offset, chunk)?,
                _ => return Err(StorageError::OutOfBounds {}),
            }

            pos = seg_end;
        }

        Ok(total)
    }

    fn get_size(&self) -> u64 {
        self.table.end_offset()
    }
}

/// AES-CTR with the counter generation overridden per physical extent by
/// the subsection bucket tree. The extents cover the patched data; a final
/// extent with the header's own generation covers the bucket trees
/// themselves, which are encrypted with the plain section counter.
pub struct AesCtrExStorage<S> {
    storage: S,
    key: AesKey,
    upper_counter: u64,
    /// Absolute offset of the section within the NCA; the low counter half
    /// counts AES blocks from the start of the file.
    base_offset: u64,
    table: BucketTree<SubsectionEntry>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for AesCtrExStorage<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCtrExStorage")
            .field("storage", &self.storage)
            .field("base_offset", &self.base_offset)
            .finish_non_exhaustive()
    }
}

impl<S: ReadableStorage> AesCtrExStorage<S> {
    pub fn new(
        storage: S,
        key: AesKey,
        upper_counter: u64,
        base_offset: u64,
        table: BucketTree<SubsectionEntry>,
    ) -> Self {
        Self {
            storage,
            key,
            upper_counter,
            base_offset,
            table,
        }
    }

    fn nonce_at(&self, generation: u32, absolute_offset: u64) -> [u8; 0x10] {
        let mut nonce = [0; 0x10];
        nonce[..8].copy_from_slice(&self.upper_counter.to_be_bytes());
        nonce[4..8].copy_from_slice(&generation.to_be_bytes());
        nonce[8..].copy_from_slice(&(absolute_offset / 0x10).to_be_bytes());
        nonce
    }
}

impl<S: ReadableStorage> ReadableStorage for AesCtrExStorage<S> {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let total = clamp_read_len(self.get_size(), offset, buf.len());
        let end = offset + total as u64;

        let mut pos = offset;
        for (range, entry) in self.table.lookup_iter(offset) {
            if pos >= end {
                break;
            }

            let seg_end = std::cmp::min(range.end, end);

            // widen to AES block bounds; subsection boundaries are 16-byte
            // aligned, so the widened range stays inside the extent
            let aligned_start = pos & !0xF;
            let aligned_end = std::cmp::min(range.end, (seg_end + 0xF) & !0xF);

            let mut scratch = vec![0u8; (aligned_end - aligned_start) as usize];
            self.storage.read_exact(aligned_start, &mut scratch)?;

            let nonce = self.nonce_at(entry.generation, self.base_offset + aligned_start);
            self.key.decrypt_ctr(&mut scratch, &nonce);

            let skip = (pos - aligned_start) as usize;
            let len = (seg_end - pos) as usize;
            buf[(pos - offset) as usize..][..len].copy_from_slice(&scratch[skip..skip + len]);

            pos = seg_end;
        }

        Ok(total)
    }

    fn get_size(&self) -> u64 {
        self.storage.get_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    #[test]
    fn indirect_routes_ranges_and_subdivides_reads() {
        // virtual image: 0x00..0x20 from base, 0x20..0x30 from patch
        // (stored at patch offset 8), 0x30..0x40 from base again
        let base: Vec<u8> = (0..0x40).collect();
        let patch: Vec<u8> = (0..0x20).map(|i| 0x80 + i).collect();

        let table = BucketTree::new(
            vec![
                RelocationEntry {
                    virtual_offset: 0,
                    source_offset: 0,
                    source: RelocationEntry::SOURCE_BASE,
                },
                RelocationEntry {
                    virtual_offset: 0x20,
                    source_offset: 8,
                    source: RelocationEntry::SOURCE_PATCH,
                },
                RelocationEntry {
                    virtual_offset: 0x30,
                    source_offset: 0x30,
                    source: RelocationEntry::SOURCE_BASE,
                },
            ],
            0x40,
        )
        .unwrap();

        let storage = IndirectStorage::new(VecStorage::new(base), VecStorage::new(patch), table);

        let image = storage.read_all().unwrap();
        assert_eq!(&image[..0x20], &(0..0x20).collect::<Vec<u8>>()[..]);
        assert_eq!(&image[0x20..0x30], &(0x88..0x98).collect::<Vec<u8>>()[..]);
        assert_eq!(&image[0x30..], &(0x30..0x40).collect::<Vec<u8>>()[..]);

        // a read spanning all three intervals
        let mut spanning = [0u8; 0x22];
        storage.read_exact(0x1F, &mut spanning).unwrap();
        assert_eq!(spanning[0], 0x1F);
        assert_eq!(spanning[1], 0x88);
        assert_eq!(spanning[0x11], 0x30);
    }

    #[test]
    fn ctr_ex_overrides_generation_per_extent() {
        let key = AesKey([0x21; 0x10]);
        let upper_counter = 0x4142_4344_0000_0007u64;
        let base_offset = 0x4000;

        let plain: Vec<u8> = (0..0x60u32).map(|i| i as u8).collect();

        // encrypt two extents with different generations, mimicking what a
        // real patch section stores
        let make_nonce = |generation: u32, abs: u64| {
            let mut nonce = [0u8; 0x10];
            nonce[..8].copy_from_slice(&upper_counter.to_be_bytes());
            nonce[4..8].copy_from_slice(&generation.to_be_bytes());
            nonce[8..].copy_from_slice(&(abs / 0x10).to_be_bytes());
            nonce
        };

        let mut cipher = plain.clone();
        key.encrypt_ctr(&mut cipher[..0x30], &make_nonce(5, base_offset));
        key.encrypt_ctr(&mut cipher[0x30..], &make_nonce(9, base_offset + 0x30));

        let subsections = vec![
            SubsectionEntry {
                offset: 0,
                reserved: 0,
                generation: 5,
            },
            SubsectionEntry {
                offset: 0x30,
                reserved: 0,
                generation: 9,
            },
        ];

        let storage = AesCtrExStorage::new(
            VecStorage::new(cipher),
            key,
            upper_counter,
            base_offset,
            BucketTree::new(subsections, 0x60).unwrap(),
        );

        assert_eq!(storage.read_all().unwrap(), plain);

        // unaligned read crossing the extent boundary
        let mut cross = [0u8; 0x15];
        storage.read_exact(0x2B, &mut cross).unwrap();
        assert_eq!(&cross[..], &plain[0x2B..0x40]);
    }
}
