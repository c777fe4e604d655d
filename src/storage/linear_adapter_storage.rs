use crate::storage::{
    clamp_read_len, ReadableBlockStorage, ReadableBlockStorageExt, ReadableStorage, StorageError,
};

/// Exposes a block storage as a linear one, splitting every read into an
/// unaligned head, a bulk-aligned body and an unaligned tail.
#[derive(Debug)]
pub struct LinearAdapterStorage<S: ReadableBlockStorage> {
    storage: S,
}

impl<S: ReadableBlockStorage> LinearAdapterStorage<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn inner(&self) -> &S {
        &self.storage
    }
}

impl<S: ReadableBlockStorage> ReadableStorage for LinearAdapterStorage<S> {
    fn read(&self, mut offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let block_size = self.storage.block_size();
        let total = clamp_read_len(self.get_size(), offset, buf.len());
        let mut buf = &mut buf[..total];

        let mut block_buffer = vec![0u8; block_size as usize];

        // head: unaligned start
        let head_offset = offset % block_size;
        if head_offset != 0 && !buf.is_empty() {
            let head_index = offset / block_size;
            let head_block_size = self.storage.nth_block_size(head_index);
            self.storage
                .read_block(head_index, &mut block_buffer[..head_block_size as usize])?;
            let head_len = std::cmp::min(head_block_size - head_offset, buf.len() as u64) as usize;
            buf[..head_len]
                .copy_from_slice(&block_buffer[head_offset as usize..][..head_len]);

            offset += head_len as u64;
            buf = &mut buf[head_len..];
        }

        // body: whole blocks
        let body_blocks = buf.len() as u64 / block_size;
        if body_blocks != 0 {
            let body_len = (body_blocks * block_size) as usize;
            self.storage
                .read_block_bulk(offset / block_size, &mut buf[..body_len])?;
            offset += body_len as u64;
            buf = &mut buf[body_len..];
        }

        // tail: unaligned end (possibly a short trailing block)
        if !buf.is_empty() {
            let tail_index = offset / block_size;
            let tail_block_size = self.storage.nth_block_size(tail_index);
            self.storage
                .read_block(tail_index, &mut block_buffer[..tail_block_size as usize])?;
            let len = buf.len();
            buf.copy_from_slice(&block_buffer[..len]);
        }

        Ok(total)
    }

    fn get_size(&self) -> u64 {
        self.storage.get_size()
    }
}
