use crate::storage::{ReadableStorage, StorageError};
use std::fmt::Debug;

/// Two storages glued back to back.
pub struct ConcatStorage2<Left, Right> {
    left: Left,
    right: Right,
}

impl<Left: ReadableStorage, Right: ReadableStorage> ConcatStorage2<Left, Right> {
    pub fn new(left: Left, right: Right) -> Self {
        Self { left, right }
    }
}

impl<Left: ReadableStorage, Right: ReadableStorage> ReadableStorage
    for ConcatStorage2<Left, Right>
{
    fn read(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<usize, StorageError> {
        let left_size = self.left.get_size();
        let mut total = 0;

        if offset < left_size {
            let end = std::cmp::min(offset + buf.len() as u64, left_size);
            let len = (end - offset) as usize;

            total += self.left.read(offset, &mut buf[..len])?;

            offset += len as u64;
            buf = &mut buf[len..];
        }

        if !buf.is_empty() {
            total += self.right.read(offset - left_size, buf)?;
        }

        Ok(total)
    }

    fn get_size(&self) -> u64 {
        self.left.get_size() + self.right.get_size()
    }
}

/// An arbitrary number of storages glued back to back; segments cover the
/// address space contiguously from zero in declaration order.
pub struct ConcatStorageN<S> {
    storages: Vec<S>,
}

impl<S: ReadableStorage> ConcatStorageN<S> {
    pub fn new(storages: Vec<S>) -> Self {
        Self { storages }
    }
}

impl<S> Debug for ConcatStorageN<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcatStorageN")
            .field("storages", &self.storages.len())
            .finish()
    }
}

impl<S: ReadableStorage> ReadableStorage for ConcatStorageN<S> {
    fn read(&self, mut offset: u64, mut buf: &mut [u8]) -> Result<usize, StorageError> {
        let mut total = 0;
        for storage in &self.storages {
            let size = storage.get_size();

            if offset < size {
                let end = std::cmp::min(offset + buf.len() as u64, size);
                let len = (end - offset) as usize;

                total += storage.read(offset, &mut buf[..len])?;

                offset += len as u64;
                buf = &mut buf[len..];
            }

            if buf.is_empty() {
                break;
            }
            offset -= size;
        }

        Ok(total)
    }

    fn get_size(&self) -> u64 {
        self.storages.iter().map(|s| s.get_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VecStorage;

    #[test]
    fn concat_spans_segments() {
        let concat = ConcatStorageN::new(vec![
            VecStorage::new(vec![1, 2, 3]),
            VecStorage::new(vec![4, 5]),
            VecStorage::new(vec![6, 7, 8, 9]),
        ]);

        assert_eq!(concat.get_size(), 9);

        let mut buf = [0; 5];
        assert_eq!(concat.read(2, &mut buf).unwrap(), 5);
        assert_eq!(buf, [3, 4, 5, 6, 7]);
    }

    #[test]
    fn concat_short_read_at_end() {
        let concat = ConcatStorage2::new(VecStorage::new(vec![1, 2]), VecStorage::new(vec![3]));

        let mut buf = [0; 4];
        assert_eq!(concat.read(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }
}
