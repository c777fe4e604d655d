use crate::storage::{clamp_read_len, ReadableStorage, Storage, StorageError};
use std::fmt::Debug;
use std::sync::RwLock;

pub struct VecStorage {
    data: RwLock<Vec<u8>>,
}

impl Debug for VecStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VecStorage")
            .field("size", &self.get_size())
            .finish()
    }
}

impl VecStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner().unwrap()
    }
}

impl ReadableStorage for VecStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, StorageError> {
        let data = self.data.read().unwrap();

        let len = clamp_read_len(data.len() as u64, offset, buf.len());
        if len == 0 {
            return Ok(0);
        }
        let offset = offset as usize;
        buf[..len].copy_from_slice(&data[offset..offset + len]);
        Ok(len)
    }

    fn get_size(&self) -> u64 {
        let data = self.data.read().unwrap();

        data.len() as u64
    }
}

impl Storage for VecStorage {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap();

        let offset: usize = offset.try_into().map_err(|_| StorageError::OutOfBounds {})?;
        let end = offset + buf.len();
        if end > data.len() {
            return Err(StorageError::OutOfBounds {});
        }
        data[offset..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn set_size(&self, new_size: u64) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap();

        data.resize(new_size as usize, 0);
        Ok(())
    }
}
