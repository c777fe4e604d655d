use crate::hexstring::HexData;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use binrw::{BinRead, BinWrite};
use hex::FromHexError;
use snafu::Snafu;
use std::fmt::Debug;
use std::str::FromStr;

pub mod keyset;
pub mod signature;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

#[derive(Snafu, Debug)]
pub enum KeyParseError {
    InvalidLength { expected: usize, actual: usize },
    InvalidChar { char: char, index: usize },
}

/// A raw AES-128 key.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct AesKey(pub [u8; 0x10]);

/// An AES-128-XTS key pair (data key then tweak key).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct AesXtsKey(pub [u8; 0x20]);

/// A key-area entry still wrapped under a key-area key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct EncryptedAesKey(pub HexData<0x10>);

/// An XTS key pair still wrapped under a key-area key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, BinRead, BinWrite)]
pub struct EncryptedAesXtsKey(pub HexData<0x20>);

/// An external title key, wrapped under the title kek of its generation.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct AccessKey(pub [u8; 0x10]);

impl Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HexData(self.0))
    }
}

impl Debug for AesXtsKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HexData(self.0))
    }
}

impl Debug for AccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", HexData(self.0))
    }
}

pub(crate) fn parse_key(s: &str, result: &mut [u8]) -> Result<(), KeyParseError> {
    hex::decode_to_slice(s, result).map_err(|e| match e {
        FromHexError::InvalidHexCharacter { c, index } => {
            KeyParseError::InvalidChar { char: c, index }
        }
        FromHexError::OddLength | FromHexError::InvalidStringLength => {
            KeyParseError::InvalidLength {
                expected: result.len() * 2,
                actual: s.len(),
            }
        }
    })?;
    Ok(())
}

impl FromStr for AesKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_key(s, &mut result).map(|_| AesKey(result))
    }
}

impl FromStr for AesXtsKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x20];
        parse_key(s, &mut result).map(|_| AesXtsKey(result))
    }
}

impl FromStr for AccessKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut result = [0; 0x10];
        parse_key(s, &mut result).map(|_| AccessKey(result))
    }
}

impl AesKey {
    /// XOR the buffer with the AES-CTR keystream starting at `ctr`.
    /// Symmetric, so this is also the encrypt direction.
    pub fn decrypt_ctr(&self, data: &mut [u8], ctr: &[u8; 0x10]) {
        let mut cipher = Aes128Ctr::new(&self.0.into(), ctr.into());
        cipher.apply_keystream(data);
    }

    pub fn encrypt_ctr(&self, data: &mut [u8], ctr: &[u8; 0x10]) {
        self.decrypt_ctr(data, ctr)
    }

    /// Single-block AES-ECB decrypt, used to unwrap wrapped keys. Safe here
    /// only because each wrapped key is an independent random block.
    fn unwrap_block(&self, block: &mut [u8]) {
        let cipher = Aes128::new(&self.0.into());
        cipher.decrypt_block(block.into());
    }

    fn wrap_block(&self, block: &mut [u8]) {
        let cipher = Aes128::new(&self.0.into());
        cipher.encrypt_block(block.into());
    }

    /// Unwrap a key-area entry with this key acting as the key-area key.
    pub fn unwrap_key(&self, key: EncryptedAesKey) -> AesKey {
        let mut data = key.0 .0;
        self.unwrap_block(&mut data);
        AesKey(data)
    }

    pub fn unwrap_xts_key(&self, key: EncryptedAesXtsKey) -> AesXtsKey {
        let mut data = key.0 .0;
        self.unwrap_block(&mut data[..0x10]);
        self.unwrap_block(&mut data[0x10..]);
        AesXtsKey(data)
    }

    /// Inverse of [`unwrap_key`](Self::unwrap_key); the builder-side tests
    /// use this to author wrapped key areas.
    pub fn wrap_key(&self, key: AesKey) -> EncryptedAesKey {
        let mut data = key.0;
        self.wrap_block(&mut data);
        EncryptedAesKey(HexData(data))
    }
}

impl AccessKey {
    /// Unwrap into the section content key using the title kek of the NCA's
    /// key generation.
    pub fn decrypt(&self, title_kek: AesKey) -> AesKey {
        title_kek.unwrap_key(EncryptedAesKey(HexData(self.0)))
    }

    pub fn encrypt(title_key: AesKey, title_kek: AesKey) -> AccessKey {
        AccessKey(title_kek.wrap_key(title_key).0 .0)
    }
}

/// Nintendo numbers XTS sectors big-endian, unlike the little-endian
/// convention of IEEE 1619.
fn xts_tweak(sector: u64) -> [u8; 0x10] {
    (sector as u128).to_be_bytes()
}

impl AesXtsKey {
    fn make_xts(&self) -> xts_mode::Xts128<Aes128> {
        use aes::cipher::generic_array::GenericArray;
        let data_key = Aes128::new(GenericArray::from_slice(&self.0[..0x10]));
        let tweak_key = Aes128::new(GenericArray::from_slice(&self.0[0x10..]));
        xts_mode::Xts128::new(data_key, tweak_key)
    }

    /// Decrypt whole sectors in place. `sector` numbers the first sector of
    /// `data`; consecutive sectors increment it.
    pub fn decrypt(&self, data: &mut [u8], mut sector: u64, sector_size: usize) {
        debug_assert_eq!(data.len() % sector_size, 0);
        let xts = self.make_xts();
        for chunk in data.chunks_exact_mut(sector_size) {
            xts.decrypt_sector(chunk, xts_tweak(sector));
            sector += 1;
        }
    }

    pub fn encrypt(&self, data: &mut [u8], mut sector: u64, sector_size: usize) {
        debug_assert_eq!(data.len() % sector_size, 0);
        let xts = self.make_xts();
        for chunk in data.chunks_exact_mut(sector_size) {
            xts.encrypt_sector(chunk, xts_tweak(sector));
            sector += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AesKey = AesKey([0x42; 0x10]);

    #[test]
    fn ctr_roundtrip() {
        let mut data = *b"the quick brown fox jumps over the lazy dog!!!!!";
        let ctr = [0x01; 0x10];

        KEY.encrypt_ctr(&mut data, &ctr);
        assert_ne!(&data[..], b"the quick brown fox jumps over the lazy dog!!!!!");
        KEY.decrypt_ctr(&mut data, &ctr);
        assert_eq!(&data[..], b"the quick brown fox jumps over the lazy dog!!!!!");
    }

    #[test]
    fn ctr_keystream_is_seekable() {
        // decrypting the second block alone must match decrypting both
        let mut whole = [0xAB; 0x20];
        let ctr = [0x07; 0x10];
        KEY.decrypt_ctr(&mut whole, &ctr);

        let mut second = [0xAB; 0x10];
        let next_ctr = (u128::from_be_bytes(ctr) + 1).to_be_bytes();
        KEY.decrypt_ctr(&mut second, &next_ctr);

        assert_eq!(whole[0x10..], second);
    }

    #[test]
    fn xts_roundtrip_distinct_sectors() {
        let key = AesXtsKey([0x13; 0x20]);
        let mut data = vec![0x55u8; 0x400];

        key.encrypt(&mut data, 0, 0x200);
        // identical plaintext sectors must not produce identical ciphertext
        assert_ne!(data[..0x200], data[0x200..]);

        key.decrypt(&mut data, 0, 0x200);
        assert!(data.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn key_wrap_roundtrip() {
        let kek = AesKey([0x99; 0x10]);
        let plain = AesKey([0x12; 0x10]);

        let wrapped = kek.wrap_key(plain);
        assert_eq!(kek.unwrap_key(wrapped), plain);
    }
}
