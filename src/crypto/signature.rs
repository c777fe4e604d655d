use rsa::{BigUint, Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use snafu::Snafu;

/// Result of a best-effort RSA-PSS check. `Unchecked` means the material
/// needed to verify was not available; it is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVerdict {
    Valid,
    Invalid,
    Unchecked,
}

#[derive(Snafu, Debug)]
pub enum SignatureError {
    #[snafu(display("Malformed RSA public modulus"))]
    BadModulus { source: rsa::Error },
    #[snafu(display("RSA-PSS verification failed"))]
    InvalidSignature { source: rsa::Error },
    #[snafu(display("RSA-OAEP decryption failed"))]
    OaepDecrypt { source: rsa::Error },
    #[snafu(display("RSA-OAEP produced a key area of {} bytes, expected {}", actual, expected))]
    OaepKeyAreaSize { expected: usize, actual: usize },
}

const RSA_EXPONENT: u32 = 0x10001;

/// RSA-2048-PSS-SHA-256 with a 32-byte salt over `message`, against a raw
/// big-endian modulus (exponent 65537).
pub fn verify_pss(
    modulus: &[u8; 0x100],
    message: &[u8],
    signature: &[u8; 0x100],
) -> Result<(), SignatureError> {
    let key = RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from(RSA_EXPONENT),
    )
    .map_err(|source| SignatureError::BadModulus { source })?;

    let digest = Sha256::digest(message);

    key.verify(
        Pss::new_with_salt::<Sha256>(0x20),
        &digest,
        &signature[..],
    )
    .map_err(|source| SignatureError::InvalidSignature { source })
}

/// Like [`verify_pss`], but collapses the outcome into a verdict instead of
/// an error, for the callers that must never abort on a bad signature.
pub fn check_pss(
    modulus: Option<&[u8; 0x100]>,
    message: &[u8],
    signature: &[u8; 0x100],
) -> SignatureVerdict {
    match modulus {
        None => SignatureVerdict::Unchecked,
        Some(modulus) => match verify_pss(modulus, message, signature) {
            Ok(()) => SignatureVerdict::Valid,
            Err(_) => SignatureVerdict::Invalid,
        },
    }
}

/// Unwrap an NCA0 key area: a 0x100-byte RSA-2048-OAEP-SHA-256 blob holding
/// the four 16-byte section keys.
pub fn unwrap_nca0_key_area(
    key: &RsaPrivateKey,
    blob: &[u8; 0x100],
) -> Result<[u8; 0x40], SignatureError> {
    let plain = key
        .decrypt(Oaep::new::<Sha256>(), blob)
        .map_err(|source| SignatureError::OaepDecrypt { source })?;

    plain
        .as_slice()
        .try_into()
        .map_err(|_| SignatureError::OaepKeyAreaSize {
            expected: 0x40,
            actual: plain.len(),
        })
}

/// Inverse of [`unwrap_nca0_key_area`]; exists for authoring fixtures.
pub fn wrap_nca0_key_area(
    key: &RsaPublicKey,
    keys: &[u8; 0x40],
    rng: &mut (impl rsa::rand_core::CryptoRng + rsa::rand_core::RngCore),
) -> Result<[u8; 0x100], SignatureError> {
    let blob = key
        .encrypt(rng, Oaep::new::<Sha256>(), keys)
        .map_err(|source| SignatureError::OaepDecrypt { source })?;
    blob.as_slice()
        .try_into()
        .map_err(|_| SignatureError::OaepKeyAreaSize {
            expected: 0x100,
            actual: blob.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    #[test]
    fn oaep_roundtrip() {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);

        let keys = [0x5Au8; 0x40];
        let blob = wrap_nca0_key_area(&public, &keys, &mut rng).unwrap();
        assert_eq!(unwrap_nca0_key_area(&private, &blob).unwrap(), keys);
    }

    #[test]
    fn pss_detects_tampering() {
        use rsa::signature::{RandomizedSigner, SignatureEncoding};

        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public = RsaPublicKey::from(&private);

        let message = b"header bytes under test";
        let signing_key = rsa::pss::SigningKey::<Sha256>::new_with_salt_len(private, 0x20);
        let signature: [u8; 0x100] = signing_key
            .sign_with_rng(&mut rng, message)
            .to_bytes()
            .as_ref()
            .try_into()
            .unwrap();

        let mut modulus = [0u8; 0x100];
        modulus.copy_from_slice(&public.n().to_bytes_be());

        assert_eq!(
            check_pss(Some(&modulus), message, &signature),
            SignatureVerdict::Valid
        );
        assert_eq!(
            check_pss(Some(&modulus), b"tampered message", &signature),
            SignatureVerdict::Invalid
        );
        assert_eq!(
            check_pss(None, message, &signature),
            SignatureVerdict::Unchecked
        );
    }
}
