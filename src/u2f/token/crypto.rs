use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128,
};
use p256::{
    ecdsa::{signature::hazmat::PrehashSigner, Signature, SigningKey},
    elliptic_curve::sec1::ToEncodedPoint,
    SecretKey,
};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::u2f::error::Error;
use crate::u2f::proto::constants::{AES_BLOCK_SIZE, AES_KEY_SIZE, U2F_EC_KEY_SIZE, U2F_EC_POINT_SIZE};

pub type PrivateKey = [u8; U2F_EC_KEY_SIZE];
pub type PublicPoint = [u8; U2F_EC_POINT_SIZE];
pub type AesKey = [u8; AES_KEY_SIZE];
pub type Sha256Digest = [u8; 32];

/// Cryptographic engine of the token
pub trait Crypto {
    /// Fresh P-256 key pair as a raw scalar and an uncompressed point.
    fn generate_key_pair(&self) -> Result<(PrivateKey, PublicPoint), Error>;

    /// ECDSA P-256 signature over an already computed digest, as raw `(r, s)`.
    fn ecdsa_sign(&self, private_key: &PrivateKey, digest: &Sha256Digest) -> Result<([u8; 32], [u8; 32]), Error>;

    /// AES-128 ECB, in place. `data` must be a whole number of blocks.
    fn aes_encrypt(&self, key: &AesKey, data: &mut [u8]) -> Result<(), Error>;

    fn aes_decrypt(&self, key: &AesKey, data: &mut [u8]) -> Result<(), Error>;

    fn sha256(&self, parts: &[&[u8]]) -> Sha256Digest;

    fn random_bytes(&self, out: &mut [u8]) -> Result<(), Error>;
}

/// `Crypto` over the RustCrypto crates and the OS random source
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftCrypto;

fn check_blocks(data: &[u8]) -> Result<(), Error> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!("{} bytes is not a whole number of AES blocks", data.len())));
    }
    Ok(())
}

impl Crypto for SoftCrypto {
    fn generate_key_pair(&self) -> Result<(PrivateKey, PublicPoint), Error> {
        let secret = SecretKey::random(&mut OsRng);

        let mut private_key = [0u8; U2F_EC_KEY_SIZE];
        private_key.copy_from_slice(&secret.to_bytes());

        let point = secret.public_key().to_encoded_point(false);
        let mut public_point = [0u8; U2F_EC_POINT_SIZE];
        public_point.copy_from_slice(point.as_bytes());

        Ok((private_key, public_point))
    }

    fn ecdsa_sign(&self, private_key: &PrivateKey, digest: &Sha256Digest) -> Result<([u8; 32], [u8; 32]), Error> {
        let key = SigningKey::from_slice(private_key)?;
        let sig: Signature = key.sign_prehash(digest)?;
        let (r_bytes, s_bytes) = sig.split_bytes();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&r_bytes);
        s.copy_from_slice(&s_bytes);

        Ok((r, s))
    }

    fn aes_encrypt(&self, key: &AesKey, data: &mut [u8]) -> Result<(), Error> {
        check_blocks(data)?;
        let cipher = Aes128::new(GenericArray::from_slice(key));
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn aes_decrypt(&self, key: &AesKey, data: &mut [u8]) -> Result<(), Error> {
        check_blocks(data)?;
        let cipher = Aes128::new(GenericArray::from_slice(key));
        for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    fn sha256(&self, parts: &[&[u8]]) -> Sha256Digest {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        digest
    }

    fn random_bytes(&self, out: &mut [u8]) -> Result<(), Error> {
        OsRng.try_fill_bytes(out)?;
        Ok(())
    }
}
