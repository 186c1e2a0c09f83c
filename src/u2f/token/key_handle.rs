//! Stateless credentials.
//!
//! Nothing is stored per registration: the credential private key travels
//! inside the key handle, encrypted under the device wrapping key together with
//! the application id it was issued for.

use log::{debug, info};

use crate::config::WrappingKeySource;
use crate::u2f::error::Error;
use crate::u2f::proto::constants::*;
use crate::u2f::store::{RecordStore, WRAPPING_KEY_FILE_ID, WRAPPING_KEY_RECORD_KEY};
use crate::u2f::token::crypto::{AesKey, Crypto, PrivateKey};

pub type KeyHandle = [u8; U2F_KH_SIZE];

pub struct KeyWrapper {
    key: AesKey,
}

impl KeyWrapper {
    pub fn new(key: AesKey) -> Self {
        KeyWrapper { key }
    }

    /// Resolves the wrapping key. A random key is generated on first start and
    /// kept in the record store afterwards.
    pub fn load_or_create(source: &WrappingKeySource, crypto: &dyn Crypto, store: &mut dyn RecordStore) -> Result<Self, Error> {
        let random = match source {
            WrappingKeySource::Fixed(key) => return Ok(KeyWrapper::new(*key)),
            WrappingKeySource::Random => store.read(WRAPPING_KEY_FILE_ID, WRAPPING_KEY_RECORD_KEY)?,
        };

        let key = match random {
            Some(bytes) => {
                let key: AesKey = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Persistence(format!("Wrapping key record has {} bytes", bytes.len())))?;
                debug!("Loaded wrapping key from record store");
                key
            }
            None => {
                let mut key = [0u8; AES_KEY_SIZE];
                crypto.random_bytes(&mut key)?;
                store
                    .write(WRAPPING_KEY_FILE_ID, WRAPPING_KEY_RECORD_KEY, &key)
                    .map_err(|e| Error::Persistence(format!("Unable to store wrapping key: {}", e)))?;
                info!("Generated a new wrapping key");
                key
            }
        };

        Ok(KeyWrapper::new(key))
    }

    pub fn wrap(&self, crypto: &dyn Crypto, private_key: &PrivateKey, application: &[u8; U2F_APPID_SIZE]) -> Result<KeyHandle, Error> {
        let mut key_handle = [0u8; U2F_KH_SIZE];
        key_handle[..U2F_EC_KEY_SIZE].copy_from_slice(private_key);
        key_handle[U2F_EC_KEY_SIZE..].copy_from_slice(application);

        crypto.aes_encrypt(&self.key, &mut key_handle)?;

        Ok(key_handle)
    }

    /// Recovers the private key, provided the handle was issued by this device
    /// for `application`.
    pub fn unwrap(&self, crypto: &dyn Crypto, key_handle: &[u8], application: &[u8; U2F_APPID_SIZE]) -> Result<PrivateKey, Error> {
        if key_handle.len() != U2F_KH_SIZE {
            return Err(Error::U2FErrorCode(U2F_SW_WRONG_DATA));
        }

        let mut plain = [0u8; U2F_KH_SIZE];
        plain.copy_from_slice(key_handle);
        crypto.aes_decrypt(&self.key, &mut plain)?;

        if &plain[U2F_EC_KEY_SIZE..] != application {
            return Err(Error::U2FErrorCode(U2F_SW_WRONG_DATA));
        }

        let mut private_key = [0u8; U2F_EC_KEY_SIZE];
        private_key.copy_from_slice(&plain[..U2F_EC_KEY_SIZE]);
        Ok(private_key)
    }
}
