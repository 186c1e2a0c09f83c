use byteorder::{ByteOrder, LittleEndian};
use log::{error, warn};

use crate::u2f::error::Error;
use crate::u2f::proto::constants::{U2F_CTR_SIZE, U2F_SW_COMMAND_NOT_ALLOWED};
use crate::u2f::store::{RecordStore, COUNTER_FILE_ID, COUNTER_RECORD_KEY};

/// Anti-replay signature counter, mirrored in the record store
pub struct Counter {
    value: u32,
    persist_retries: u8,
}

fn encode(value: u32) -> [u8; U2F_CTR_SIZE] {
    let mut buf = [0u8; U2F_CTR_SIZE];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

impl Counter {
    /// Reads the persisted counter, creating the record at zero on first start.
    pub fn load_or_create(store: &mut dyn RecordStore, persist_retries: u8) -> Result<Self, Error> {
        let value = match store.read(COUNTER_FILE_ID, COUNTER_RECORD_KEY)? {
            Some(bytes) if bytes.len() == U2F_CTR_SIZE => LittleEndian::read_u32(&bytes),
            Some(bytes) => {
                return Err(Error::Persistence(format!("Counter record has {} bytes", bytes.len())));
            }
            None => {
                store
                    .write(COUNTER_FILE_ID, COUNTER_RECORD_KEY, &encode(0))
                    .map_err(|e| Error::Persistence(format!("Unable to create counter record: {}", e)))?;
                0
            }
        };

        Ok(Counter { value, persist_retries })
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Advances the counter and returns the new value once it is durable.
    ///
    /// The in-memory value only moves after a successful write, so a failed
    /// increment never hands out a value the store does not hold.
    pub fn increment(&mut self, store: &mut dyn RecordStore) -> Result<u32, Error> {
        let next = match self.value.checked_add(1) {
            Some(next) => next,
            None => {
                warn!("Signature counter exhausted");
                return Err(Error::U2FErrorCode(U2F_SW_COMMAND_NOT_ALLOWED));
            }
        };

        let record = encode(next);
        let mut attempt = 0;
        loop {
            match store.update(COUNTER_FILE_ID, COUNTER_RECORD_KEY, &record) {
                Ok(()) => break,
                Err(e) if attempt < self.persist_retries => {
                    attempt += 1;
                    warn!("Counter write failed ({}), retry {}/{}", e, attempt, self.persist_retries);
                }
                Err(e) => {
                    error!("Counter write failed after {} retries: {}", self.persist_retries, e);
                    return Err(Error::Persistence(e.to_string()));
                }
            }
        }

        self.value = next;
        Ok(next)
    }
}
