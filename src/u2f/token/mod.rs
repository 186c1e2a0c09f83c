//! Software U2F token: the raw message dispatcher and the credential engine.

pub mod attestation;
pub mod counter;
pub mod crypto;
pub mod key_handle;

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::u2f::{
    error::Error,
    proto::{
        constants::*,
        der,
        raw_message::{
            apdu::{self, ApduFrame},
            AuthenticateRequest, AuthenticateResponse, Message, RegisterRequest, RegisterResponse, VersionRequest, VersionResponse,
        },
    },
    store::RecordStore,
};

use self::{attestation::Attestation, counter::Counter, crypto::Crypto, key_handle::KeyWrapper};

/// Source of the user presence test
pub trait PresenceValidator: Send + Sync {
    /// Consumes a latched presence event. A second call without a new press returns `false`.
    fn take_user_presence(&self) -> bool;

    /// Drops any latched presence event.
    fn clear(&self) {
        self.take_user_presence();
    }

    /// Flashes the presence indicator so the user can spot the device.
    fn wink(&self) {}
}

/// Presence latch set from a button handler, possibly on another thread
#[derive(Default)]
pub struct ButtonLatch {
    pressed: AtomicBool,
    indicator: AtomicBool,
}

impl ButtonLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn indicator_on(&self) -> bool {
        self.indicator.load(Ordering::SeqCst)
    }
}

impl PresenceValidator for ButtonLatch {
    fn take_user_presence(&self) -> bool {
        self.pressed.swap(false, Ordering::SeqCst)
    }

    fn wink(&self) {
        self.indicator.fetch_xor(true, Ordering::SeqCst);
    }
}

pub struct U2FSToken {
    crypto: Box<dyn Crypto>,
    wrapper: KeyWrapper,
    counter: Counter,
    attestation: Attestation,
    version: String,
}

impl U2FSToken {
    /// Loads the counter and the wrapping key, creating their records on first start.
    pub fn new(config: &DeviceConfig, crypto: Box<dyn Crypto>, attestation: Attestation, store: &mut dyn RecordStore) -> Result<Self, Error> {
        let counter = Counter::load_or_create(store, config.counter_persist_retries)?;
        let wrapper = KeyWrapper::load_or_create(&config.wrapping_key, crypto.as_ref(), store)?;

        info!("U2F token ready, signature counter at {}", counter.value());

        Ok(U2FSToken {
            crypto,
            wrapper,
            counter,
            attestation,
            version: config.version_string.clone(),
        })
    }

    pub fn counter(&self) -> u32 {
        self.counter.value()
    }

    /// Runs one raw U2F request and produces its response.
    ///
    /// Every failure is turned into a status word, except the fatal ones
    /// (see [`Error::is_fatal`]) which are returned and must stop the device.
    pub fn handle_apdu_request(
        &mut self,
        payload: &[u8],
        presence: &dyn PresenceValidator,
        store: &mut dyn RecordStore,
    ) -> Result<apdu::Response, Error> {
        let req = match apdu::Request::read_from(payload) {
            Ok(req) => req,
            Err(e) => {
                debug!("Rejecting APDU of {} bytes: {}", payload.len(), e);
                return Ok(apdu::Response::from_status(U2F_SW_WRONG_LENGTH));
            }
        };

        if req.class_byte != 0 {
            return Ok(apdu::Response::from_status(U2F_SW_CLA_NOT_SUPPORTED));
        }

        let res = match req.command_mode {
            U2F_REGISTER => RegisterRequest::from_apdu(req).and_then(|reg| self.register(reg, presence)).and_then(|rsp| rsp.into_apdu()),
            U2F_AUTHENTICATE => AuthenticateRequest::from_apdu(req)
                .and_then(|auth| self.authenticate(auth, presence, store))
                .and_then(|rsp| rsp.into_apdu()),
            U2F_VERSION => VersionRequest::from_apdu(req).and_then(|vers| self.version(vers).into_apdu()),
            U2F_CHECK_REGISTER | U2F_AUTHENTICATE_BATCH => {
                debug!("Acknowledging unsupported instruction {:#04x}", req.command_mode);
                Ok(apdu::Response::from_status(U2F_SW_NO_ERROR))
            }
            ins => {
                debug!("Unknown instruction {:#04x}", ins);
                Err(Error::U2FErrorCode(U2F_SW_INS_NOT_SUPPORTED))
            }
        };

        match res {
            Ok(rsp) => Ok(rsp),
            Err(e) if e.is_fatal() => Err(e),
            Err(Error::U2FErrorCode(sw)) => Ok(apdu::Response::from_status(sw)),
            Err(e @ Error::Crypto(_)) => {
                error!("{}", e);
                Ok(apdu::Response::from_status(U2F_SW_INS_NOT_SUPPORTED))
            }
            Err(e) => {
                warn!("Request failed: {}", e);
                Ok(apdu::Response::from_status(U2F_SW_WRONG_LENGTH))
            }
        }
    }

    fn register(&mut self, req: RegisterRequest, presence: &dyn PresenceValidator) -> Result<RegisterResponse, Error> {
        if !presence.take_user_presence() {
            return Err(Error::U2FErrorCode(U2F_SW_CONDITIONS_NOT_SATISFIED));
        }

        let RegisterRequest { challenge, application } = req;

        let (private_key, user_public_key) = self.crypto.generate_key_pair()?;
        let key_handle = self.wrapper.wrap(self.crypto.as_ref(), &private_key, &application)?;

        let mut tbs_vec = Vec::with_capacity(U2F_REGISTER_MAX_DATA_TBS_SIZE);

        tbs_vec.push(U2F_REGISTER_HASH_ID);
        tbs_vec.extend_from_slice(&application);
        tbs_vec.extend_from_slice(&challenge);
        tbs_vec.extend_from_slice(&key_handle);
        tbs_vec.extend_from_slice(&user_public_key);

        let digest = self.crypto.sha256(&[tbs_vec.as_slice()]);
        let (r, s) = self.crypto.ecdsa_sign(self.attestation.key(), &digest)?;

        debug!("Registered a new credential");

        Ok(RegisterResponse {
            reserved: U2F_REGISTER_ID,
            user_public_key,
            key_handle_length: U2F_KH_SIZE as u8,
            key_handle: key_handle.to_vec(),
            attestation_cert: self.attestation.cert().to_vec(),
            signature: der::encode_signature(&r, &s),
        })
    }

    fn authenticate(
        &mut self,
        req: AuthenticateRequest,
        presence: &dyn PresenceValidator,
        store: &mut dyn RecordStore,
    ) -> Result<AuthenticateResponse, Error> {
        let AuthenticateRequest {
            control,
            challenge,
            application,
            key_handle,
            ..
        } = req;

        let private_key = self.wrapper.unwrap(self.crypto.as_ref(), &key_handle, &application)?;

        let user_presence = match control {
            U2F_AUTH_CHECK_ONLY => return Err(Error::U2FErrorCode(U2F_SW_CONDITIONS_NOT_SATISFIED)),
            U2F_AUTH_ENFORCE if !presence.take_user_presence() => {
                return Err(Error::U2FErrorCode(U2F_SW_CONDITIONS_NOT_SATISFIED));
            }
            U2F_AUTH_ENFORCE => U2F_AUTH_FLAG_TUP,
            _ if presence.take_user_presence() => U2F_AUTH_FLAG_TUP,
            _ => U2F_AUTH_FLAG_TDOWN,
        };

        let counter = self.counter.increment(store)?;

        let mut tbs_vec = Vec::with_capacity(U2F_AUTH_MAX_DATA_TBS_SIZE);
        tbs_vec.extend_from_slice(&application);
        tbs_vec.push(user_presence);
        tbs_vec.extend_from_slice(&counter.to_be_bytes());
        tbs_vec.extend_from_slice(&challenge);

        let digest = self.crypto.sha256(&[tbs_vec.as_slice()]);
        let (r, s) = self.crypto.ecdsa_sign(&private_key, &digest)?;

        Ok(AuthenticateResponse {
            user_presence,
            counter,
            signature: der::encode_signature(&r, &s),
        })
    }

    fn version(&self, _: VersionRequest) -> VersionResponse {
        VersionResponse {
            version: self.version.clone(),
        }
    }
}
