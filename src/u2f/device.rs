//! The authenticator as seen from the USB side.

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::config::DeviceConfig;
use crate::timer::SharedClock;
use crate::u2f::error::Error;
use crate::u2f::hid::{
    channel::{ChannelManager, DispatchContext},
    codec::{FrameCodec, HidMessage, HidTransport},
    HidErrorCode,
};
use crate::u2f::store::RecordStore;
use crate::u2f::token::{attestation::Attestation, crypto::Crypto, PresenceValidator, U2FSToken};

/// Owns every piece of device state. Drive it by calling [`U2fHidDevice::process`]
/// from the main loop.
pub struct U2fHidDevice {
    config: DeviceConfig,
    codec: FrameCodec,
    channels: ChannelManager,
    token: U2FSToken,
    store: Box<dyn RecordStore>,
    presence: Arc<dyn PresenceValidator>,
    halted: bool,
}

impl U2fHidDevice {
    pub fn new(
        config: DeviceConfig,
        transport: Box<dyn HidTransport>,
        clock: SharedClock,
        mut store: Box<dyn RecordStore>,
        presence: Arc<dyn PresenceValidator>,
        crypto: Box<dyn Crypto>,
        attestation: Attestation,
    ) -> Result<Self, Error> {
        let token = U2FSToken::new(&config, crypto, attestation, store.as_mut())?;
        let channels = ChannelManager::new(
            clock.clone(),
            config.max_channels,
            config.transaction_timeout_ms,
            config.firmware_version,
        );
        let codec = FrameCodec::new(transport, clock, config.send_timeout_ms);

        info!("U2F HID device started, {} channels available", config.max_channels);

        Ok(U2fHidDevice {
            config,
            codec,
            channels,
            token,
            store,
            presence,
            halted: false,
        })
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn counter(&self) -> u32 {
        self.token.counter()
    }

    /// One main loop iteration: receive and handle at most one message, then
    /// reclaim idle channels.
    ///
    /// An `Err` is only returned for fatal errors, after which the device is
    /// halted and every later call fails with `Error::Halted`.
    pub fn process(&mut self) -> Result<(), Error> {
        if self.halted {
            return Err(Error::Halted);
        }

        self.codec.pump_events();

        match self.codec.recv(self.config.recv_timeout_ms) {
            Ok(msg) => self.route(msg)?,
            Err(Error::NoMessage) => {}
            Err(Error::Hid { cid, code }) => self.report(cid, code),
            Err(e) => warn!("Dropping malformed report: {}", e),
        }

        self.channels.sweep();
        Ok(())
    }

    fn route(&mut self, msg: HidMessage) -> Result<(), Error> {
        debug!("{:?} on channel {:#010x}, {} bytes", msg.cmd, msg.cid, msg.payload.len());

        let mut ctx = DispatchContext {
            token: &mut self.token,
            store: self.store.as_mut(),
            presence: self.presence.as_ref(),
        };

        match self.channels.dispatch(msg, &mut ctx) {
            Ok(Some(reply)) => {
                if let Err(e) = self.codec.send(reply.cid, reply.cmd, &reply.payload) {
                    warn!("Unable to send {:?} reply: {}", reply.cmd, e);
                }
            }
            Ok(None) => {}
            Err(Error::Hid { cid, code }) => self.report(cid, code),
            Err(e) if e.is_fatal() => {
                error!("Fatal error, halting: {}", e);
                self.halted = true;
                return Err(e);
            }
            Err(e) => warn!("Request dropped: {}", e),
        }

        Ok(())
    }

    fn report(&mut self, cid: u32, code: HidErrorCode) {
        if let Err(e) = self.codec.send_error(cid, code) {
            warn!("Unable to report {:?} on channel {:#010x}: {}", code, cid, e);
        }
    }
}
