use std::collections::HashMap;

use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::timer::{SharedClock, Timer};
use crate::u2f::error::Error;
use crate::u2f::hid::{codec::HidMessage, hid_const::*, Cmd, HidErrorCode};
use crate::u2f::store::RecordStore;
use crate::u2f::token::{PresenceValidator, U2FSToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Waiting for a request
    Idle,
    /// A complete request is buffered and about to be handled
    Ready,
}

pub struct Channel {
    pub id: u32,
    pub state: ChannelState,
    pub command: Option<Cmd>,
    pub byte_count: u16,
    timer: Timer,
    request: Vec<u8>,
}

impl Channel {
    fn new(id: u32, clock: SharedClock, timeout_ms: u32) -> Self {
        let mut timer = Timer::new(clock);
        timer.start(timeout_ms);

        Channel {
            id,
            state: ChannelState::Idle,
            command: None,
            byte_count: 0,
            timer,
            request: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.timer.expired()
    }

    fn load(&mut self, cmd: Cmd, payload: Vec<u8>, timeout_ms: u32) {
        self.timer.start(timeout_ms);
        self.command = Some(cmd);
        self.byte_count = payload.len() as u16;
        self.request = payload;
        self.state = ChannelState::Ready;
    }

    fn take_request(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.request)
    }

    fn release(&mut self) {
        self.state = ChannelState::Idle;
        self.byte_count = 0;
    }
}

/// Collaborators a request may need
pub struct DispatchContext<'a> {
    pub token: &'a mut U2FSToken,
    pub store: &'a mut dyn RecordStore,
    pub presence: &'a dyn PresenceValidator,
}

/// Logical channels multiplexed over the HID endpoint
pub struct ChannelManager {
    channels: HashMap<u32, Channel>,
    clock: SharedClock,
    max_channels: usize,
    transaction_timeout_ms: u32,
    firmware_version: (u8, u8, u8),
    last_cid: u32,
}

impl ChannelManager {
    /// Creates the registry with the broadcast channel in it.
    pub fn new(clock: SharedClock, max_channels: usize, transaction_timeout_ms: u32, firmware_version: (u8, u8, u8)) -> Self {
        let mut channels = HashMap::with_capacity(max_channels + 1);
        channels.insert(CID_BROADCAST, Channel::new(CID_BROADCAST, clock.clone(), transaction_timeout_ms));

        ChannelManager {
            channels,
            clock,
            max_channels,
            transaction_timeout_ms,
            firmware_version,
            last_cid: 0,
        }
    }

    pub fn get(&self, cid: u32) -> Option<&Channel> {
        self.channels.get(&cid)
    }

    /// Number of allocated channels, broadcast excluded
    pub fn allocated(&self) -> usize {
        self.channels.len() - 1
    }

    fn next_cid(&mut self) -> u32 {
        loop {
            self.last_cid = self.last_cid.wrapping_add(1);
            let cid = self.last_cid;
            if cid != 0 && cid != CID_BROADCAST && !self.channels.contains_key(&cid) {
                return cid;
            }
        }
    }

    /// Allocates a channel for the host that sent `nonce` on the broadcast channel.
    pub fn handle_init(&mut self, nonce: &[u8], presence: &dyn PresenceValidator) -> Result<Vec<u8>, Error> {
        if nonce.len() != INIT_NONCE_SIZE {
            return Err(Error::hid(CID_BROADCAST, HidErrorCode::InvalidLength));
        }

        if self.allocated() >= self.max_channels {
            warn!("No free channel left ({} allocated)", self.allocated());
            return Err(Error::hid(CID_BROADCAST, HidErrorCode::ChannelBusy));
        }

        let cid = self.next_cid();
        self.channels
            .insert(cid, Channel::new(cid, self.clock.clone(), self.transaction_timeout_ms));

        presence.clear();

        let (major, minor, build) = self.firmware_version;
        let mut rsp = Vec::with_capacity(INIT_RESP_SIZE);
        rsp.extend_from_slice(nonce);
        rsp.write_u32::<BigEndian>(cid)?;
        rsp.write_u8(U2FHID_IF_VERSION)?;
        rsp.write_u8(major)?;
        rsp.write_u8(minor)?;
        rsp.write_u8(build)?;
        rsp.write_u8(CAPFLAG_WINK)?;

        info!("Allocated channel {:#010x}", cid);
        Ok(rsp)
    }

    /// Handles a reassembled message and produces the reply to send, if any.
    ///
    /// Transport failures come back as `Error::Hid` for the caller to report
    /// on the wire.
    pub fn dispatch(&mut self, msg: HidMessage, ctx: &mut DispatchContext<'_>) -> Result<Option<HidMessage>, Error> {
        let HidMessage { cid, cmd, payload } = msg;

        let request = match self.channels.get_mut(&cid) {
            Some(channel) => {
                channel.load(cmd, payload, self.transaction_timeout_ms);
                channel.take_request()
            }
            None => {
                debug!("Message for unknown channel {:#010x}", cid);
                return Err(Error::hid(cid, HidErrorCode::ChannelBusy));
            }
        };

        let res = self.execute(cid, cmd, request, ctx);

        if let Some(channel) = self.channels.get_mut(&cid) {
            channel.release();
        }

        res
    }

    fn execute(&mut self, cid: u32, cmd: Cmd, request: Vec<u8>, ctx: &mut DispatchContext<'_>) -> Result<Option<HidMessage>, Error> {
        let reply = |cmd: Cmd, payload: Vec<u8>| -> Result<Option<HidMessage>, Error> { Ok(Some(HidMessage { cid, cmd, payload })) };

        match cmd {
            Cmd::Init => {
                if cid != CID_BROADCAST {
                    return Err(Error::hid(cid, HidErrorCode::InvalidCommand));
                }
                reply(Cmd::Init, self.handle_init(&request, ctx.presence)?)
            }
            Cmd::Ping => reply(Cmd::Ping, request),
            Cmd::Msg => {
                let rsp = ctx.token.handle_apdu_request(&request, ctx.presence, &mut *ctx.store)?;
                reply(Cmd::Msg, rsp.to_bytes()?)
            }
            Cmd::Wink => {
                ctx.presence.wink();
                reply(Cmd::Wink, Vec::new())
            }
            Cmd::Lock | Cmd::Sync => reply(cmd, Vec::new()),
            Cmd::Vendor(v) => {
                info!("Vendor command {:#04x} on channel {:#010x} ({} bytes)", v, cid, request.len());
                Ok(None)
            }
            Cmd::Error | Cmd::Unknown(_) => {
                warn!("Unhandled command {:?} on channel {:#010x}", cmd, cid);
                Ok(None)
            }
        }
    }

    /// Reclaims every idle channel whose transaction timer ran out.
    pub fn sweep(&mut self) {
        self.channels.retain(|cid, channel| {
            let keep = *cid == CID_BROADCAST || channel.state != ChannelState::Idle || !channel.is_expired();
            if !keep {
                debug!("Reclaiming idle channel {:#010x}", cid);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{DeviceConfig, WrappingKeySource};
    use crate::timer::ManualClock;
    use crate::u2f::proto::constants::*;
    use crate::u2f::store::MemoryStore;
    use crate::u2f::token::{attestation::Attestation, crypto::SoftCrypto, ButtonLatch};

    struct Fixture {
        clock: Arc<ManualClock>,
        manager: ChannelManager,
        token: U2FSToken,
        store: MemoryStore,
        presence: ButtonLatch,
    }

    impl Fixture {
        fn new(max_channels: usize) -> Self {
            let clock = Arc::new(ManualClock::new(0));
            let mut store = MemoryStore::new();
            let config = DeviceConfig::builder().wrapping_key(WrappingKeySource::Fixed([1; 16])).build();
            let token = U2FSToken::new(&config, Box::new(SoftCrypto), Attestation::default(), &mut store).unwrap();

            Fixture {
                manager: ChannelManager::new(clock.clone(), max_channels, 3000, (1, 2, 3)),
                clock,
                token,
                store,
                presence: ButtonLatch::new(),
            }
        }

        fn dispatch(&mut self, cid: u32, cmd: Cmd, payload: &[u8]) -> Result<Option<HidMessage>, Error> {
            let mut ctx = DispatchContext {
                token: &mut self.token,
                store: &mut self.store,
                presence: &self.presence,
            };
            self.manager.dispatch(
                HidMessage {
                    cid,
                    cmd,
                    payload: payload.to_vec(),
                },
                &mut ctx,
            )
        }

        fn init(&mut self, nonce: [u8; 8]) -> u32 {
            let rsp = self.dispatch(CID_BROADCAST, Cmd::Init, &nonce).unwrap().unwrap();
            assert_eq!(rsp.cid, CID_BROADCAST);
            assert_eq!(&rsp.payload[..8], &nonce);
            u32::from_be_bytes([rsp.payload[8], rsp.payload[9], rsp.payload[10], rsp.payload[11]])
        }
    }

    fn hid_code(res: Result<Option<HidMessage>, Error>) -> (u32, HidErrorCode) {
        match res {
            Err(Error::Hid { cid, code }) => (cid, code),
            other => panic!("expected a HID error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn init_response_layout() {
        let mut fx = Fixture::new(5);
        fx.presence.press();
        let rsp = fx.dispatch(CID_BROADCAST, Cmd::Init, &[9, 8, 7, 6, 5, 4, 3, 2]).unwrap().unwrap();

        assert_eq!(rsp.cmd, Cmd::Init);
        assert_eq!(rsp.payload.len(), INIT_RESP_SIZE);
        assert_eq!(&rsp.payload[..8], &[9, 8, 7, 6, 5, 4, 3, 2]);
        assert_eq!(&rsp.payload[12..], &[U2FHID_IF_VERSION, 1, 2, 3, CAPFLAG_WINK]);
        assert!(!fx.presence.take_user_presence());

        let cid = u32::from_be_bytes([rsp.payload[8], rsp.payload[9], rsp.payload[10], rsp.payload[11]]);
        let channel = fx.manager.get(cid).unwrap();
        assert_eq!(channel.state, ChannelState::Idle);
        assert_eq!(fx.manager.get(CID_BROADCAST).unwrap().state, ChannelState::Idle);
    }

    #[test]
    fn init_allocates_unique_channels_up_to_limit() {
        let mut fx = Fixture::new(5);
        let mut ids = Vec::new();
        for i in 0..5u8 {
            let cid = fx.init([i; 8]);
            assert_ne!(cid, 0);
            assert_ne!(cid, CID_BROADCAST);
            assert!(!ids.contains(&cid));
            ids.push(cid);
        }
        assert_eq!(fx.manager.allocated(), 5);

        let res = fx.dispatch(CID_BROADCAST, Cmd::Init, &[6; 8]);
        assert_eq!(hid_code(res), (CID_BROADCAST, HidErrorCode::ChannelBusy));
        assert_eq!(fx.manager.allocated(), 5);
    }

    #[test]
    fn init_is_checked() {
        let mut fx = Fixture::new(5);
        let res = fx.dispatch(CID_BROADCAST, Cmd::Init, &[1; 7]);
        assert_eq!(hid_code(res), (CID_BROADCAST, HidErrorCode::InvalidLength));

        let cid = fx.init([1; 8]);
        let res = fx.dispatch(cid, Cmd::Init, &[2; 8]);
        assert_eq!(hid_code(res), (cid, HidErrorCode::InvalidCommand));
        assert_eq!(fx.manager.allocated(), 1);
    }

    #[test]
    fn unknown_channel_is_busy() {
        let mut fx = Fixture::new(5);
        let res = fx.dispatch(0x1234, Cmd::Ping, &[1, 2, 3]);
        assert_eq!(hid_code(res), (0x1234, HidErrorCode::ChannelBusy));
        assert!(fx.manager.get(0x1234).is_none());
    }

    #[test]
    fn simple_commands() {
        let mut fx = Fixture::new(5);
        let cid = fx.init([0; 8]);

        let rsp = fx.dispatch(cid, Cmd::Ping, &[0xab; 300]).unwrap().unwrap();
        assert_eq!((rsp.cid, rsp.cmd, rsp.payload), (cid, Cmd::Ping, vec![0xab; 300]));

        let rsp = fx.dispatch(cid, Cmd::Wink, &[]).unwrap().unwrap();
        assert_eq!((rsp.cmd, rsp.payload.len()), (Cmd::Wink, 0));
        assert!(fx.presence.indicator_on());

        let rsp = fx.dispatch(cid, Cmd::Lock, &[3]).unwrap().unwrap();
        assert_eq!((rsp.cmd, rsp.payload.len()), (Cmd::Lock, 0));

        let rsp = fx.dispatch(cid, Cmd::Msg, &[0, U2F_VERSION, 0, 0, 0, 0, 0]).unwrap().unwrap();
        assert_eq!(rsp.payload, b"U2F_V2\x90\x00".to_vec());

        assert!(fx.dispatch(cid, Cmd::Vendor(0x50), &[1]).unwrap().is_none());
        assert!(fx.dispatch(cid, Cmd::Unknown(0x22), &[1]).unwrap().is_none());
        assert_eq!(fx.manager.get(cid).unwrap().state, ChannelState::Idle);
    }

    #[test]
    fn sweep_reclaims_idle_channels() {
        let mut fx = Fixture::new(5);
        let quiet = fx.init([1; 8]);
        let busy = fx.init([2; 8]);

        fx.clock.advance(2000);
        fx.dispatch(busy, Cmd::Ping, &[]).unwrap();

        fx.clock.advance(1001);
        fx.manager.sweep();
        assert!(fx.manager.get(quiet).is_none());
        assert!(fx.manager.get(busy).is_some());

        fx.clock.advance(2000);
        fx.manager.sweep();
        assert!(fx.manager.get(busy).is_none());
        assert!(fx.manager.get(CID_BROADCAST).is_some());
        assert_eq!(fx.manager.allocated(), 0);

        let res = fx.dispatch(quiet, Cmd::Ping, &[]);
        assert_eq!(hid_code(res), (quiet, HidErrorCode::ChannelBusy));
    }
}
