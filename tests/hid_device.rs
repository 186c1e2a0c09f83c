use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use slauth_token::config::{DeviceConfig, WrappingKeySource};
use slauth_token::timer::ManualClock;
use slauth_token::u2f::{
    device::U2fHidDevice,
    error::Error,
    hid::{
        codec::{HidTransport, SendStatus},
        frame::{fragment, Report, U2fHidFrame},
        hid_const::*,
        Cmd, HidErrorCode,
    },
    proto::{
        constants::*,
        raw_message::{
            apdu::{ApduFrame, Response},
            AuthenticateRequest, AuthenticateResponse, Message, RegisterRequest, RegisterResponse, VersionRequest, VersionResponse,
        },
    },
    store::{MemoryStore, RecordStore, COUNTER_FILE_ID, COUNTER_RECORD_KEY},
    token::{attestation::Attestation, crypto::SoftCrypto, ButtonLatch},
};

const APP_ID: [u8; 32] = [0x1a; 32];
const CHALLENGE: [u8; 32] = [0x2b; 32];

#[derive(Default)]
struct Wire {
    to_device: VecDeque<Report>,
    to_host: VecDeque<Report>,
}

#[derive(Clone)]
struct Loopback {
    wire: Arc<Mutex<Wire>>,
    clock: Arc<ManualClock>,
}

impl HidTransport for Loopback {
    fn send_report(&mut self, report: &Report) -> Result<SendStatus, Error> {
        self.wire.lock().unwrap().to_host.push_back(*report);
        Ok(SendStatus::Sent)
    }

    fn poll_report(&mut self) -> Option<Report> {
        self.wire.lock().unwrap().to_device.pop_front()
    }

    fn pump_events(&mut self) {
        self.clock.tick();
    }
}

/// Record store whose writes can be switched off
#[derive(Clone)]
struct BrokenFlash {
    inner: MemoryStore,
    broken: Arc<AtomicBool>,
}

impl RecordStore for BrokenFlash {
    fn find(&self, file_id: u16, key_id: u16) -> Result<bool, Error> {
        self.inner.find(file_id, key_id)
    }

    fn read(&self, file_id: u16, key_id: u16) -> Result<Option<Vec<u8>>, Error> {
        self.inner.read(file_id, key_id)
    }

    fn write(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        self.inner.write(file_id, key_id, data)
    }

    fn update(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Other("flash write error".to_string()));
        }
        self.inner.update(file_id, key_id, data)
    }
}

struct Host {
    device: U2fHidDevice,
    wire: Arc<Mutex<Wire>>,
    clock: Arc<ManualClock>,
    button: Arc<ButtonLatch>,
}

impl Host {
    fn start(config: DeviceConfig, store: Box<dyn RecordStore>) -> Self {
        let clock = Arc::new(ManualClock::new(0));
        let wire = Arc::new(Mutex::new(Wire::default()));
        let button = Arc::new(ButtonLatch::new());
        let transport = Loopback {
            wire: wire.clone(),
            clock: clock.clone(),
        };

        let device = U2fHidDevice::new(
            config,
            Box::new(transport),
            clock.clone(),
            store,
            button.clone(),
            Box::new(SoftCrypto),
            Attestation::default(),
        )
        .unwrap();

        Host {
            device,
            wire,
            clock,
            button,
        }
    }

    fn with_store(store: MemoryStore) -> Self {
        Self::start(DeviceConfig::default(), Box::new(store))
    }

    fn write(&self, cid: u32, cmd: Cmd, data: &[u8]) {
        let reports = fragment(cid, cmd, data).unwrap();
        self.wire.lock().unwrap().to_device.extend(reports);
    }

    fn write_raw(&self, report: Report) {
        self.wire.lock().unwrap().to_device.push_back(report);
    }

    fn read(&self) -> Option<(u32, Cmd, Vec<u8>)> {
        let mut wire = self.wire.lock().unwrap();
        let first = U2fHidFrame::read_from(&wire.to_host.pop_front()?).unwrap();
        let cmd = first.frame_cmd().unwrap();
        let total = first.msg_len().unwrap() as usize;

        let mut payload = first.data()[..total.min(INIT_DATA_SIZE)].to_vec();
        let mut seq = 0;
        while payload.len() < total {
            let frame = U2fHidFrame::read_from(&wire.to_host.pop_front().unwrap()).unwrap();
            assert_eq!(frame.cid, first.cid);
            assert_eq!(frame.frame_seq(), Some(seq));
            seq += 1;
            let len = (total - payload.len()).min(CONT_DATA_SIZE);
            payload.extend_from_slice(&frame.data()[..len]);
        }

        Some((first.cid, cmd, payload))
    }

    fn transact(&mut self, cid: u32, cmd: Cmd, data: &[u8]) -> Option<(u32, Cmd, Vec<u8>)> {
        self.write(cid, cmd, data);
        self.device.process().unwrap();
        self.read()
    }

    fn init(&mut self, nonce: [u8; 8]) -> u32 {
        let (cid, cmd, payload) = self.transact(CID_BROADCAST, Cmd::Init, &nonce).unwrap();
        assert_eq!((cid, cmd), (CID_BROADCAST, Cmd::Init));
        assert_eq!(&payload[..8], &nonce);
        u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]])
    }

    fn apdu<M: Message<Apdu = slauth_token::u2f::proto::raw_message::apdu::Request>>(&mut self, cid: u32, req: M) -> Response {
        let mut bytes = Vec::new();
        req.into_apdu().unwrap().write_to(&mut bytes).unwrap();
        let (rsp_cid, cmd, payload) = self.transact(cid, Cmd::Msg, &bytes).unwrap();
        assert_eq!((rsp_cid, cmd), (cid, Cmd::Msg));
        Response::read_from(&payload).unwrap()
    }

    fn register(&mut self, cid: u32) -> RegisterResponse {
        self.button.press();
        let rsp = self.apdu(
            cid,
            RegisterRequest {
                challenge: CHALLENGE,
                application: APP_ID,
            },
        );
        RegisterResponse::from_apdu(rsp).unwrap()
    }

    fn authenticate(&mut self, cid: u32, key_handle: &[u8], application: [u8; 32]) -> Response {
        self.button.press();
        self.apdu(
            cid,
            AuthenticateRequest {
                control: U2F_AUTH_ENFORCE,
                challenge: CHALLENGE,
                application,
                key_h_len: key_handle.len() as u8,
                key_handle: key_handle.to_vec(),
            },
        )
    }
}

fn verify_authentication(public_key: &[u8], auth: &AuthenticateResponse) {
    let mut signed = APP_ID.to_vec();
    signed.push(auth.user_presence);
    signed.extend_from_slice(&auth.counter.to_be_bytes());
    signed.extend_from_slice(&CHALLENGE);

    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key)
        .verify(&signed, &auth.signature)
        .unwrap();
}

#[test]
fn init_ping_and_version() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([1, 2, 3, 4, 5, 6, 7, 8]);
    assert_ne!(cid, CID_BROADCAST);

    let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    let (rsp_cid, cmd, payload) = host.transact(cid, Cmd::Ping, &data).unwrap();
    assert_eq!((rsp_cid, cmd, payload), (cid, Cmd::Ping, data));

    let rsp = host.apdu(cid, VersionRequest {});
    assert_eq!(VersionResponse::from_apdu(rsp).unwrap().version, "U2F_V2");
}

#[test]
fn largest_message_is_echoed() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([0; 8]);

    let data = vec![0x5a; MAX_MESSAGE_SIZE];
    let (_, cmd, payload) = host.transact(cid, Cmd::Ping, &data).unwrap();
    assert_eq!(cmd, Cmd::Ping);
    assert_eq!(payload, data);
}

#[test]
fn register_and_authenticate() {
    let store = MemoryStore::new();
    let mut host = Host::with_store(store.clone());
    let cid = host.init([9; 8]);

    let reg = host.register(cid);
    assert_eq!(reg.key_handle.len(), U2F_KH_SIZE);

    let mut attested = vec![0x00];
    attested.extend_from_slice(&APP_ID);
    attested.extend_from_slice(&CHALLENGE);
    attested.extend_from_slice(&reg.key_handle);
    attested.extend_from_slice(&reg.user_public_key);
    let att_key = Attestation::default().public_key().unwrap();
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &att_key[..])
        .verify(&attested, &reg.signature)
        .unwrap();

    for expected in 1..=3u32 {
        let rsp = host.authenticate(cid, &reg.key_handle, APP_ID);
        let auth = AuthenticateResponse::from_apdu(rsp).unwrap();
        assert_eq!(auth.user_presence, U2F_AUTH_FLAG_TUP);
        assert_eq!(auth.counter, expected);
        verify_authentication(&reg.user_public_key, &auth);
    }

    assert_eq!(host.device.counter(), 3);
    assert_eq!(store.read(COUNTER_FILE_ID, COUNTER_RECORD_KEY).unwrap().unwrap(), vec![3, 0, 0, 0]);
}

#[test]
fn credentials_and_counter_survive_restart() {
    let store = MemoryStore::new();
    let reg = {
        let mut host = Host::with_store(store.clone());
        let cid = host.init([1; 8]);
        let reg = host.register(cid);
        let rsp = host.authenticate(cid, &reg.key_handle, APP_ID);
        assert_eq!(AuthenticateResponse::from_apdu(rsp).unwrap().counter, 1);
        reg
    };

    let mut host = Host::with_store(store);
    assert_eq!(host.device.counter(), 1);
    let cid = host.init([2; 8]);

    let rsp = host.authenticate(cid, &reg.key_handle, APP_ID);
    let auth = AuthenticateResponse::from_apdu(rsp).unwrap();
    assert_eq!(auth.counter, 2);
    verify_authentication(&reg.user_public_key, &auth);
}

#[test]
fn foreign_key_handles_are_refused() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([3; 8]);
    let reg = host.register(cid);

    let rsp = host.authenticate(cid, &reg.key_handle, [0x99; 32]);
    assert_eq!(rsp.status, U2F_SW_WRONG_DATA);
    assert!(rsp.data.is_none());

    let mut other = Host::start(
        DeviceConfig::builder().wrapping_key(WrappingKeySource::Fixed([0x77; 16])).build(),
        Box::new(MemoryStore::new()),
    );
    let other_cid = other.init([4; 8]);
    let rsp = other.authenticate(other_cid, &reg.key_handle, APP_ID);
    assert_eq!(rsp.status, U2F_SW_WRONG_DATA);

    assert_eq!(host.device.counter(), 0);
    assert_eq!(other.device.counter(), 0);
}

#[test]
fn presence_is_enforced() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([5; 8]);

    let rsp = host.apdu(
        cid,
        RegisterRequest {
            challenge: CHALLENGE,
            application: APP_ID,
        },
    );
    assert_eq!(rsp.status, U2F_SW_CONDITIONS_NOT_SATISFIED);

    // A press latched before INIT is discarded
    host.button.press();
    let cid = host.init([6; 8]);
    let rsp = host.apdu(
        cid,
        RegisterRequest {
            challenge: CHALLENGE,
            application: APP_ID,
        },
    );
    assert_eq!(rsp.status, U2F_SW_CONDITIONS_NOT_SATISFIED);
}

#[test]
fn channel_pool_is_bounded() {
    let mut host = Host::with_store(MemoryStore::new());
    for i in 0..5 {
        host.init([i; 8]);
    }
    assert_eq!(host.device.channels().allocated(), 5);

    let (cid, cmd, payload) = host.transact(CID_BROADCAST, Cmd::Init, &[6; 8]).unwrap();
    assert_eq!((cid, cmd, payload), (CID_BROADCAST, Cmd::Error, vec![HidErrorCode::ChannelBusy.into()]));
}

#[test]
fn idle_channels_are_reclaimed() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([7; 8]);

    host.clock.advance(U2FHID_TRANS_TIMEOUT + 1);
    host.device.process().unwrap();
    assert!(host.device.channels().get(cid).is_none());
    assert!(host.device.channels().get(CID_BROADCAST).is_some());

    let (err_cid, cmd, payload) = host.transact(cid, Cmd::Ping, &[1]).unwrap();
    assert_eq!((err_cid, cmd, payload), (cid, Cmd::Error, vec![HidErrorCode::ChannelBusy.into()]));
}

#[test]
fn transport_errors_are_reported() {
    let mut host = Host::with_store(MemoryStore::new());
    let cid = host.init([8; 8]);

    host.write_raw(U2fHidFrame::cont(cid, 0, &[0; 10]).to_report().unwrap());
    host.device.process().unwrap();
    assert_eq!(host.read().unwrap(), (cid, Cmd::Error, vec![HidErrorCode::InvalidCommand.into()]));

    let mut reports = fragment(cid, Cmd::Ping, &[0x11; 200]).unwrap();
    reports.remove(1);
    for report in reports {
        host.write_raw(report);
    }
    host.device.process().unwrap();
    assert_eq!(host.read().unwrap(), (cid, Cmd::Error, vec![HidErrorCode::InvalidSequence.into()]));
    host.wire.lock().unwrap().to_device.clear();

    let mut reports = fragment(cid, Cmd::Ping, &[0x11; 100]).unwrap();
    reports.truncate(1);
    host.write_raw(reports[0]);
    host.device.process().unwrap();
    assert_eq!(host.read().unwrap(), (cid, Cmd::Error, vec![HidErrorCode::Timeout.into()]));

    // The channel is still usable afterwards
    let (_, cmd, payload) = host.transact(cid, Cmd::Ping, &[4, 2]).unwrap();
    assert_eq!((cmd, payload), (Cmd::Ping, vec![4, 2]));
}

#[test]
fn counter_write_failure_halts_device() {
    let flash = BrokenFlash {
        inner: MemoryStore::new(),
        broken: Arc::new(AtomicBool::new(false)),
    };
    let mut host = Host::start(DeviceConfig::default(), Box::new(flash.clone()));
    let cid = host.init([1; 8]);
    let reg = host.register(cid);

    flash.broken.store(true, Ordering::SeqCst);

    let mut bytes = Vec::new();
    AuthenticateRequest {
        control: U2F_AUTH_ENFORCE,
        challenge: CHALLENGE,
        application: APP_ID,
        key_h_len: reg.key_handle.len() as u8,
        key_handle: reg.key_handle.clone(),
    }
    .into_apdu()
    .unwrap()
    .write_to(&mut bytes)
    .unwrap();

    host.button.press();
    host.write(cid, Cmd::Msg, &bytes);
    assert!(matches!(host.device.process(), Err(Error::Persistence(_))));
    assert!(host.read().is_none());
    assert!(host.device.is_halted());

    host.write(cid, Cmd::Ping, &[1]);
    assert!(matches!(host.device.process(), Err(Error::Halted)));
    assert!(host.read().is_none());
    assert_eq!(flash.inner.read(COUNTER_FILE_ID, COUNTER_RECORD_KEY).unwrap().unwrap(), vec![0, 0, 0, 0]);
}
