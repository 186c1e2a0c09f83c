#![no_main]
#[macro_use] extern crate libfuzzer_sys;
extern crate slauth_token;

use std::collections::VecDeque;
use std::sync::Arc;

use slauth_token::config::{DeviceConfig, WrappingKeySource};
use slauth_token::timer::ManualClock;
use slauth_token::u2f::device::U2fHidDevice;
use slauth_token::u2f::error::Error;
use slauth_token::u2f::hid::codec::{HidTransport, SendStatus};
use slauth_token::u2f::hid::frame::Report;
use slauth_token::u2f::hid::hid_const::HID_RPT_SIZE;
use slauth_token::u2f::store::MemoryStore;
use slauth_token::u2f::token::{attestation::Attestation, crypto::SoftCrypto, ButtonLatch};

struct Replay {
    reports: VecDeque<Report>,
    clock: Arc<ManualClock>,
}

impl HidTransport for Replay {
    fn send_report(&mut self, _report: &Report) -> Result<SendStatus, Error> {
        Ok(SendStatus::Sent)
    }

    fn poll_report(&mut self) -> Option<Report> {
        self.reports.pop_front()
    }

    fn pump_events(&mut self) {
        self.clock.advance(10);
    }
}

fuzz_target!(|data: &[u8]| {
    let reports = data
        .chunks(HID_RPT_SIZE)
        .map(|chunk| {
            let mut report = [0u8; HID_RPT_SIZE];
            report[..chunk.len()].copy_from_slice(chunk);
            report
        })
        .collect::<VecDeque<_>>();
    let count = reports.len();

    let clock = Arc::new(ManualClock::new(0));
    let transport = Replay { reports, clock: clock.clone() };
    let config = DeviceConfig::builder().wrapping_key(WrappingKeySource::Fixed([0; 16])).build();

    let mut device = match U2fHidDevice::new(
        config,
        Box::new(transport),
        clock,
        Box::new(MemoryStore::new()),
        Arc::new(ButtonLatch::new()),
        Box::new(SoftCrypto),
        Attestation::default(),
    ) {
        Ok(device) => device,
        Err(_) => return,
    };

    for _ in 0..=count {
        if device.process().is_err() {
            break;
        }
    }
});
