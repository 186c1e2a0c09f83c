use log::{debug, warn};

use crate::timer::{SharedClock, Timer};
use crate::u2f::error::Error;
use crate::u2f::hid::{
    frame::{fragment, Packet, Report, U2fHidFrame},
    hid_const::*,
    Cmd, HidErrorCode,
};

/// Outcome of handing a report to the USB stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// A previous IN report is still in flight
    Busy,
}

/// Raw HID endpoint pair of the device
pub trait HidTransport {
    /// Queue one IN report for the host.
    fn send_report(&mut self, report: &Report) -> Result<SendStatus, Error>;

    /// Take the next OUT report received from the host, if any.
    fn poll_report(&mut self) -> Option<Report>;

    /// Run the USB stack event queue once.
    fn pump_events(&mut self) {}
}

/// A fully reassembled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidMessage {
    pub cid: u32,
    pub cmd: Cmd,
    pub payload: Vec<u8>,
}

pub struct FrameCodec {
    transport: Box<dyn HidTransport>,
    clock: SharedClock,
    send_timeout_ms: u32,
}

impl FrameCodec {
    pub fn new(transport: Box<dyn HidTransport>, clock: SharedClock, send_timeout_ms: u32) -> Self {
        FrameCodec {
            transport,
            clock,
            send_timeout_ms,
        }
    }

    pub fn pump_events(&mut self) {
        self.transport.pump_events();
    }

    /// Fragments `data` into reports and transmits them in order.
    ///
    /// Every report waits for the previous one to leave, bounded by the send timeout.
    pub fn send(&mut self, cid: u32, cmd: Cmd, data: &[u8]) -> Result<(), Error> {
        for report in fragment(cid, cmd, data)? {
            self.send_report(cid, &report)?;
        }
        Ok(())
    }

    pub fn send_error(&mut self, cid: u32, code: HidErrorCode) -> Result<(), Error> {
        debug!("Sending error {:?} on channel {:#010x}", code, cid);
        self.send(cid, Cmd::Error, &[code.into()])
    }

    fn send_report(&mut self, cid: u32, report: &Report) -> Result<(), Error> {
        let mut timer = Timer::new(self.clock.clone());
        timer.start(self.send_timeout_ms);

        loop {
            match self.transport.send_report(report)? {
                SendStatus::Sent => return Ok(()),
                SendStatus::Busy => {
                    if timer.expired() {
                        warn!("IN report still pending after {} ms, giving up", self.send_timeout_ms);
                        return Err(Error::hid(cid, HidErrorCode::Timeout));
                    }
                    self.transport.pump_events();
                }
            }
        }
    }

    fn wait_report(&mut self, cid: u32, timer: &Timer) -> Result<Report, Error> {
        loop {
            if let Some(report) = self.transport.poll_report() {
                return Ok(report);
            }
            if timer.expired() {
                return Err(Error::hid(cid, HidErrorCode::Timeout));
            }
            self.transport.pump_events();
        }
    }

    /// Reassembles the next message.
    ///
    /// Fails with `NoMessage` right away when nothing is pending. Continuation
    /// frames are awaited for at most `timeout_ms`; frames for other channels
    /// met during reassembly are dropped.
    pub fn recv(&mut self, timeout_ms: u32) -> Result<HidMessage, Error> {
        let mut timer = Timer::new(self.clock.clone());
        timer.start(timeout_ms);

        let report = self.transport.poll_report().ok_or(Error::NoMessage)?;
        let frame = U2fHidFrame::read_from(&report)?;
        let cid = frame.cid;

        let (cmd, total) = match frame.packet {
            Packet::Init { cmd, bcnt, .. } => (Cmd::from(cmd), bcnt as usize),
            Packet::Cont { .. } => return Err(Error::hid(cid, HidErrorCode::InvalidCommand)),
        };

        if total > MAX_MESSAGE_SIZE {
            return Err(Error::hid(cid, HidErrorCode::InvalidLength));
        }

        let mut payload = Vec::with_capacity(total);
        let first = total.min(INIT_DATA_SIZE);
        payload.extend_from_slice(&frame.data()[..first]);

        let mut seq = 0u8;
        while payload.len() < total {
            let frame = U2fHidFrame::read_from(&self.wait_report(cid, &timer)?)?;

            if frame.cid != cid {
                debug!("Skipping frame for channel {:#010x} while reassembling {:#010x}", frame.cid, cid);
                continue;
            }

            match frame.frame_seq() {
                None => return Err(Error::hid(cid, HidErrorCode::InvalidCommand)),
                Some(s) if s != seq => return Err(Error::hid(cid, HidErrorCode::InvalidSequence)),
                Some(_) => {}
            }
            seq = (seq + 1) & SEQ_MAX;

            let len = (total - payload.len()).min(CONT_DATA_SIZE);
            payload.extend_from_slice(&frame.data()[..len]);
        }

        Ok(HidMessage { cid, cmd, payload })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::timer::ManualClock;

    #[derive(Default)]
    struct Wire {
        to_device: VecDeque<Report>,
        to_host: Vec<Report>,
        busy_for: usize,
    }

    #[derive(Clone)]
    struct Loopback {
        wire: Arc<Mutex<Wire>>,
        clock: Arc<ManualClock>,
    }

    impl HidTransport for Loopback {
        fn send_report(&mut self, report: &Report) -> Result<SendStatus, Error> {
            let mut wire = self.wire.lock().unwrap();
            if wire.busy_for > 0 {
                wire.busy_for -= 1;
                return Ok(SendStatus::Busy);
            }
            wire.to_host.push(*report);
            Ok(SendStatus::Sent)
        }

        fn poll_report(&mut self) -> Option<Report> {
            self.wire.lock().unwrap().to_device.pop_front()
        }

        fn pump_events(&mut self) {
            self.clock.tick();
        }
    }

    fn codec() -> (FrameCodec, Loopback) {
        let clock = Arc::new(ManualClock::new(0));
        let lb = Loopback {
            wire: Arc::new(Mutex::new(Wire::default())),
            clock: clock.clone(),
        };
        (FrameCodec::new(Box::new(lb.clone()), clock, 100), lb)
    }

    fn feed(lb: &Loopback, reports: Vec<Report>) {
        lb.wire.lock().unwrap().to_device.extend(reports);
    }

    #[test]
    fn send_then_recv_round_trip() {
        for len in [0usize, 1, 56, 57, 58, 116, 117, 1024, MAX_MESSAGE_SIZE] {
            let (mut codec, lb) = codec();
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();

            codec.send(0x11223344, Cmd::Msg, &data).unwrap();
            let sent = std::mem::take(&mut lb.wire.lock().unwrap().to_host);
            assert_eq!(sent.len(), 1 + len.saturating_sub(57).div_ceil(59));

            feed(&lb, sent);
            let msg = codec.recv(1000).unwrap();
            assert_eq!(msg.cid, 0x11223344);
            assert_eq!(msg.cmd, Cmd::Msg);
            assert_eq!(msg.payload, data);
        }
    }

    #[test]
    fn recv_without_report_is_no_message() {
        let (mut codec, _lb) = codec();
        assert!(matches!(codec.recv(1000), Err(Error::NoMessage)));
    }

    #[test]
    fn recv_rejects_leading_continuation() {
        let (mut codec, lb) = codec();
        feed(&lb, vec![U2fHidFrame::cont(9, 0, &[1, 2]).to_report().unwrap()]);
        assert!(matches!(
            codec.recv(1000),
            Err(Error::Hid {
                cid: 9,
                code: HidErrorCode::InvalidCommand
            })
        ));
    }

    #[test]
    fn recv_rejects_bad_sequence() {
        let (mut codec, lb) = codec();
        let mut reports = fragment(9, Cmd::Ping, &[0x55; 200]).unwrap();
        reports.swap(1, 2);
        feed(&lb, reports);
        assert!(matches!(
            codec.recv(1000),
            Err(Error::Hid {
                code: HidErrorCode::InvalidSequence,
                ..
            })
        ));
    }

    #[test]
    fn recv_skips_other_channels() {
        let (mut codec, lb) = codec();
        let data = [0x42u8; 150];
        let mut reports = fragment(9, Cmd::Ping, &data).unwrap();
        let intruder = U2fHidFrame::cont(10, 0, &[0xee; 59]).to_report().unwrap();
        reports.insert(1, intruder);
        reports.insert(3, intruder);
        feed(&lb, reports);

        let msg = codec.recv(1000).unwrap();
        assert_eq!(msg.cid, 9);
        assert_eq!(msg.payload, data.to_vec());
    }

    #[test]
    fn recv_times_out_on_missing_continuation() {
        let (mut codec, lb) = codec();
        let mut reports = fragment(9, Cmd::Ping, &[0x01; 100]).unwrap();
        reports.truncate(1);
        feed(&lb, reports);
        assert!(matches!(
            codec.recv(50),
            Err(Error::Hid {
                code: HidErrorCode::Timeout,
                ..
            })
        ));
    }

    #[test]
    fn recv_rejects_oversized_length() {
        let (mut codec, lb) = codec();
        let mut report = U2fHidFrame::init(9, Cmd::Msg, 0, &[]).to_report().unwrap();
        report[5] = 0xff;
        report[6] = 0xff;
        feed(&lb, vec![report]);
        assert!(matches!(
            codec.recv(50),
            Err(Error::Hid {
                code: HidErrorCode::InvalidLength,
                ..
            })
        ));
    }

    #[test]
    fn send_waits_for_in_flight_report() {
        let (mut codec, lb) = codec();
        lb.wire.lock().unwrap().busy_for = 10;
        codec.send(1, Cmd::Ping, &[1, 2, 3]).unwrap();
        assert_eq!(lb.wire.lock().unwrap().to_host.len(), 1);
    }

    #[test]
    fn send_gives_up_when_transport_stays_busy() {
        let (mut codec, lb) = codec();
        lb.wire.lock().unwrap().busy_for = usize::MAX;
        assert!(matches!(
            codec.send(1, Cmd::Ping, &[1, 2, 3]),
            Err(Error::Hid {
                code: HidErrorCode::Timeout,
                ..
            })
        ));
        assert!(lb.wire.lock().unwrap().to_host.is_empty());
    }
}
