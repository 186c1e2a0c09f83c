use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::u2f::error::Error;
use crate::u2f::hid::{hid_const::*, Cmd};

pub type Report = [u8; HID_RPT_SIZE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Init {
        cmd: u8,  // Command, without the frame type bit
        bcnt: u16, // Message byte count
        data: [u8; INIT_DATA_SIZE], // Data payload
    },
    Cont {
        seq: u8, // Sequence number
        data: [u8; CONT_DATA_SIZE], // Data payload
    },
}

/// One HID report, decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct U2fHidFrame {
    pub cid: u32, // Channel identifier
    pub packet: Packet,
}

impl U2fHidFrame {
    /// Initial frame carrying the first `INIT_DATA_SIZE` bytes of `data`
    pub fn init(cid: u32, cmd: Cmd, total_len: u16, data: &[u8]) -> Self {
        let mut payload = [0u8; INIT_DATA_SIZE];
        let len = data.len().min(INIT_DATA_SIZE);
        payload[..len].copy_from_slice(&data[..len]);

        U2fHidFrame {
            cid,
            packet: Packet::Init {
                cmd: cmd.into(),
                bcnt: total_len,
                data: payload,
            },
        }
    }

    /// Continuation frame carrying the first `CONT_DATA_SIZE` bytes of `data`
    pub fn cont(cid: u32, seq: u8, data: &[u8]) -> Self {
        let mut payload = [0u8; CONT_DATA_SIZE];
        let len = data.len().min(CONT_DATA_SIZE);
        payload[..len].copy_from_slice(&data[..len]);

        U2fHidFrame {
            cid,
            packet: Packet::Cont {
                seq: seq & SEQ_MAX,
                data: payload,
            },
        }
    }

    #[inline]
    pub fn frame_type(&self) -> u8 {
        match self.packet {
            Packet::Init { .. } => TYPE_INIT,
            Packet::Cont { .. } => TYPE_CONT,
        }
    }

    #[inline]
    pub fn frame_cmd(&self) -> Option<Cmd> {
        match self.packet {
            Packet::Init { cmd, .. } => Some(Cmd::from(cmd)),
            _ => None,
        }
    }

    #[inline]
    pub fn frame_seq(&self) -> Option<u8> {
        match self.packet {
            Packet::Cont { seq, .. } => Some(seq),
            _ => None,
        }
    }

    #[inline]
    pub fn msg_len(&self) -> Option<u16> {
        match self.packet {
            Packet::Init { bcnt, .. } => Some(bcnt),
            _ => None,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self.packet {
            Packet::Init { ref data, .. } => data,
            Packet::Cont { ref data, .. } => data,
        }
    }

    pub fn read_from(report: &Report) -> Result<Self, Error> {
        let mut reader = Cursor::new(&report[..]);
        let cid = reader.read_u32::<BigEndian>()?;
        let type_byte = reader.read_u8()?;

        let packet = if type_byte & TYPE_MASK == TYPE_INIT {
            let bcnt = reader.read_u16::<BigEndian>()?;
            let mut data = [0u8; INIT_DATA_SIZE];
            reader.read_exact(&mut data)?;
            Packet::Init {
                cmd: type_byte & !TYPE_MASK,
                bcnt,
                data,
            }
        } else {
            let mut data = [0u8; CONT_DATA_SIZE];
            reader.read_exact(&mut data)?;
            Packet::Cont { seq: type_byte, data }
        };

        Ok(U2fHidFrame { cid, packet })
    }

    pub fn to_report(&self) -> Result<Report, Error> {
        let mut report = [0u8; HID_RPT_SIZE];
        {
            let mut writer = Cursor::new(&mut report[..]);
            writer.write_u32::<BigEndian>(self.cid)?;

            match self.packet {
                Packet::Init { cmd, bcnt, ref data } => {
                    writer.write_u8(TYPE_INIT | cmd)?;
                    writer.write_u16::<BigEndian>(bcnt)?;
                    writer.write_all(data)?;
                }
                Packet::Cont { seq, ref data } => {
                    writer.write_u8(seq & SEQ_MAX)?;
                    writer.write_all(data)?;
                }
            }
        }
        Ok(report)
    }
}

/// Number of reports needed to carry a message of `len` bytes
pub fn frame_count(len: usize) -> usize {
    1 + len.saturating_sub(INIT_DATA_SIZE).div_ceil(CONT_DATA_SIZE)
}

/// Splits a message into the reports that carry it.
pub fn fragment(cid: u32, cmd: Cmd, data: &[u8]) -> Result<Vec<Report>, Error> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(Error::hid(cid, super::HidErrorCode::InvalidLength));
    }

    let mut reports = Vec::with_capacity(frame_count(data.len()));
    let first = data.len().min(INIT_DATA_SIZE);
    reports.push(U2fHidFrame::init(cid, cmd, data.len() as u16, &data[..first]).to_report()?);

    for (seq, chunk) in data[first..].chunks(CONT_DATA_SIZE).enumerate() {
        reports.push(U2fHidFrame::cont(cid, seq as u8, chunk).to_report()?);
    }

    Ok(reports)
}

#[test]
fn init_frame_layout() {
    let frame = U2fHidFrame::init(0x01020304, Cmd::Ping, 3, &[0xaa, 0xbb, 0xcc]);
    let report = frame.to_report().unwrap();

    assert_eq!(&report[..7], &[0x01, 0x02, 0x03, 0x04, 0x81, 0x00, 0x03]);
    assert_eq!(&report[7..10], &[0xaa, 0xbb, 0xcc]);
    assert!(report[10..].iter().all(|b| *b == 0));

    let decoded = U2fHidFrame::read_from(&report).unwrap();
    assert_eq!(decoded.frame_cmd(), Some(Cmd::Ping));
    assert_eq!(decoded.msg_len(), Some(3));
    assert_eq!(decoded.frame_type(), TYPE_INIT);
}

#[test]
fn cont_frame_layout() {
    let frame = U2fHidFrame::cont(CID_BROADCAST, 5, &[1u8; 70]);
    let report = frame.to_report().unwrap();

    assert_eq!(&report[..5], &[0xff, 0xff, 0xff, 0xff, 0x05]);
    assert!(report[5..].iter().all(|b| *b == 1));

    let decoded = U2fHidFrame::read_from(&report).unwrap();
    assert_eq!(decoded.frame_seq(), Some(5));
    assert_eq!(decoded.frame_cmd(), None);
    assert_eq!(decoded.data().len(), CONT_DATA_SIZE);
}

#[test]
fn fragment_counts() {
    assert_eq!(frame_count(0), 1);
    assert_eq!(frame_count(57), 1);
    assert_eq!(frame_count(58), 2);
    assert_eq!(frame_count(57 + 59), 2);
    assert_eq!(frame_count(57 + 59 + 1), 3);

    let data: Vec<u8> = (0..200u16).map(|b| b as u8).collect();
    let reports = fragment(7, Cmd::Msg, &data).unwrap();
    assert_eq!(reports.len(), frame_count(200));
    assert_eq!(reports[1][4], 0);
    assert_eq!(reports[2][4], 1);
    assert_eq!(reports[3][4], 2);

    assert!(fragment(7, Cmd::Msg, &vec![0u8; MAX_MESSAGE_SIZE + 1]).is_err());
}
