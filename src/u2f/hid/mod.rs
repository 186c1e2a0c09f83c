pub mod channel;
pub mod codec;
pub mod frame;

pub mod hid_const {
    // From : Common U2F HID transport header - Review Draft
    // 2014-10-08

    // Size of HID reports

    pub const HID_RPT_SIZE: usize = 64; // Default size of raw HID report

    // Frame layout - command- and continuation frames

    pub const CID_BROADCAST: u32 = 0xffffffff; // Broadcast channel id

    pub const TYPE_MASK: u8 = 0x80; // Frame type mask
    pub const TYPE_INIT: u8 = 0x80; // Initial frame identifier
    pub const TYPE_CONT: u8 = 0x00; // Continuation frame identifier

    pub const INIT_HEADER_SIZE: usize = 7; // cid + cmd + bcnth + bcntl
    pub const CONT_HEADER_SIZE: usize = 5; // cid + seq
    pub const INIT_DATA_SIZE: usize = HID_RPT_SIZE - INIT_HEADER_SIZE;
    pub const CONT_DATA_SIZE: usize = HID_RPT_SIZE - CONT_HEADER_SIZE;

    pub const SEQ_MAX: u8 = 0x7f; // Sequence numbers wrap after this value

    // Largest message that fits in one initial frame plus 128 continuation frames
    pub const MAX_MESSAGE_SIZE: usize = INIT_DATA_SIZE + (SEQ_MAX as usize + 1) * CONT_DATA_SIZE;

    // General constants

    pub const U2FHID_IF_VERSION: u8 = 2; // Current interface implementation version
    pub const U2FHID_TRANS_TIMEOUT: u32 = 3000; // Default message timeout in ms

    // U2FHID_INIT command defines

    pub const INIT_NONCE_SIZE: usize = 8; // Size of channel initialization challenge
    pub const INIT_RESP_SIZE: usize = INIT_NONCE_SIZE + 4 + 5;
    pub const CAPFLAG_WINK: u8 = 0x01; // Device supports WINK command

    // U2FHID command codes, without the TYPE_INIT bit

    pub const U2FHID_VENDOR_FIRST: u8 = 0x40; // First vendor defined command
    pub const U2FHID_VENDOR_LAST: u8 = 0x7f; // Last vendor defined command
}

/// U2FHID commands, as carried in the low 7 bits of an initial frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// Echo data through local processor only
    Ping,
    /// Send U2F message frame
    Msg,
    /// Send lock channel command
    Lock,
    /// Channel initialization
    Init,
    /// Send device identification wink
    Wink,
    /// Protocol resync command
    Sync,
    /// Error response
    Error,
    /// Vendor defined command
    Vendor(u8),
    Unknown(u8),
}

impl From<u8> for Cmd {
    fn from(value: u8) -> Self {
        use hid_const::{U2FHID_VENDOR_FIRST, U2FHID_VENDOR_LAST};
        match value & !hid_const::TYPE_MASK {
            0x01 => Cmd::Ping,
            0x03 => Cmd::Msg,
            0x04 => Cmd::Lock,
            0x06 => Cmd::Init,
            0x08 => Cmd::Wink,
            0x3c => Cmd::Sync,
            0x3f => Cmd::Error,
            v @ U2FHID_VENDOR_FIRST..=U2FHID_VENDOR_LAST => Cmd::Vendor(v),
            v => Cmd::Unknown(v),
        }
    }
}

impl From<Cmd> for u8 {
    fn from(cmd: Cmd) -> Self {
        match cmd {
            Cmd::Ping => 0x01,
            Cmd::Msg => 0x03,
            Cmd::Lock => 0x04,
            Cmd::Init => 0x06,
            Cmd::Wink => 0x08,
            Cmd::Sync => 0x3c,
            Cmd::Error => 0x3f,
            Cmd::Vendor(v) | Cmd::Unknown(v) => v & !hid_const::TYPE_MASK,
        }
    }
}

/// Low-level error codes carried by a `Cmd::Error` frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HidErrorCode {
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x03,
    InvalidSequence = 0x04,
    Timeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0a,
    SyncFail = 0x0b,
    Other = 0x7f,
}

impl From<HidErrorCode> for u8 {
    fn from(code: HidErrorCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for HidErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x01 => Ok(HidErrorCode::InvalidCommand),
            0x02 => Ok(HidErrorCode::InvalidParameter),
            0x03 => Ok(HidErrorCode::InvalidLength),
            0x04 => Ok(HidErrorCode::InvalidSequence),
            0x05 => Ok(HidErrorCode::Timeout),
            0x06 => Ok(HidErrorCode::ChannelBusy),
            0x0a => Ok(HidErrorCode::LockRequired),
            0x0b => Ok(HidErrorCode::SyncFail),
            0x7f => Ok(HidErrorCode::Other),
            v => Err(v),
        }
    }
}

#[test]
fn cmd_byte_mapping() {
    assert_eq!(Cmd::from(0x83), Cmd::Msg);
    assert_eq!(Cmd::from(0x86), Cmd::Init);
    assert_eq!(Cmd::from(0xc1), Cmd::Vendor(0x41));
    assert_eq!(Cmd::from(0x22), Cmd::Unknown(0x22));
    assert_eq!(u8::from(Cmd::Sync), 0x3c);
    assert_eq!(hid_const::MAX_MESSAGE_SIZE, 7609);
}
