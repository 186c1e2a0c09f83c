use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::io::Error as IoError;

use crate::u2f::hid::HidErrorCode;

#[derive(Debug)]
pub enum Error {
    /// No report is pending on the transport
    NoMessage,
    /// Transport level failure, reported to the host as an error frame on `cid`
    Hid { cid: u32, code: HidErrorCode },
    /// Application level failure, reported to the host as a status word
    U2FErrorCode(u16),
    MalformedApdu,
    /// The anti-replay counter could not be durably written
    Persistence(String),
    /// A previous fatal error stopped the device
    Halted,
    Crypto(String),
    IoError(IoError),
    Other(String),
}

impl Error {
    pub(crate) fn hid(cid: u32, code: HidErrorCode) -> Self {
        Error::Hid { cid, code }
    }

    /// Errors after which the device must stop answering
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Persistence(_) | Error::Halted)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::IoError(e)
    }
}

impl From<u16> for Error {
    fn from(sw: u16) -> Self {
        Error::U2FErrorCode(sw)
    }
}

impl From<p256::ecdsa::Error> for Error {
    fn from(e: p256::ecdsa::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<p256::elliptic_curve::Error> for Error {
    fn from(e: p256::elliptic_curve::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<rand_core::Error> for Error {
    fn from(e: rand_core::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        use Error::*;
        match self {
            NoMessage => write!(f, "No message pending"),
            Hid { cid, code } => write!(f, "HID error {:?} on channel {:#010x}", code, cid),
            U2FErrorCode(sw) => write!(f, "U2F status word {:#06x}", sw),
            MalformedApdu => write!(f, "Malformed APDU"),
            Persistence(s) => write!(f, "Persistence failure: {}", s),
            Halted => write!(f, "Device halted"),
            Crypto(s) => write!(f, "Crypto failure: {}", s),
            IoError(io_e) => io_e.fmt(f),
            Other(s) => write!(f, "{}", s),
        }
    }
}
