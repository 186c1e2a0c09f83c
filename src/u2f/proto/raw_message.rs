use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::u2f::error::Error;
use crate::u2f::proto::constants::*;
use crate::u2f::proto::raw_message::apdu::{ApduFrame, Request, Response};

pub struct RegisterRequest {
    pub challenge: [u8; U2F_CHAL_SIZE],
    pub application: [u8; U2F_APPID_SIZE],
}

pub struct RegisterResponse {
    pub reserved: u8,
    pub user_public_key: [u8; U2F_EC_POINT_SIZE],
    pub key_handle_length: u8,
    pub key_handle: Vec<u8>,
    pub attestation_cert: Vec<u8>,
    pub signature: Vec<u8>,
}

pub struct AuthenticateRequest {
    pub control: u8,
    pub challenge: [u8; U2F_CHAL_SIZE],
    pub application: [u8; U2F_APPID_SIZE],
    pub key_h_len: u8,
    pub key_handle: Vec<u8>,
}

pub struct AuthenticateResponse {
    pub user_presence: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

pub struct VersionRequest {}

pub struct VersionResponse {
    pub version: String,
}

pub trait Message {
    type Apdu: ApduFrame;
    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized;
    fn into_apdu(self) -> Result<Self::Apdu, Error>;
}

impl Message for RegisterRequest {
    type Apdu = Request;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.command_mode != U2F_REGISTER {
            return Err(Error::U2FErrorCode(U2F_SW_INS_NOT_SUPPORTED));
        }

        if apdu.data_len != U2F_REGISTER_REQ_SIZE {
            return Err(Error::U2FErrorCode(U2F_SW_WRONG_LENGTH));
        }

        let mut cursor = Cursor::new(apdu.data);

        let mut challenge = [0u8; U2F_CHAL_SIZE];
        cursor.read_exact(&mut challenge)?;

        let mut application = [0u8; U2F_APPID_SIZE];
        cursor.read_exact(&mut application)?;

        Ok(RegisterRequest { challenge, application })
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        let RegisterRequest { challenge, application } = self;

        let mut data = Vec::with_capacity(U2F_REGISTER_REQ_SIZE);

        data.extend_from_slice(&challenge);
        data.extend_from_slice(&application);

        Ok(Request {
            class_byte: 0,
            command_mode: U2F_REGISTER,
            param_1: 0,
            param_2: 0,
            data_len: data.len(),
            data,
            max_rsp_len: Some(MAX_RESPONSE_LEN_EXTENDED),
        })
    }
}

impl Message for RegisterResponse {
    type Apdu = Response;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.status != U2F_SW_NO_ERROR {
            return Err(apdu.status.into());
        }

        apdu.data.ok_or(Error::MalformedApdu).and_then(|data| {
            let data_len = data.len();
            let mut cursor = Cursor::new(data);
            let reserved = cursor.read_u8()?;

            if reserved != U2F_REGISTER_ID {
                return Err(Error::MalformedApdu);
            }

            let mut user_public_key = [0u8; U2F_EC_POINT_SIZE];
            cursor.read_exact(&mut user_public_key)?;

            let key_handle_length = cursor.read_u8()?;

            let mut key_handle = vec![0u8; key_handle_length as usize];
            cursor.read_exact(&mut key_handle[..])?;

            let remaining = data_len.checked_sub(cursor.position() as usize).ok_or(Error::MalformedApdu)?;
            let mut attestation_cert = vec![0u8; remaining];
            cursor.read_exact(&mut attestation_cert[..])?;

            let header_len = attestation_cert.len().min(ASN1_MAX_FOLLOWING_LEN_BYTES + 2);
            let cert_len = attestation_cert_length(&attestation_cert[..header_len])?;

            if cert_len > U2F_MAX_ATT_CERT_SIZE || cert_len > attestation_cert.len() {
                return Err(Error::MalformedApdu);
            }

            let signature = attestation_cert.split_off(cert_len);

            Ok(RegisterResponse {
                reserved,
                user_public_key,
                key_handle_length,
                key_handle,
                attestation_cert,
                signature,
            })
        })
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        let RegisterResponse {
            reserved,
            user_public_key,
            key_handle_length,
            key_handle,
            attestation_cert,
            signature,
        } = self;

        let mut data = Vec::new();

        data.write_u8(reserved)?;
        data.write_all(&user_public_key)?;
        data.write_u8(key_handle_length)?;
        data.write_all(&key_handle)?;
        data.write_all(&attestation_cert)?;
        data.write_all(&signature)?;

        Ok(Response {
            data: Some(data),
            status: U2F_SW_NO_ERROR,
        })
    }
}

impl Message for AuthenticateRequest {
    type Apdu = Request;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.command_mode != U2F_AUTHENTICATE {
            return Err(Error::U2FErrorCode(U2F_SW_INS_NOT_SUPPORTED));
        }

        if apdu.data_len > U2F_AUTHENTICATE_REQ_MAX_SIZE {
            return Err(Error::U2FErrorCode(U2F_SW_WRONG_LENGTH));
        }

        let control = apdu.param_1;

        match control {
            U2F_AUTH_CHECK_ONLY | U2F_AUTH_ENFORCE | U2F_AUTH_DONT_ENFORCE => {}
            _ => {
                return Err(Error::U2FErrorCode(U2F_SW_WRONG_DATA));
            }
        }

        let mut cursor = Cursor::new(apdu.data);

        let mut challenge = [0u8; U2F_CHAL_SIZE];
        cursor.read_exact(&mut challenge)?;

        let mut application = [0u8; U2F_APPID_SIZE];
        cursor.read_exact(&mut application)?;

        let key_h_len = cursor.read_u8()?;
        let mut key_handle = vec![0u8; key_h_len as usize];
        cursor.read_exact(&mut key_handle[..])?;

        Ok(AuthenticateRequest {
            control,
            challenge,
            application,
            key_h_len,
            key_handle,
        })
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        let AuthenticateRequest {
            control,
            challenge,
            application,
            key_h_len,
            key_handle,
        } = self;

        let mut data = Vec::new();

        data.write_all(&challenge)?;
        data.write_all(&application)?;

        data.write_u8(key_h_len)?;
        data.write_all(&key_handle)?;

        Ok(Request {
            class_byte: 0,
            command_mode: U2F_AUTHENTICATE,
            param_1: control,
            param_2: 0,
            data_len: data.len(),
            data,
            max_rsp_len: Some(MAX_RESPONSE_LEN_EXTENDED),
        })
    }
}

impl Message for AuthenticateResponse {
    type Apdu = Response;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.status != U2F_SW_NO_ERROR {
            return Err(apdu.status.into());
        }

        apdu.data.ok_or(Error::MalformedApdu).and_then(|data| {
            let data_len = data.len();
            let mut cursor = Cursor::new(data);

            let user_presence = cursor.read_u8()?;
            let counter = cursor.read_u32::<BigEndian>()?;

            let mut signature = vec![0u8; data_len - cursor.position() as usize];
            cursor.read_exact(&mut signature[..])?;

            Ok(AuthenticateResponse {
                user_presence,
                counter,
                signature,
            })
        })
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        let AuthenticateResponse {
            user_presence,
            counter,
            mut signature,
        } = self;

        let mut data = Vec::with_capacity(1 + U2F_CTR_SIZE + signature.len());

        data.write_u8(user_presence)?;

        data.write_u32::<BigEndian>(counter)?;

        data.append(&mut signature);

        Ok(Response {
            data: Some(data),
            status: U2F_SW_NO_ERROR,
        })
    }
}

impl Message for VersionRequest {
    type Apdu = Request;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.command_mode != U2F_VERSION {
            return Err(Error::U2FErrorCode(U2F_SW_INS_NOT_SUPPORTED));
        }

        if apdu.data_len > 0 {
            return Err(Error::U2FErrorCode(U2F_SW_WRONG_LENGTH));
        }

        Ok(VersionRequest {})
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        Ok(Request {
            class_byte: 0,
            command_mode: U2F_VERSION,
            param_1: 0,
            param_2: 0,
            data_len: 0,
            data: Vec::new(),
            max_rsp_len: Some(MAX_RESPONSE_LEN_EXTENDED),
        })
    }
}

impl Message for VersionResponse {
    type Apdu = Response;

    fn from_apdu(apdu: Self::Apdu) -> Result<Self, Error>
    where
        Self: Sized,
    {
        if apdu.status != U2F_SW_NO_ERROR {
            return Err(apdu.status.into());
        }

        apdu.data.ok_or(Error::MalformedApdu).and_then(|data| {
            Ok(VersionResponse {
                version: String::from_utf8(data).map_err(|e| Error::Other(format!("Got error while parsing version string: {:?}", e)))?,
            })
        })
    }

    fn into_apdu(self) -> Result<Self::Apdu, Error> {
        Ok(Response {
            data: Some(self.version.as_bytes().to_vec()),
            status: U2F_SW_NO_ERROR,
        })
    }
}

pub const MAX_RESPONSE_LEN_EXTENDED: usize = 65536;

pub mod apdu {
    use std::io::{Cursor, Read, Write};

    use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

    use super::MAX_RESPONSE_LEN_EXTENDED;
    use crate::u2f::error::Error;
    use crate::u2f::proto::constants::U2F_APDU_HEADER_SIZE;

    pub trait ApduFrame {
        fn read_from(slice: &[u8]) -> Result<Self, Error>
        where
            Self: Sized;
        fn write_to<W: Write>(self, writer: &mut W) -> Result<(), Error>;
        fn get_frame_size(&self) -> usize;
    }

    /// Extended length command APDU, the only encoding carried by U2FHID_MSG
    #[derive(Clone, Debug)]
    pub struct Request {
        pub class_byte: u8,
        pub command_mode: u8,
        pub param_1: u8,
        pub param_2: u8,
        pub data_len: usize,
        pub data: Vec<u8>,
        pub max_rsp_len: Option<usize>,
    }

    impl ApduFrame for Request {
        fn read_from(slice: &[u8]) -> Result<Self, Error>
        where
            Self: Sized,
        {
            //              +--+--+--+--+---+---+---+------+--+--+
            //              |cl|in|p1|p2|lc1|lc2|lc3| data |le|le|
            //              +--+--+--+--+---+---+---+------+--+--+
            // lc is a 24 bits big endian value, le is optional and ignored
            if slice.len() < U2F_APDU_HEADER_SIZE {
                return Err(Error::MalformedApdu);
            }

            let mut reader = Cursor::new(slice);
            let class_byte = reader.read_u8()?;
            let command_mode = reader.read_u8()?;
            let param_1 = reader.read_u8()?;
            let param_2 = reader.read_u8()?;
            let data_len = reader.read_u24::<BigEndian>()? as usize;

            let remaining = slice.len() - U2F_APDU_HEADER_SIZE;
            if data_len > remaining {
                return Err(Error::MalformedApdu);
            }

            let mut data = vec![0u8; data_len];
            reader.read_exact(&mut data[..])?;

            let max_rsp_len = match remaining - data_len {
                2 => match reader.read_u16::<BigEndian>()? {
                    0x0000 => Some(MAX_RESPONSE_LEN_EXTENDED),
                    l_e => Some(l_e as usize),
                },
                _ => None,
            };

            Ok(Request {
                class_byte,
                command_mode,
                param_1,
                param_2,
                data_len,
                data,
                max_rsp_len,
            })
        }

        fn write_to<W: Write>(self, writer: &mut W) -> Result<(), Error> {
            let Request {
                class_byte,
                command_mode,
                param_1,
                param_2,
                data_len,
                data,
                max_rsp_len,
            } = self;

            writer.write_u8(class_byte)?;
            writer.write_u8(command_mode)?;
            writer.write_u8(param_1)?;
            writer.write_u8(param_2)?;
            writer.write_u24::<BigEndian>(data_len as u32)?;
            writer.write_all(&data[..])?;

            if let Some(max_len) = max_rsp_len {
                if max_len == MAX_RESPONSE_LEN_EXTENDED {
                    writer.write_u16::<BigEndian>(0x0000)?;
                } else {
                    writer.write_u16::<BigEndian>(max_len as u16)?;
                }
            }

            Ok(())
        }

        fn get_frame_size(&self) -> usize {
            let mut len = U2F_APDU_HEADER_SIZE + self.data_len;

            if self.max_rsp_len.is_some() {
                len += 2;
            }

            len
        }
    }

    #[derive(Clone, Debug)]
    pub struct Response {
        pub data: Option<Vec<u8>>,
        pub status: u16,
    }

    impl Response {
        pub fn from_status(sw: u16) -> Self {
            Response { data: None, status: sw }
        }

        pub fn to_bytes(self) -> Result<Vec<u8>, Error> {
            let mut bytes = Vec::with_capacity(self.get_frame_size());
            self.write_to(&mut bytes)?;
            Ok(bytes)
        }
    }

    impl ApduFrame for Response {
        fn read_from(slice: &[u8]) -> Result<Self, Error>
        where
            Self: Sized,
        {
            let slice_len = slice.len();

            if slice_len < 2 {
                return Err(Error::MalformedApdu);
            }

            let rsp_data = &slice[0..slice_len - 2];

            let status = (&slice[slice_len - 2..slice_len]).read_u16::<BigEndian>()?;

            let data = if !rsp_data.is_empty() { Some(rsp_data.to_vec()) } else { None };

            Ok(Response { data, status })
        }

        fn write_to<W: Write>(self, writer: &mut W) -> Result<(), Error> {
            let Response { data, status } = self;

            if let Some(data) = data {
                writer.write_all(&data[..])?;
            }

            Ok(writer.write_u16::<BigEndian>(status)?)
        }

        fn get_frame_size(&self) -> usize {
            let mut len = 2; // status bytes
            if let Some(ref data) = self.data {
                len += data.len();
            }
            len
        }
    }
}

/// Check bytes to find len of the cert according to the ASN1 DER len encoding.
/// http://en.wikipedia.org/wiki/X.690
pub fn attestation_cert_length(asn1: &[u8]) -> Result<usize, Error> {
    if asn1.len() < 2 {
        return Err(Error::Other("Invalid data len".to_string()));
    }

    if asn1[0] != ASN1_SEQ_TYPE {
        return Err(Error::Other("Invalid type".to_string()));
    }

    let len = asn1[1];
    if len & ASN1_DEFINITE_SHORT_MASK == 0 {
        // check if len is definite short (len <= 127)
        return Ok(len as usize + 2);
    }

    let following_bytes = (len & ASN1_DEFINITE_LONG_FOLLOWING_MASK) as usize;
    if following_bytes == 0 || asn1.len() < 2 + following_bytes {
        return Err(Error::Other("Invalid ans len, expected definite long".to_string()));
    }

    if following_bytes > std::mem::size_of::<usize>() {
        return Err(Error::Other("Certificate length does not fit in usize".to_string()));
    }

    let overflow = || Error::Other("Certificate length overflow".to_string());

    let mut len: usize = 0;
    for byte in &asn1[2..2 + following_bytes] {
        len = len.checked_mul(256).and_then(|l| l.checked_add(*byte as usize)).ok_or_else(overflow)?;
    }

    // Add the length bytes, type and first len byte
    len.checked_add(following_bytes).and_then(|l| l.checked_add(2)).ok_or_else(overflow)
}

#[test]
fn request_header_is_bounds_checked() {
    assert!(matches!(apdu::Request::read_from(&[0, 1, 0, 0]), Err(Error::MalformedApdu)));
    assert!(matches!(apdu::Request::read_from(&[0, 1, 0, 0, 0, 0, 64, 1, 2]), Err(Error::MalformedApdu)));

    let req = apdu::Request::read_from(&[0, 3, 0, 0, 0, 0, 0]).unwrap();
    assert_eq!(req.command_mode, U2F_VERSION);
    assert_eq!(req.data_len, 0);
    assert!(req.max_rsp_len.is_none());
}

#[test]
fn request_write_read_matches() {
    let req = RegisterRequest {
        challenge: [1u8; 32],
        application: [2u8; 32],
    }
    .into_apdu()
    .unwrap();

    let mut bytes = Vec::new();
    let expected_size = req.get_frame_size();
    req.write_to(&mut bytes).unwrap();
    assert_eq!(bytes.len(), expected_size);
    assert_eq!(&bytes[..7], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x40]);

    let parsed = RegisterRequest::from_apdu(apdu::Request::read_from(&bytes).unwrap()).unwrap();
    assert_eq!(parsed.challenge, [1u8; 32]);
    assert_eq!(parsed.application, [2u8; 32]);
}

#[test]
fn authenticate_request_rejects_unknown_control() {
    let mut req = AuthenticateRequest {
        control: U2F_AUTH_ENFORCE,
        challenge: [0u8; 32],
        application: [0u8; 32],
        key_h_len: 1,
        key_handle: vec![0],
    }
    .into_apdu()
    .unwrap();
    req.param_1 = 0x42;

    assert!(matches!(
        AuthenticateRequest::from_apdu(req),
        Err(Error::U2FErrorCode(U2F_SW_WRONG_DATA))
    ));
}

#[test]
fn cert_length_from_der_header() {
    assert_eq!(attestation_cert_length(&[0x30, 0x05]).unwrap(), 7);
    assert_eq!(attestation_cert_length(&[0x30, 0x82, 0x01, 0xc6]).unwrap(), 0x1c6 + 4);
    assert!(attestation_cert_length(&[0x31, 0x05]).is_err());
}

#[test]
fn cert_length_rejects_oversized_header() {
    let mut header = vec![0x30, 0x89];
    header.extend_from_slice(&[0xff; 9]);
    assert!(attestation_cert_length(&header).is_err());

    let mut header = vec![0x30, 0x88];
    header.extend_from_slice(&[0xff; 8]);
    assert!(attestation_cert_length(&header).is_err());

    let mut response = vec![U2F_REGISTER_ID];
    response.extend_from_slice(&[0x04; U2F_EC_POINT_SIZE]);
    response.push(0);
    response.extend_from_slice(&[0x30, 0x89]);
    response.extend_from_slice(&[0xff; 9]);
    let rsp = apdu::Response {
        data: Some(response),
        status: U2F_SW_NO_ERROR,
    };
    assert!(RegisterResponse::from_apdu(rsp).is_err());
}
