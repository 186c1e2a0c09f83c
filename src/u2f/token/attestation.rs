use p256::{ecdsa::SigningKey, elliptic_curve::sec1::ToEncodedPoint};

use crate::u2f::error::Error;
use crate::u2f::proto::constants::{U2F_EC_POINT_SIZE, U2F_MAX_ATT_CERT_SIZE};
use crate::u2f::proto::raw_message::attestation_cert_length;
use crate::u2f::token::crypto::{PrivateKey, PublicPoint};

static DEFAULT_ATTESTATION_CERT: &[u8] = include_bytes!("attestation.der");

// Private scalar matching the subject key of `attestation.der`
const DEFAULT_ATTESTATION_KEY: PrivateKey = [
    0xc5, 0x00, 0xcb, 0x28, 0x4e, 0xbc, 0xfa, 0x5e, 0x6c, 0x02, 0x2f, 0x61, 0x88, 0x42, 0xb4, 0x84, 0xca, 0x7e, 0x31, 0x4c, 0x78, 0x02, 0xe1,
    0x53, 0xba, 0xa2, 0x9b, 0x52, 0x74, 0xb0, 0x06, 0x6a,
];

/// Batch attestation identity: a certificate and the key it certifies
#[derive(Clone)]
pub struct Attestation {
    cert: Vec<u8>,
    key: PrivateKey,
}

impl Attestation {
    pub fn new(cert: Vec<u8>, key: PrivateKey) -> Result<Self, Error> {
        if cert.len() > U2F_MAX_ATT_CERT_SIZE || attestation_cert_length(&cert)? != cert.len() {
            return Err(Error::Other("Attestation certificate is not a single DER sequence".to_string()));
        }

        SigningKey::from_slice(&key)?;

        Ok(Attestation { cert, key })
    }

    pub fn cert(&self) -> &[u8] {
        &self.cert
    }

    pub(crate) fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// Uncompressed public point of the attestation key
    pub fn public_key(&self) -> Result<PublicPoint, Error> {
        let key = SigningKey::from_slice(&self.key)?;
        let point = key.verifying_key().as_affine().to_encoded_point(false);

        let mut public_key = [0u8; U2F_EC_POINT_SIZE];
        public_key.copy_from_slice(point.as_bytes());
        Ok(public_key)
    }
}

impl Default for Attestation {
    fn default() -> Self {
        Attestation {
            cert: DEFAULT_ATTESTATION_CERT.to_vec(),
            key: DEFAULT_ATTESTATION_KEY,
        }
    }
}

#[test]
fn default_attestation_is_consistent() {
    let att = Attestation::default();
    assert_eq!(attestation_cert_length(att.cert()).unwrap(), att.cert().len());

    let public_key = att.public_key().unwrap();
    assert!(att.cert().windows(U2F_EC_POINT_SIZE).any(|w| w == &public_key[..]));

    assert!(Attestation::new(att.cert().to_vec(), *att.key()).is_ok());
}

#[test]
fn invalid_attestation_is_rejected() {
    let att = Attestation::default();
    let mut cert = att.cert().to_vec();
    cert.push(0);
    assert!(Attestation::new(cert, *att.key()).is_err());
    assert!(Attestation::new(att.cert().to_vec(), [0u8; 32]).is_err());

    let mut huge = vec![0x30, 0x89];
    huge.extend_from_slice(&[0xff; 9]);
    assert!(Attestation::new(huge, *att.key()).is_err());
}
