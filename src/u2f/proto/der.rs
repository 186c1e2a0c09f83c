//! ASN.1 DER encoding of ECDSA signatures.
//!
//! `Ecdsa-Sig-Value ::= SEQUENCE { r INTEGER, s INTEGER }`, both integers
//! being 32 bytes big endian on P-256.

use crate::u2f::error::Error;
use crate::u2f::proto::constants::{ASN1_INT_TYPE, ASN1_SEQ_TYPE, U2F_EC_KEY_SIZE, U2F_MAX_EC_SIG_SIZE};

fn write_integer(out: &mut Vec<u8>, int: &[u8; U2F_EC_KEY_SIZE]) {
    // Minimal encoding: no leading zero bytes, but a leading one bit would
    // make the integer negative
    let first = int.iter().position(|b| *b != 0).unwrap_or(U2F_EC_KEY_SIZE - 1);
    let int = &int[first..];
    let pad = int[0] & 0x80 != 0;

    out.push(ASN1_INT_TYPE);
    out.push(int.len() as u8 + pad as u8);
    if pad {
        out.push(0x00);
    }
    out.extend_from_slice(int);
}

/// Encodes a raw `(r, s)` pair, at most 72 bytes.
pub fn encode_signature(r: &[u8; U2F_EC_KEY_SIZE], s: &[u8; U2F_EC_KEY_SIZE]) -> Vec<u8> {
    let mut body = Vec::with_capacity(U2F_MAX_EC_SIG_SIZE - 2);
    write_integer(&mut body, r);
    write_integer(&mut body, s);

    let mut sig = Vec::with_capacity(body.len() + 2);
    sig.push(ASN1_SEQ_TYPE);
    sig.push(body.len() as u8);
    sig.extend_from_slice(&body);
    sig
}

fn read_integer<'a>(input: &'a [u8]) -> Result<([u8; U2F_EC_KEY_SIZE], &'a [u8]), Error> {
    if input.len() < 2 || input[0] != ASN1_INT_TYPE {
        return Err(Error::Other("Expected DER integer".to_string()));
    }

    let len = input[1] as usize;
    let rest = &input[2..];
    if len == 0 || len > U2F_EC_KEY_SIZE + 1 || rest.len() < len {
        return Err(Error::Other("Invalid DER integer length".to_string()));
    }

    let (int, rest) = rest.split_at(len);
    let int = match int {
        [0x00, tail @ ..] if int.len() == U2F_EC_KEY_SIZE + 1 => tail,
        _ if int.len() == U2F_EC_KEY_SIZE + 1 => return Err(Error::Other("Integer too large".to_string())),
        _ => int,
    };

    let mut out = [0u8; U2F_EC_KEY_SIZE];
    out[U2F_EC_KEY_SIZE - int.len()..].copy_from_slice(int);
    Ok((out, rest))
}

/// Recovers the fixed size `(r, s)` pair from a DER signature.
pub fn decode_signature(der: &[u8]) -> Result<([u8; U2F_EC_KEY_SIZE], [u8; U2F_EC_KEY_SIZE]), Error> {
    if der.len() < 2 || der[0] != ASN1_SEQ_TYPE || der[1] as usize != der.len() - 2 {
        return Err(Error::Other("Invalid DER sequence".to_string()));
    }

    let (r, rest) = read_integer(&der[2..])?;
    let (s, rest) = read_integer(rest)?;

    if !rest.is_empty() {
        return Err(Error::Other("Trailing bytes after signature".to_string()));
    }

    Ok((r, s))
}
