//! Recursive-descent bencode decoder
//!
//! Every function takes the input and a start offset and returns the value
//! together with the number of bytes it consumed. Callers advance their own
//! cursor; no cursor is shared across recursive calls.

use anyhow::Result;
use tracing::trace;

use crate::bencode::value::{BencodeDict, BencodeValue};
use crate::error::TorrentError;

/// Maximum nesting of lists and dictionaries
pub const MAX_DEPTH: usize = 256;

/// Decode one value starting at `start`, returning it and the bytes consumed.
///
/// Integers and string lengths must be canonical: `i03e`, `i-0e` and
/// `05:hello` are `MalformedEncoding`.
pub fn decode(data: &[u8], start: usize) -> Result<(BencodeValue, usize)> {
    decode_value(data, start, 0)
}

/// Decode a complete buffer holding exactly one value
pub fn decode_all(data: &[u8]) -> Result<BencodeValue> {
    let (value, consumed) = decode(data, 0)?;
    if consumed != data.len() {
        return Err(TorrentError::malformed_at(
            format!("trailing data: {} bytes after value", data.len() - consumed),
            consumed,
        )
        .into());
    }
    Ok(value)
}

fn decode_value(data: &[u8], start: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    let tag = *data
        .get(start)
        .ok_or_else(|| TorrentError::malformed_at("unexpected end of input", start))?;

    match tag {
        b'i' => decode_integer(data, start),
        b'0'..=b'9' => decode_string(data, start),
        b'l' | b'd' if depth >= MAX_DEPTH => {
            Err(TorrentError::malformed_at(format!("nesting deeper than {}", MAX_DEPTH), start).into())
        }
        b'l' => decode_list(data, start, depth),
        b'd' => decode_dictionary(data, start, depth),
        other => Err(TorrentError::malformed_at(format!("unknown type tag 0x{:02x}", other), start).into()),
    }
}

/// Parse canonical decimal digits: non-empty, no leading zero unless "0"
fn parse_decimal(digits: &[u8], start: usize, what: &str) -> Result<u64> {
    if digits.is_empty() {
        return Err(TorrentError::malformed_at(format!("empty {}", what), start).into());
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(TorrentError::malformed_at(format!("non-digit in {}", what), start).into());
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(TorrentError::malformed_at(format!("leading zero in {}", what), start).into());
    }
    digits.iter().try_fold(0u64, |acc, d| {
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(d - b'0')))
            .ok_or_else(|| TorrentError::malformed_at(format!("{} overflows", what), start).into())
    })
}

fn decode_integer(data: &[u8], start: usize) -> Result<(BencodeValue, usize)> {
    let body = start + 1;
    let end = data[body..]
        .iter()
        .position(|&b| b == b'e')
        .map(|p| body + p)
        .ok_or_else(|| TorrentError::malformed_at("unterminated integer", start))?;

    let raw = &data[body..end];
    let (negative, digits) = match raw.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, raw),
    };

    let magnitude = parse_decimal(digits, start, "integer")?;
    if negative && magnitude == 0 {
        return Err(TorrentError::malformed_at("negative zero", start).into());
    }

    let value = if negative {
        // i64::MIN has no positive counterpart, so compare against its magnitude
        if magnitude > i64::MAX as u64 + 1 {
            return Err(TorrentError::malformed_at("integer overflows", start).into());
        }
        (magnitude as i64).wrapping_neg()
    } else {
        i64::try_from(magnitude).map_err(|_| TorrentError::malformed_at("integer overflows", start))?
    };

    trace!("Decoded integer {} at offset {}", value, start);
    Ok((BencodeValue::Integer(value), end + 1 - start))
}

fn decode_string(data: &[u8], start: usize) -> Result<(BencodeValue, usize)> {
    let (bytes, consumed) = decode_bytes(data, start)?;
    Ok((BencodeValue::ByteString(bytes), consumed))
}

fn decode_bytes(data: &[u8], start: usize) -> Result<(Vec<u8>, usize)> {
    let colon = data[start..]
        .iter()
        .position(|&b| b == b':')
        .map(|p| start + p)
        .ok_or_else(|| TorrentError::malformed_at("unterminated string length", start))?;

    let length = parse_decimal(&data[start..colon], start, "string length")?;
    let body = colon + 1;
    let remaining = (data.len() - body) as u64;
    if length > remaining {
        return Err(TorrentError::malformed_at(
            format!("string length {} exceeds remaining input {}", length, remaining),
            start,
        )
        .into());
    }

    let end = body + length as usize;
    Ok((data[body..end].to_vec(), end - start))
}

fn decode_list(data: &[u8], start: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    let mut items = Vec::new();
    let mut pos = start + 1;

    loop {
        match data.get(pos) {
            None => return Err(TorrentError::malformed_at("unterminated list", start).into()),
            Some(b'e') => break,
            Some(_) => {
                let (item, consumed) = decode_value(data, pos, depth + 1)?;
                items.push(item);
                pos += consumed;
            }
        }
    }

    Ok((BencodeValue::List(items), pos + 1 - start))
}

fn decode_dictionary(data: &[u8], start: usize, depth: usize) -> Result<(BencodeValue, usize)> {
    let mut dict = BencodeDict::new();
    let mut pos = start + 1;

    loop {
        match data.get(pos) {
            None => return Err(TorrentError::malformed_at("unterminated dictionary", start).into()),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {
                let (key, consumed) = decode_bytes(data, pos)?;
                let key_offset = pos;
                pos += consumed;

                if data.get(pos).is_none() || data.get(pos) == Some(&b'e') {
                    return Err(TorrentError::malformed_at("dictionary key without value", key_offset).into());
                }
                let (value, consumed) = decode_value(data, pos, depth + 1)?;
                pos += consumed;

                if dict.insert(key, value).is_some() {
                    return Err(TorrentError::malformed_at("duplicate dictionary key", key_offset).into());
                }
            }
            Some(_) => {
                return Err(TorrentError::malformed_at("dictionary key must be a byte string", pos).into());
            }
        }
    }

    Ok((BencodeValue::Dictionary(dict), pos + 1 - start))
}
