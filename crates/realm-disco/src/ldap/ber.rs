// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal BER (X.690) codec covering what LDAPv3 needs.
//!
//! ```text
//! +-----+----------------+-------------------+
//! | tag | length         | value             |
//! | 1B  | 1B or 0x8N+N B | length bytes      |
//! +-----+----------------+-------------------+
//! ```
//!
//! Only low tag numbers (< 31) and definite lengths are supported, which
//! is all RFC 4511 allows on the wire.

use crate::error::{Error, Result};

/// Universal and common tags.
pub mod tag {
    pub const BOOLEAN: u8 = 0x01;
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const ENUMERATED: u8 = 0x0a;
    pub const SEQUENCE: u8 = 0x30;
    pub const SET: u8 = 0x31;

    /// Bit marking a constructed encoding.
    pub const CONSTRUCTED: u8 = 0x20;
    pub const APPLICATION: u8 = 0x40;
    pub const CONTEXT: u8 = 0x80;
}

/// Largest length accepted when decoding (16 MB).
pub const MAX_ELEMENT_SIZE: usize = 16 * 1024 * 1024;

/// Accumulating BER encoder.
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: Vec<u8>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Write an INTEGER or ENUMERATED with the given tag.
    pub fn integer(&mut self, tag: u8, value: i64) {
        let bytes = value.to_be_bytes();
        // Drop redundant leading sign bytes.
        let mut start = 0;
        while start < 7 {
            let (b, next) = (bytes[start], bytes[start + 1]);
            if (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0) {
                start += 1;
            } else {
                break;
            }
        }
        self.octets(tag, &bytes[start..]);
    }

    pub fn boolean(&mut self, tag: u8, value: bool) {
        self.octets(tag, &[if value { 0xff } else { 0x00 }]);
    }

    /// Write a primitive element.
    pub fn octets(&mut self, tag: u8, value: &[u8]) {
        self.buf.push(tag);
        write_length(&mut self.buf, value.len());
        self.buf.extend_from_slice(value);
    }

    /// Write a constructed element whose content is produced by `f`.
    pub fn constructed(&mut self, tag: u8, f: impl FnOnce(&mut BerWriter)) {
        let mut inner = BerWriter::new();
        f(&mut inner);
        self.octets(tag, &inner.buf);
    }
}

fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        buf.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    buf.push(0x80 | (bytes.len() - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// A decoded tag/value pair borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Cursor over a sequence of BER elements.
#[derive(Debug, Clone)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_tlv(&mut self) -> Result<Tlv<'a>> {
        let rest = &self.data[self.pos..];
        let (header, len) = parse_header(rest)?.ok_or_else(|| truncated("element header"))?;
        let end = header
            .checked_add(len)
            .filter(|end| *end <= rest.len())
            .ok_or_else(|| truncated("element value"))?;
        let tlv = Tlv {
            tag: rest[0],
            value: &rest[header..end],
        };
        self.pos += end;
        Ok(tlv)
    }

    /// Read the next element, requiring `tag`.
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8]> {
        let tlv = self.read_tlv()?;
        if tlv.tag != tag {
            return Err(Error::Protocol(format!(
                "expected BER tag {:#04x}, found {:#04x}",
                tag, tlv.tag
            )));
        }
        Ok(tlv.value)
    }

    pub fn read_integer(&mut self, tag: u8) -> Result<i64> {
        decode_integer(self.expect(tag)?)
    }

    pub fn read_bool(&mut self, tag: u8) -> Result<bool> {
        match self.expect(tag)? {
            [b] => Ok(*b != 0),
            _ => Err(Error::Protocol("BOOLEAN must be one byte".into())),
        }
    }

    pub fn read_octets(&mut self, tag: u8) -> Result<&'a [u8]> {
        self.expect(tag)
    }

    pub fn read_string(&mut self, tag: u8) -> Result<String> {
        let bytes = self.expect(tag)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Protocol("LDAP string is not valid UTF-8".into()))
    }

    /// Read a constructed element and return a reader over its content.
    pub fn nested(&mut self, tag: u8) -> Result<BerReader<'a>> {
        self.expect(tag).map(BerReader::new)
    }
}

/// Decode a two's complement big-endian INTEGER.
pub fn decode_integer(bytes: &[u8]) -> Result<i64> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(Error::Protocol(format!(
            "INTEGER of {} bytes is not supported",
            bytes.len()
        )));
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

/// Total size of the first complete element in `data`.
///
/// Returns `Ok(None)` if more bytes are needed, and an error if the element
/// is malformed or larger than `max`.
pub fn element_len(data: &[u8], max: usize) -> Result<Option<usize>> {
    let Some((header, len)) = parse_header(data)? else {
        return Ok(None);
    };
    if len > max {
        return Err(Error::Protocol(format!(
            "LDAP message too large: {} > {}",
            len, max
        )));
    }
    let total = header + len;
    Ok((data.len() >= total).then_some(total))
}

/// Parse tag and length; returns (header size, value length).
fn parse_header(data: &[u8]) -> Result<Option<(usize, usize)>> {
    if data.len() < 2 {
        return Ok(None);
    }
    if data[0] & 0x1f == 0x1f {
        return Err(Error::Protocol("high-tag-number form is not supported".into()));
    }

    let first = data[1];
    if first & 0x80 == 0 {
        return Ok(Some((2, usize::from(first))));
    }

    let count = usize::from(first & 0x7f);
    if count == 0 {
        return Err(Error::Protocol("indefinite BER length is not allowed".into()));
    }
    if count > 4 {
        return Err(Error::Protocol(format!("BER length of {} bytes", count)));
    }
    if data.len() < 2 + count {
        return Ok(None);
    }

    let len = data[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
    if len > MAX_ELEMENT_SIZE {
        return Err(Error::Protocol(format!("BER element of {} bytes", len)));
    }
    Ok(Some((2 + count, len)))
}

fn truncated(what: &str) -> Error {
    Error::Protocol(format!("truncated BER {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_minimal_encoding() {
        let cases: &[(i64, &[u8])] = &[
            (0, &[0x02, 0x01, 0x00]),
            (127, &[0x02, 0x01, 0x7f]),
            (128, &[0x02, 0x02, 0x00, 0x80]),
            (256, &[0x02, 0x02, 0x01, 0x00]),
            (-1, &[0x02, 0x01, 0xff]),
            (-129, &[0x02, 0x02, 0xff, 0x7f]),
        ];
        for (value, expected) in cases {
            let mut w = BerWriter::new();
            w.integer(tag::INTEGER, *value);
            assert_eq!(w.into_bytes(), *expected, "encoding {value}");

            let mut r = BerReader::new(expected);
            assert_eq!(r.read_integer(tag::INTEGER).expect("decode"), *value);
        }
    }

    #[test]
    fn test_long_form_length() {
        let payload = vec![0xab; 300];
        let mut w = BerWriter::new();
        w.octets(tag::OCTET_STRING, &payload);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let mut r = BerReader::new(&bytes);
        assert_eq!(r.read_octets(tag::OCTET_STRING).expect("decode").len(), 300);
        assert!(r.is_empty());
    }

    #[test]
    fn test_nested_sequence() {
        let mut w = BerWriter::new();
        w.constructed(tag::SEQUENCE, |seq| {
            seq.integer(tag::INTEGER, 7);
            seq.octets(tag::OCTET_STRING, b"cn");
            seq.boolean(tag::BOOLEAN, true);
        });
        let bytes = w.into_bytes();

        let mut outer = BerReader::new(&bytes);
        let mut seq = outer.nested(tag::SEQUENCE).expect("sequence");
        assert_eq!(seq.read_integer(tag::INTEGER).expect("int"), 7);
        assert_eq!(seq.read_string(tag::OCTET_STRING).expect("string"), "cn");
        assert!(seq.read_bool(tag::BOOLEAN).expect("bool"));
        assert!(seq.is_empty());
    }

    #[test]
    fn test_element_len_incremental() {
        let mut w = BerWriter::new();
        w.octets(tag::OCTET_STRING, &[1u8; 200]);
        let bytes = w.into_bytes();

        assert_eq!(element_len(&bytes[..1], MAX_ELEMENT_SIZE).expect("ok"), None);
        assert_eq!(element_len(&bytes[..2], MAX_ELEMENT_SIZE).expect("ok"), None);
        assert_eq!(element_len(&bytes[..50], MAX_ELEMENT_SIZE).expect("ok"), None);
        assert_eq!(
            element_len(&bytes, MAX_ELEMENT_SIZE).expect("ok"),
            Some(bytes.len())
        );
        assert!(element_len(&bytes, 100).is_err());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(BerReader::new(&[0x04, 0x05, 0x01]).read_tlv().is_err());
        assert!(BerReader::new(&[0x30, 0x80, 0x00, 0x00]).read_tlv().is_err());
        assert!(BerReader::new(&[0x1f, 0x01, 0x00]).read_tlv().is_err());

        let mut r = BerReader::new(&[0x04, 0x00]);
        assert!(r.read_integer(tag::INTEGER).is_err());
    }
}
