// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LDAP search filters.
//!
//! Supports the RFC 4515 subset discovery needs: `&`, `|`, `!`, equality
//! and presence. Assertion values may contain `\XX` hex escapes, which is
//! how the NETLOGON ping encodes its binary NtVer/AAC values.

use std::fmt;

use super::ber::{tag, BerReader, BerWriter};
use crate::error::{Error, Result};

const TAG_AND: u8 = tag::CONTEXT | tag::CONSTRUCTED;
const TAG_OR: u8 = tag::CONTEXT | tag::CONSTRUCTED | 1;
const TAG_NOT: u8 = tag::CONTEXT | tag::CONSTRUCTED | 2;
const TAG_EQUALITY: u8 = tag::CONTEXT | tag::CONSTRUCTED | 3;
const TAG_PRESENT: u8 = tag::CONTEXT | 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, Vec<u8>),
    Present(String),
}

impl Filter {
    /// `(attr=value)`
    pub fn equality(attr: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Self::Equality(attr.into(), value.as_ref().to_vec())
    }

    /// `(attr=*)`
    pub fn present(attr: impl Into<String>) -> Self {
        Self::Present(attr.into())
    }

    /// `(objectClass=*)`, the conventional match-everything filter.
    pub fn any() -> Self {
        Self::present("objectClass")
    }

    /// Parse the string representation.
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input: input.as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    pub fn encode(&self, w: &mut BerWriter) {
        match self {
            Self::And(items) => w.constructed(TAG_AND, |set| items.iter().for_each(|f| f.encode(set))),
            Self::Or(items) => w.constructed(TAG_OR, |set| items.iter().for_each(|f| f.encode(set))),
            Self::Not(inner) => w.constructed(TAG_NOT, |n| inner.encode(n)),
            Self::Equality(attr, value) => w.constructed(TAG_EQUALITY, |ava| {
                ava.octets(tag::OCTET_STRING, attr.as_bytes());
                ava.octets(tag::OCTET_STRING, value);
            }),
            Self::Present(attr) => w.octets(TAG_PRESENT, attr.as_bytes()),
        }
    }

    pub fn decode(r: &mut BerReader<'_>) -> Result<Self> {
        let tlv = r.read_tlv()?;
        let mut inner = BerReader::new(tlv.value);
        match tlv.tag {
            TAG_AND | TAG_OR => {
                let mut items = Vec::new();
                while !inner.is_empty() {
                    items.push(Self::decode(&mut inner)?);
                }
                Ok(if tlv.tag == TAG_AND {
                    Self::And(items)
                } else {
                    Self::Or(items)
                })
            }
            TAG_NOT => Ok(Self::Not(Box::new(Self::decode(&mut inner)?))),
            TAG_EQUALITY => {
                let attr = inner.read_string(tag::OCTET_STRING)?;
                let value = inner.read_octets(tag::OCTET_STRING)?.to_vec();
                Ok(Self::Equality(attr, value))
            }
            TAG_PRESENT => String::from_utf8(tlv.value.to_vec())
                .map(Self::Present)
                .map_err(|_| Error::Protocol("filter attribute is not UTF-8".into())),
            other => Err(Error::Protocol(format!(
                "unsupported filter choice {:#04x}",
                other
            ))),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(items) | Self::Or(items) => {
                f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
                for item in items {
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "(!{})", inner),
            Self::Present(attr) => write!(f, "({}=*)", attr),
            Self::Equality(attr, value) => {
                write!(f, "({}=", attr)?;
                for b in value {
                    match b {
                        b'*' | b'(' | b')' | b'\\' => write!(f, "\\{:02x}", b)?,
                        0x20..=0x7e => write!(f, "{}", *b as char)?,
                        _ => write!(f, "\\{:02x}", b)?,
                    }
                }
                f.write_str(")")
            }
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> Error {
        Error::Protocol(format!("invalid LDAP filter at offset {}: {}", self.pos, what))
    }

    fn eat(&mut self, b: u8) -> Result<()> {
        if self.input.get(self.pos) == Some(&b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", b as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.eat(b'(')?;
        let filter = match self.input.get(self.pos) {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.eat(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut items = Vec::new();
        while self.input.get(self.pos) == Some(&b'(') {
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(b) = self.input.get(self.pos) {
            if *b == b'=' {
                break;
            }
            if !(b.is_ascii_alphanumeric() || *b == b'-' || *b == b'.' || *b == b';') {
                return Err(self.error("bad attribute description"));
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("missing attribute"));
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        self.eat(b'=')?;

        if self.input.get(self.pos..self.pos + 2) == Some(&b"*)"[..]) {
            self.pos += 1;
            return Ok(Filter::Present(attr));
        }

        let mut value = Vec::new();
        while let Some(b) = self.input.get(self.pos).copied() {
            match b {
                b')' => break,
                b'*' => return Err(self.error("substring filters are not supported")),
                b'(' => return Err(self.error("unescaped '('")),
                b'\\' => {
                    let hex = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|h| std::str::from_utf8(h).ok())
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error("bad escape"))?;
                    value.push(hex);
                    self.pos += 3;
                }
                _ => {
                    value.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(Filter::Equality(attr, value))
    }
}
