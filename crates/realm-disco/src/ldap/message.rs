// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LDAPv3 protocol data units (RFC 4511), both directions.
//!
//! ```text
//! LDAPMessage ::= SEQUENCE {
//!     messageID   INTEGER,
//!     protocolOp  CHOICE { bindRequest [APPLICATION 0], ... },
//!     controls    [0] Controls OPTIONAL }
//! ```
//!
//! Requests and responses are both encodable and decodable so the same
//! code serves the client and the in-process test server.

use super::ber::{tag, BerReader, BerWriter};
use super::filter::Filter;
use crate::error::{Error, Result};

mod pdu {
    use super::tag::{APPLICATION, CONSTRUCTED};

    pub const BIND_REQUEST: u8 = APPLICATION | CONSTRUCTED;
    pub const BIND_RESPONSE: u8 = APPLICATION | CONSTRUCTED | 1;
    pub const UNBIND_REQUEST: u8 = APPLICATION | 2;
    pub const SEARCH_REQUEST: u8 = APPLICATION | CONSTRUCTED | 3;
    pub const SEARCH_ENTRY: u8 = APPLICATION | CONSTRUCTED | 4;
    pub const SEARCH_DONE: u8 = APPLICATION | CONSTRUCTED | 5;
    pub const SEARCH_REFERENCE: u8 = APPLICATION | CONSTRUCTED | 19;
    pub const EXTENDED_RESPONSE: u8 = APPLICATION | CONSTRUCTED | 24;
    pub const INTERMEDIATE_RESPONSE: u8 = APPLICATION | CONSTRUCTED | 25;
}

/// Simple authentication choice `[0]`.
const AUTH_SIMPLE: u8 = tag::CONTEXT;

/// Search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base = 0,
    OneLevel = 1,
    Subtree = 2,
}

impl Scope {
    fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::Base),
            1 => Ok(Self::OneLevel),
            2 => Ok(Self::Subtree),
            other => Err(Error::Protocol(format!("invalid search scope {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: Scope, filter: Filter, attributes: &[&str]) -> Self {
        Self {
            base: base.into(),
            scope,
            filter,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: u32,
    pub matched_dn: String,
    pub message: String,
}

impl LdapResult {
    pub fn success() -> Self {
        Self {
            code: super::result::SUCCESS,
            matched_dn: String::new(),
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == super::result::SUCCESS
    }

    /// Convert a non-success result into an error.
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::ldap(self.code, self.message))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchEntry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl SearchEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style helper adding a string-valued attribute.
    pub fn with(mut self, name: &str, values: &[&str]) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            values: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
        });
        self
    }

    /// Builder-style helper adding a binary attribute.
    pub fn with_binary(mut self, name: &str, value: Vec<u8>) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            values: vec![value],
        });
        self
    }

    /// Values of `name`, matched case-insensitively.
    pub fn values(&self, name: &str) -> &[Vec<u8>] {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.values.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_value(&self, name: &str) -> Option<&[u8]> {
        self.values(name).first().map(Vec::as_slice)
    }

    pub fn first_string(&self, name: &str) -> Option<String> {
        self.first_value(name)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    pub fn has_value(&self, name: &str, value: &str) -> bool {
        self.values(name).iter().any(|v| v == value.as_bytes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest { version: i64, name: String, password: Vec<u8> },
    BindResponse(LdapResult),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchEntry),
    SearchResultReference(Vec<String>),
    SearchResultDone(LdapResult),
    ExtendedResponse(LdapResult),
    IntermediateResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub id: i32,
    pub op: ProtocolOp,
}

impl LdapMessage {
    pub fn new(id: i32, op: ProtocolOp) -> Self {
        Self { id, op }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = BerWriter::new();
        w.constructed(tag::SEQUENCE, |msg| {
            msg.integer(tag::INTEGER, i64::from(self.id));
            encode_op(msg, &self.op);
        });
        w.into_bytes()
    }

    /// Decode exactly one message.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = BerReader::new(data);
        let msg = Self::read(&mut r)?;
        if !r.is_empty() {
            return Err(Error::Protocol("trailing bytes after LDAP message".into()));
        }
        Ok(msg)
    }

    /// Decode every message in a buffer (a CLDAP datagram carries several).
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>> {
        let mut r = BerReader::new(data);
        let mut messages = Vec::new();
        while !r.is_empty() {
            messages.push(Self::read(&mut r)?);
        }
        Ok(messages)
    }

    fn read(r: &mut BerReader<'_>) -> Result<Self> {
        let mut msg = r.nested(tag::SEQUENCE)?;
        let id = msg.read_integer(tag::INTEGER)?;
        let id = i32::try_from(id)
            .map_err(|_| Error::Protocol(format!("message id {} out of range", id)))?;
        let op = decode_op(&mut msg)?;
        // Controls, if any, are ignored.
        Ok(Self { id, op })
    }
}

fn encode_result(w: &mut BerWriter, result: &LdapResult) {
    w.integer(tag::ENUMERATED, i64::from(result.code));
    w.octets(tag::OCTET_STRING, result.matched_dn.as_bytes());
    w.octets(tag::OCTET_STRING, result.message.as_bytes());
}

fn encode_op(w: &mut BerWriter, op: &ProtocolOp) {
    match op {
        ProtocolOp::BindRequest { version, name, password } => {
            w.constructed(pdu::BIND_REQUEST, |b| {
                b.integer(tag::INTEGER, *version);
                b.octets(tag::OCTET_STRING, name.as_bytes());
                b.octets(AUTH_SIMPLE, password);
            });
        }
        ProtocolOp::BindResponse(result) => {
            w.constructed(pdu::BIND_RESPONSE, |b| encode_result(b, result))
        }
        ProtocolOp::UnbindRequest => w.octets(pdu::UNBIND_REQUEST, &[]),
        ProtocolOp::SearchRequest(req) => {
            w.constructed(pdu::SEARCH_REQUEST, |s| {
                s.octets(tag::OCTET_STRING, req.base.as_bytes());
                s.integer(tag::ENUMERATED, req.scope as i64);
                s.integer(tag::ENUMERATED, 0); // neverDerefAliases
                s.integer(tag::INTEGER, 0); // sizeLimit
                s.integer(tag::INTEGER, 0); // timeLimit
                s.boolean(tag::BOOLEAN, false);
                req.filter.encode(s);
                s.constructed(tag::SEQUENCE, |attrs| {
                    for attr in &req.attributes {
                        attrs.octets(tag::OCTET_STRING, attr.as_bytes());
                    }
                });
            });
        }
        ProtocolOp::SearchResultEntry(entry) => {
            w.constructed(pdu::SEARCH_ENTRY, |e| {
                e.octets(tag::OCTET_STRING, entry.dn.as_bytes());
                e.constructed(tag::SEQUENCE, |attrs| {
                    for attr in &entry.attributes {
                        attrs.constructed(tag::SEQUENCE, |a| {
                            a.octets(tag::OCTET_STRING, attr.name.as_bytes());
                            a.constructed(tag::SET, |vals| {
                                for v in &attr.values {
                                    vals.octets(tag::OCTET_STRING, v);
                                }
                            });
                        });
                    }
                });
            });
        }
        ProtocolOp::SearchResultReference(urls) => {
            w.constructed(pdu::SEARCH_REFERENCE, |r| {
                for url in urls {
                    r.octets(tag::OCTET_STRING, url.as_bytes());
                }
            });
        }
        ProtocolOp::SearchResultDone(result) => {
            w.constructed(pdu::SEARCH_DONE, |d| encode_result(d, result))
        }
        ProtocolOp::ExtendedResponse(result) => {
            w.constructed(pdu::EXTENDED_RESPONSE, |d| encode_result(d, result))
        }
        ProtocolOp::IntermediateResponse => w.constructed(pdu::INTERMEDIATE_RESPONSE, |_| {}),
    }
}

fn decode_result(r: &mut BerReader<'_>) -> Result<LdapResult> {
    let code = r.read_integer(tag::ENUMERATED)?;
    let code = u32::try_from(code)
        .map_err(|_| Error::Protocol(format!("invalid result code {}", code)))?;
    Ok(LdapResult {
        code,
        matched_dn: r.read_string(tag::OCTET_STRING)?,
        message: r.read_string(tag::OCTET_STRING)?,
    })
}

fn decode_op(r: &mut BerReader<'_>) -> Result<ProtocolOp> {
    let tlv = r.read_tlv()?;
    let mut body = BerReader::new(tlv.value);
    let op = match tlv.tag {
        pdu::BIND_REQUEST => {
            let version = body.read_integer(tag::INTEGER)?;
            let name = body.read_string(tag::OCTET_STRING)?;
            let password = body.read_octets(AUTH_SIMPLE)?.to_vec();
            ProtocolOp::BindRequest { version, name, password }
        }
        pdu::BIND_RESPONSE => ProtocolOp::BindResponse(decode_result(&mut body)?),
        pdu::UNBIND_REQUEST => ProtocolOp::UnbindRequest,
        pdu::SEARCH_REQUEST => {
            let base = body.read_string(tag::OCTET_STRING)?;
            let scope = Scope::from_code(body.read_integer(tag::ENUMERATED)?)?;
            body.read_integer(tag::ENUMERATED)?;
            body.read_integer(tag::INTEGER)?;
            body.read_integer(tag::INTEGER)?;
            body.read_bool(tag::BOOLEAN)?;
            let filter = Filter::decode(&mut body)?;
            let mut attrs = body.nested(tag::SEQUENCE)?;
            let mut attributes = Vec::new();
            while !attrs.is_empty() {
                attributes.push(attrs.read_string(tag::OCTET_STRING)?);
            }
            ProtocolOp::SearchRequest(SearchRequest {
                base,
                scope,
                filter,
                attributes,
            })
        }
        pdu::SEARCH_ENTRY => {
            let dn = body.read_string(tag::OCTET_STRING)?;
            let mut attrs = body.nested(tag::SEQUENCE)?;
            let mut attributes = Vec::new();
            while !attrs.is_empty() {
                let mut attr = attrs.nested(tag::SEQUENCE)?;
                let name = attr.read_string(tag::OCTET_STRING)?;
                let mut set = attr.nested(tag::SET)?;
                let mut values = Vec::new();
                while !set.is_empty() {
                    values.push(set.read_octets(tag::OCTET_STRING)?.to_vec());
                }
                attributes.push(Attribute { name, values });
            }
            ProtocolOp::SearchResultEntry(SearchEntry { dn, attributes })
        }
        pdu::SEARCH_REFERENCE => {
            let mut urls = Vec::new();
            while !body.is_empty() {
                urls.push(body.read_string(tag::OCTET_STRING)?);
            }
            ProtocolOp::SearchResultReference(urls)
        }
        pdu::SEARCH_DONE => ProtocolOp::SearchResultDone(decode_result(&mut body)?),
        pdu::EXTENDED_RESPONSE => ProtocolOp::ExtendedResponse(decode_result(&mut body)?),
        pdu::INTERMEDIATE_RESPONSE => ProtocolOp::IntermediateResponse,
        other => {
            return Err(Error::Protocol(format!(
                "unsupported LDAP operation {:#04x}",
                other
            )))
        }
    };
    Ok(op)
}
