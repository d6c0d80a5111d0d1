// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MS-CLDAP NETLOGON ping.
//!
//! An LDAP search for the `NetLogon` attribute of the rootDSE, sent as a
//! single UDP datagram (or over an existing TCP session). Domain
//! controllers answer with a NETLOGON_SAM_LOGON_RESPONSE_EX blob:
//!
//! ```text
//! +--------+-----+-------+-------------+-----------------------------+
//! | opcode | sbz | flags | domain guid | compressed DNS names ...    |
//! | u16 LE | u16 | u32   | 16 bytes    | forest, domain, host, ...   |
//! +--------+-----+-------+-------------+-----------------------------+
//! ```

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::config::DiscoveryConfig;
use crate::diagnostics::Diagnostics;
use crate::disco::{Disco, ServerSoftware};
use crate::error::{Error, Result};
use crate::ldap::{Filter, LdapMessage, ProtocolOp, Scope, SearchEntry, SearchRequest};

/// Filter requesting an NT version 5 extended response, as sent by
/// [`request`].
pub const NETLOGON_FILTER: &str = r"(&(NtVer=\06\00\00\00)(AAC=\00\00\00\00))";

/// Attribute carrying the response blob.
pub const NETLOGON_ATTRIBUTE: &str = "NetLogon";

/// LOGON_SAM_LOGON_RESPONSE_EX
pub const OPCODE_SAM_LOGON_RESPONSE_EX: u16 = 23;
/// LOGON_SAM_USER_UNKNOWN_EX
pub const OPCODE_SAM_USER_UNKNOWN_EX: u16 = 25;

/// DC flag bits.
pub mod flags {
    pub const PDC: u32 = 0x0000_0001;
    pub const GC: u32 = 0x0000_0004;
    pub const LDAP: u32 = 0x0000_0008;
    pub const DS: u32 = 0x0000_0010;
    pub const KDC: u32 = 0x0000_0020;
    pub const TIMESERV: u32 = 0x0000_0040;
    pub const CLOSEST: u32 = 0x0000_0080;
    pub const WRITABLE: u32 = 0x0000_0100;
}

const PING_MESSAGE_ID: i32 = 1;
const MAX_DATAGRAM: usize = 64 * 1024;

/// The NETLOGON search request.
pub fn request() -> SearchRequest {
    let filter = Filter::And(vec![
        Filter::equality("NtVer", [6u8, 0, 0, 0]),
        Filter::equality("AAC", [0u8; 4]),
    ]);
    SearchRequest::new("", Scope::Base, filter, &[NETLOGON_ATTRIBUTE])
}

/// Decoded NETLOGON_SAM_LOGON_RESPONSE_EX.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetlogonResponse {
    pub opcode: u16,
    pub flags: u32,
    pub domain_guid: [u8; 16],
    pub forest: String,
    pub domain: String,
    pub host: String,
    pub netbios_domain: String,
    pub netbios_computer: String,
    pub user: String,
    pub server_site: String,
    pub client_site: String,
}

impl NetlogonResponse {
    pub fn is_kdc(&self) -> bool {
        self.flags & flags::KDC != 0
    }

    /// Turn the response into a discovery result.
    pub fn into_disco(self) -> Result<Disco> {
        if self.domain.is_empty() {
            return Err(Error::Protocol("NetLogon response has no DNS domain name".into()));
        }
        let mut disco = Disco::new(self.domain.to_lowercase()).with_software(ServerSoftware::ActiveDirectory);
        if !self.netbios_domain.is_empty() {
            disco.workgroup = Some(self.netbios_domain);
        }
        Ok(disco)
    }
}

/// Extract and decode the NETLOGON blob from a search entry.
pub fn from_entry(entry: &SearchEntry) -> Result<NetlogonResponse> {
    let blob = entry
        .first_value(NETLOGON_ATTRIBUTE)
        .ok_or_else(|| Error::NoSuchObject("No NetLogon attribute in MS-CLDAP response".into()))?;
    parse_netlogon(blob)
}

/// Decode a NETLOGON_SAM_LOGON_RESPONSE_EX blob.
pub fn parse_netlogon(data: &[u8]) -> Result<NetlogonResponse> {
    let mut r = BlobReader { data, pos: 0 };

    let opcode = r.u16()?;
    if opcode != OPCODE_SAM_LOGON_RESPONSE_EX && opcode != OPCODE_SAM_USER_UNKNOWN_EX {
        return Err(Error::Protocol(format!(
            "unexpected NetLogon response opcode {}",
            opcode
        )));
    }
    let _sbz = r.u16()?;
    let flags = r.u32()?;
    let mut domain_guid = [0u8; 16];
    domain_guid.copy_from_slice(r.take(16)?);

    Ok(NetlogonResponse {
        opcode,
        flags,
        domain_guid,
        forest: r.name()?,
        domain: r.name()?,
        host: r.name()?,
        netbios_domain: r.name()?,
        netbios_computer: r.name()?,
        user: r.name()?,
        server_site: r.name()?,
        client_site: r.name()?,
    })
}

struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Error::Protocol("truncated NetLogon response".into()))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// RFC 1035 compressed name; pointers are offsets into the blob.
    fn name(&mut self) -> Result<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut pos = self.pos;
        let mut resume: Option<usize> = None;
        let mut jumps = 0;

        loop {
            let len = *self
                .data
                .get(pos)
                .ok_or_else(|| Error::Protocol("truncated name in NetLogon response".into()))?;
            match len & 0xc0 {
                0x00 if len == 0 => {
                    pos += 1;
                    break;
                }
                0x00 => {
                    let start = pos + 1;
                    let end = start + usize::from(len);
                    let label = self
                        .data
                        .get(start..end)
                        .ok_or_else(|| Error::Protocol("truncated label in NetLogon response".into()))?;
                    labels.push(String::from_utf8_lossy(label).into_owned());
                    pos = end;
                }
                0xc0 => {
                    let low = *self
                        .data
                        .get(pos + 1)
                        .ok_or_else(|| Error::Protocol("truncated pointer in NetLogon response".into()))?;
                    jumps += 1;
                    if jumps > 32 {
                        return Err(Error::Protocol("compression loop in NetLogon response".into()));
                    }
                    resume.get_or_insert(pos + 2);
                    pos = (usize::from(len & 0x3f) << 8) | usize::from(low);
                }
                _ => {
                    return Err(Error::Protocol(format!(
                        "bad label type {:#04x} in NetLogon response",
                        len
                    )))
                }
            }
        }

        self.pos = resume.unwrap_or(pos);
        Ok(labels.join("."))
    }
}

/// Send a NETLOGON ping over UDP and decode the answer.
///
/// Retransmits every `cldap_retry` until `cldap_timeout`. Silence and ICMP
/// refusals surface as absence errors.
pub async fn ping(address: SocketAddr, config: &DiscoveryConfig, diag: &Diagnostics) -> Result<Disco> {
    diag.info(format!("Sending MS-CLDAP ping to: {}", address.ip()));

    let bind: SocketAddr = if address.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(address).await?;

    let datagram = LdapMessage::new(PING_MESSAGE_ID, ProtocolOp::SearchRequest(request())).encode();
    let deadline = Instant::now() + config.cldap_timeout();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimedOut(format!("No MS-CLDAP response from {}", address)));
        }
        trace!("[CLDAP] sending NetLogon request to {}", address);
        socket.send(&datagram).await?;

        let wait = config.cldap_retry().min(deadline - now);
        let n = match timeout(wait, socket.recv(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => continue,
        };
        match decode_reply(&buf[..n]) {
            Ok(Some(netlogon)) => {
                debug!(
                    "[CLDAP] {} answered: domain={} host={} flags={:#x}",
                    address, netlogon.domain, netlogon.host, netlogon.flags
                );
                return netlogon.into_disco();
            }
            Ok(None) => trace!("[CLDAP] ignoring unrelated datagram from {}", address),
            Err(e) => trace!("[CLDAP] ignoring undecodable datagram from {}: {}", address, e),
        }
    }
}

/// Decode one CLDAP reply datagram. `Ok(None)` for datagrams that are not
/// an answer to our request.
fn decode_reply(datagram: &[u8]) -> Result<Option<NetlogonResponse>> {
    let messages = LdapMessage::decode_all(datagram)?;
    let mut entry = None;
    for msg in messages {
        if msg.id != PING_MESSAGE_ID {
            continue;
        }
        match msg.op {
            ProtocolOp::SearchResultEntry(e) => entry = Some(e),
            ProtocolOp::SearchResultDone(result) => {
                result.into_result()?;
                return match entry {
                    Some(e) => from_entry(&e).map(Some),
                    None => Err(Error::NoSuchObject("Empty MS-CLDAP response".into())),
                };
            }
            _ => {}
        }
    }
    entry.map(|e| from_entry(&e)).transpose()
}

#[cfg(test)]
pub(crate) mod test_blob {
    use super::*;

    fn push_name(out: &mut Vec<u8>, name: &str) {
        for label in name.split('.').filter(|l| !l.is_empty()) {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
    }

    /// A plausible response for `domain`, compressing the host name
    /// against the domain name.
    pub fn netlogon_blob(domain: &str, netbios: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&OPCODE_SAM_LOGON_RESPONSE_EX.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(flags::DS | flags::KDC | flags::LDAP).to_le_bytes());
        out.extend_from_slice(&[0xab; 16]);

        let forest_offset = out.len();
        push_name(&mut out, domain);
        // domain: pointer to forest
        out.extend_from_slice(&[0xc0 | (forest_offset >> 8) as u8, forest_offset as u8]);
        // host: "dc1" + pointer to forest
        out.extend_from_slice(&[3, b'd', b'c', b'1']);
        out.extend_from_slice(&[0xc0 | (forest_offset >> 8) as u8, forest_offset as u8]);
        push_name(&mut out, netbios);
        push_name(&mut out, "DC1");
        push_name(&mut out, "");
        push_name(&mut out, "Default-First-Site-Name");
        push_name(&mut out, "Default-First-Site-Name");
        out
    }
}
