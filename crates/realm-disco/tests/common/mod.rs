// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures: an in-process LDAP directory and a table-driven resolver.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use realm_disco::ldap::ber;
use realm_disco::ldap::connection::MAX_MESSAGE_SIZE;
use realm_disco::ldap::{LdapMessage, LdapResult, ProtocolOp, Scope, SearchEntry, SearchRequest};
use realm_disco::{DiscoveryConfig, Error, Resolver, Result, ServerTarget};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Directory contents served by [`Directory::serve`].
#[derive(Debug, Clone, Default)]
pub struct Directory {
    pub naming_context: Option<String>,
    pub capabilities: Vec<String>,
    pub info: Option<String>,
    pub associated_domain: Option<String>,
    pub realm: Option<String>,
}

impl Directory {
    pub fn generic(domain: &str, realm: &str) -> Self {
        Self {
            naming_context: Some(naming_context(domain)),
            associated_domain: Some(domain.to_string()),
            realm: Some(realm.to_string()),
            ..Default::default()
        }
    }

    pub fn ipa(domain: &str) -> Self {
        Self {
            naming_context: Some(naming_context(domain)),
            info: Some("IPA V2.0".into()),
            associated_domain: Some(domain.to_string()),
            ..Default::default()
        }
    }

    fn answer(&self, req: &SearchRequest) -> Vec<SearchEntry> {
        match (req.base.as_str(), req.scope) {
            ("", _) => {
                let mut entry = SearchEntry::new("");
                if let Some(ref nc) = self.naming_context {
                    entry = entry.with("defaultNamingContext", &[nc.as_str()]);
                }
                let caps: Vec<&str> = self.capabilities.iter().map(String::as_str).collect();
                if !caps.is_empty() {
                    entry = entry.with("supportedCapabilities", &caps);
                }
                vec![entry]
            }
            (base, Scope::Base) => {
                let mut entry = SearchEntry::new(base);
                if let Some(ref info) = self.info {
                    entry = entry.with("info", &[info.as_str()]);
                }
                if let Some(ref domain) = self.associated_domain {
                    entry = entry.with("associatedDomain", &[domain.as_str()]);
                }
                vec![entry]
            }
            (base, _) => match self.realm {
                Some(ref realm) => vec![SearchEntry::new(format!("cn={},cn=kerberos,{}", realm, base))
                    .with("cn", &[realm.as_str()])],
                None => Vec::new(),
            },
        }
    }

    /// Serve this directory on an ephemeral loopback port.
    pub async fn serve(self) -> DirectoryServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let sessions = Arc::new(AtomicUsize::new(0));
        let directory = Arc::new(self);
        let counter = sessions.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(session(stream, directory.clone()));
            }
        });
        DirectoryServer { addr, sessions }
    }
}

pub struct DirectoryServer {
    pub addr: SocketAddr,
    sessions: Arc<AtomicUsize>,
}

impl DirectoryServer {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// LDAP sessions accepted so far.
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

fn naming_context(domain: &str) -> String {
    domain
        .split('.')
        .map(|label| format!("dc={}", label))
        .collect::<Vec<_>>()
        .join(",")
}

async fn session(mut stream: TcpStream, directory: Arc<Directory>) {
    let mut buf = Vec::new();
    loop {
        let msg = loop {
            if let Ok(Some(len)) = ber::element_len(&buf, MAX_MESSAGE_SIZE) {
                let Ok(msg) = LdapMessage::decode(&buf[..len]) else {
                    return;
                };
                buf.drain(..len);
                break msg;
            }
            let mut chunk = [0u8; 1024];
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let mut reply = Vec::new();
        match msg.op {
            ProtocolOp::BindRequest { .. } => {
                reply = LdapMessage::new(msg.id, ProtocolOp::BindResponse(LdapResult::success())).encode();
            }
            ProtocolOp::SearchRequest(req) => {
                for entry in directory.answer(&req) {
                    reply.extend(LdapMessage::new(msg.id, ProtocolOp::SearchResultEntry(entry)).encode());
                }
                reply.extend(
                    LdapMessage::new(msg.id, ProtocolOp::SearchResultDone(LdapResult::success())).encode(),
                );
            }
            ProtocolOp::UnbindRequest => return,
            _ => {}
        }
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Resolver answering from fixed tables; anything missing is `NotFound`.
#[derive(Default)]
pub struct TableResolver {
    srv: HashMap<String, Vec<ServerTarget>>,
    hosts: HashMap<String, Vec<IpAddr>>,
    queries: Mutex<Vec<String>>,
}

impl TableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn srv(mut self, name: &str, targets: Vec<ServerTarget>) -> Self {
        self.srv.insert(name.to_string(), targets);
        self
    }

    pub fn host(mut self, name: &str, ip: &str) -> Self {
        self.hosts
            .entry(name.to_string())
            .or_default()
            .push(ip.parse().expect("ip"));
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl Resolver for TableResolver {
    async fn lookup_service(&self, service: &str, protocol: &str, domain: &str) -> Result<Vec<ServerTarget>> {
        let key = format!("_{}._{}.{}", service, protocol, domain);
        self.queries.lock().push(key.clone());
        self.srv.get(&key).cloned().ok_or(Error::NotFound(key))
    }

    async fn lookup_address(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.queries.lock().push(host.to_string());
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| Error::NotFound(host.to_string()))
    }
}

/// Short timeouts, no IPA certificate check, no KDC lookup.
pub fn quick_config() -> DiscoveryConfig {
    DiscoveryConfig {
        connect_timeout_ms: 2_000,
        io_timeout_ms: 2_000,
        cldap_timeout_ms: 300,
        cldap_retry_ms: 100,
        ..Default::default()
    }
    .with_ipa(false)
    .with_kdc_lookup(false)
}
