// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Async LDAP session over TCP.
//!
//! Messages are framed by their own BER length, so reads accumulate into
//! a buffer until [`ber::element_len`] reports a complete element.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::ber;
use super::message::{LdapMessage, LdapResult, ProtocolOp, SearchEntry, SearchRequest};
use crate::error::{Error, Result};

/// Largest LDAP message accepted from a server (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Collected results of one search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub entries: Vec<SearchEntry>,
    pub referrals: Vec<String>,
}

impl SearchOutcome {
    pub fn first(&self) -> Option<&SearchEntry> {
        self.entries.first()
    }
}

/// Client side of an LDAP connection.
pub struct LdapConnection {
    stream: TcpStream,
    peer: SocketAddr,
    next_id: i32,
    read_buffer: Vec<u8>,
    io_timeout: Duration,
}

impl LdapConnection {
    /// Open a TCP connection to `addr`.
    pub async fn connect(
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::TimedOut(format!("connecting to LDAP server {}", addr)))??;
        stream.set_nodelay(true)?;
        debug!("[LDAP] connected to {}", addr);

        Ok(Self {
            stream,
            peer: addr,
            next_id: 1,
            read_buffer: Vec::with_capacity(4096),
            io_timeout,
        })
    }

    /// Connect and perform an anonymous simple bind.
    pub async fn connect_anonymous(
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self> {
        let mut conn = Self::connect(addr, connect_timeout, io_timeout).await?;
        conn.bind_anonymous().await?;
        Ok(conn)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn bind_anonymous(&mut self) -> Result<()> {
        let id = self
            .send(ProtocolOp::BindRequest {
                version: 3,
                name: String::new(),
                password: Vec::new(),
            })
            .await?;

        loop {
            let msg = self.read_message().await?;
            if msg.id != id {
                trace!("[LDAP] ignoring message {} while binding", msg.id);
                continue;
            }
            return match msg.op {
                ProtocolOp::BindResponse(result) => result.into_result(),
                other => Err(unexpected(&other, "bind response")),
            };
        }
    }

    /// Issue a search; results are read with [`read_message`](Self::read_message).
    pub async fn send_search(&mut self, request: SearchRequest) -> Result<i32> {
        trace!(
            "[LDAP] search base='{}' scope={:?} filter={} on {}",
            request.base,
            request.scope,
            request.filter,
            self.peer
        );
        self.send(ProtocolOp::SearchRequest(request)).await
    }

    /// Run a search to completion.
    pub async fn search(&mut self, request: SearchRequest) -> Result<SearchOutcome> {
        let id = self.send_search(request).await?;
        let mut outcome = SearchOutcome::default();
        loop {
            let msg = self.read_message().await?;
            if msg.id != id {
                continue;
            }
            match msg.op {
                ProtocolOp::SearchResultEntry(entry) => outcome.entries.push(entry),
                ProtocolOp::SearchResultReference(urls) => outcome.referrals.extend(urls),
                ProtocolOp::IntermediateResponse => {}
                ProtocolOp::SearchResultDone(result) => {
                    result.into_result()?;
                    return Ok(outcome);
                }
                other => return Err(unexpected(&other, "search result")),
            }
        }
    }

    /// Read the next complete message from the server.
    ///
    /// A notice of disconnection (unsolicited, id 0) is turned into an error.
    pub async fn read_message(&mut self) -> Result<LdapMessage> {
        loop {
            if let Some(len) = ber::element_len(&self.read_buffer, MAX_MESSAGE_SIZE)? {
                let msg = LdapMessage::decode(&self.read_buffer[..len])?;
                self.read_buffer.drain(..len);
                if msg.id == 0 {
                    if let ProtocolOp::ExtendedResponse(result) = &msg.op {
                        return Err(disconnected(result));
                    }
                }
                return Ok(msg);
            }

            let mut chunk = [0u8; 4096];
            let n = timeout(self.io_timeout, self.stream.read(&mut chunk))
                .await
                .map_err(|_| Error::TimedOut(format!("reading from LDAP server {}", self.peer)))??;
            if n == 0 {
                return Err(Error::Io {
                    kind: std::io::ErrorKind::UnexpectedEof,
                    message: format!("LDAP server {} closed the connection", self.peer),
                });
            }
            self.read_buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send an unbind and close the connection.
    pub async fn unbind(mut self) {
        let id = self.allocate_id();
        let bytes = LdapMessage::new(id, ProtocolOp::UnbindRequest).encode();
        // The server does not answer an unbind; failures here are irrelevant.
        let _ = timeout(self.io_timeout, self.stream.write_all(&bytes)).await;
        let _ = self.stream.shutdown().await;
    }

    async fn send(&mut self, op: ProtocolOp) -> Result<i32> {
        let id = self.allocate_id();
        let bytes = LdapMessage::new(id, op).encode();
        timeout(self.io_timeout, self.stream.write_all(&bytes))
            .await
            .map_err(|_| Error::TimedOut(format!("writing to LDAP server {}", self.peer)))??;
        Ok(id)
    }

    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }
}

fn unexpected(op: &ProtocolOp, wanted: &str) -> Error {
    Error::Protocol(format!("expected {}, received {:?}", wanted, op))
}

fn disconnected(result: &LdapResult) -> Error {
    Error::ldap(
        result.code,
        format!("server sent notice of disconnection: {}", result.message),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::filter::Filter;
    use crate::ldap::message::Scope;
    use tokio::net::TcpListener;

    async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> LdapMessage {
        loop {
            if let Some(len) = ber::element_len(buf, MAX_MESSAGE_SIZE).expect("framing") {
                let msg = LdapMessage::decode(&buf[..len]).expect("decode");
                buf.drain(..len);
                return msg;
            }
            let mut chunk = [0u8; 512];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "client closed early");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn test_bind_and_search() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = Vec::new();

            let bind = read_request(&mut stream, &mut buf).await;
            assert!(matches!(bind.op, ProtocolOp::BindRequest { version: 3, .. }));
            let reply = LdapMessage::new(bind.id, ProtocolOp::BindResponse(LdapResult::success()));
            stream.write_all(&reply.encode()).await.expect("write");

            let search = read_request(&mut stream, &mut buf).await;
            let entry = SearchEntry::new("").with("defaultNamingContext", &["dc=example,dc=com"]);
            // Send the two replies byte by byte to exercise reassembly.
            let mut bytes = LdapMessage::new(search.id, ProtocolOp::SearchResultEntry(entry)).encode();
            bytes.extend(LdapMessage::new(search.id, ProtocolOp::SearchResultDone(LdapResult::success())).encode());
            for b in bytes {
                stream.write_all(&[b]).await.expect("write");
            }
        });

        let mut conn = LdapConnection::connect_anonymous(
            addr,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .expect("connect");
        let outcome = conn
            .search(SearchRequest::new("", Scope::Base, Filter::any(), &["defaultNamingContext"]))
            .await
            .expect("search");

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(
            outcome.first().and_then(|e| e.first_string("defaultNamingContext")).as_deref(),
            Some("dc=example,dc=com")
        );
        server.await.expect("server");
    }

    #[tokio::test]
    async fn test_search_error_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = Vec::new();
            let search = read_request(&mut stream, &mut buf).await;
            let done = LdapResult {
                code: 32,
                matched_dn: String::new(),
                message: "no such entry".into(),
            };
            let reply = LdapMessage::new(search.id, ProtocolOp::SearchResultDone(done));
            stream.write_all(&reply.encode()).await.expect("write");
        });

        let mut conn = LdapConnection::connect(addr, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .expect("connect");
        let err = conn
            .search(SearchRequest::new("dc=nope", Scope::Base, Filter::any(), &["cn"]))
            .await
            .expect_err("search fails");
        assert!(matches!(err, Error::NoSuchObject(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_absence() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = LdapConnection::connect(addr, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .err()
            .expect("refused");
        assert!(err.is_absence(), "unexpected error {err:?}");
    }
}
