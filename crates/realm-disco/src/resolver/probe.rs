// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Candidate server enumeration.
//!
//! ```text
//!   NONE ──► SRV ──► HOST ──► DONE
//!    │  _ldap._tcp   A/AAAA    nothing found
//!    │
//!    └─ IP literal: queued directly, starts in HOST
//! ```
//!
//! Addresses are handed out as soon as they are known. Once any address
//! has been returned the probe never falls back to a later phase.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{hostname_to_ascii, Resolver};
use crate::diagnostics::Diagnostics;
use crate::disco::{RealmKind, ServerTarget, Strategy};
use crate::error::{Error, Result};

/// Resolution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Srv,
    Host,
    Done,
}

/// What the DNS already told us about a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHint {
    /// The input named this server directly (IP literal or host fallback).
    pub is_server: bool,
    /// `Some(true)`: the domain publishes AD `_msdcs` records.
    /// `Some(false)`: it definitely does not. `None`: unknown.
    pub msdcs: Option<bool>,
}

impl DnsHint {
    pub fn suspected_kind(&self) -> RealmKind {
        match self.msdcs {
            Some(true) => RealmKind::ActiveDirectory,
            _ => RealmKind::GenericKerberos,
        }
    }

    /// Strategies to run against a candidate carrying this hint.
    pub fn strategies(&self) -> Vec<Strategy> {
        self.suspected_kind()
            .strategies()
            .iter()
            .copied()
            .filter(|s| match s {
                Strategy::RootDse => true,
                Strategy::MsCldap => self.msdcs != Some(false),
                Strategy::IpaCert => !self.is_server,
            })
            .collect()
    }
}

/// A server to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub address: SocketAddr,
    /// SRV target name, or the input itself for server candidates.
    pub hostname: String,
    pub hint: DnsHint,
}

impl Candidate {
    /// Name to record as `explicit_server`, if the input named a server.
    pub fn explicit_server(&self) -> Option<&str> {
        self.hint.is_server.then_some(self.hostname.as_str())
    }
}

/// Lazy, finite, non-restartable sequence of candidate servers for a name.
pub struct DnsProbe {
    name: String,
    resolver: Arc<dyn Resolver>,
    diag: Diagnostics,
    ldap_port: u16,
    addresses: VecDeque<Candidate>,
    targets: VecDeque<ServerTarget>,
    returned: usize,
    phase: Phase,
    msdcs: Option<bool>,
}

impl DnsProbe {
    pub fn new(
        input: &str,
        resolver: Arc<dyn Resolver>,
        diag: Diagnostics,
        ldap_port: u16,
    ) -> Result<Self> {
        let name = hostname_to_ascii(input)?;
        let mut probe = Self {
            name,
            resolver,
            diag,
            ldap_port,
            addresses: VecDeque::new(),
            targets: VecDeque::new(),
            returned: 0,
            phase: Phase::None,
            msdcs: None,
        };

        if let Ok(ip) = probe.name.parse::<IpAddr>() {
            probe.addresses.push_back(Candidate {
                address: SocketAddr::new(ip, ldap_port),
                hostname: probe.name.clone(),
                hint: DnsHint {
                    is_server: true,
                    msdcs: None,
                },
            });
            probe.phase = Phase::Host;
        }
        Ok(probe)
    }

    /// ASCII form of the name being resolved.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Candidates handed out so far.
    pub fn returned(&self) -> usize {
        self.returned
    }

    /// Produce the next candidate, or `None` when exhausted.
    ///
    /// Resolver absence (not found, temporary failure) just moves on to the
    /// next phase; any other resolver error is returned.
    pub async fn next(&mut self) -> Result<Option<Candidate>> {
        loop {
            if let Some(candidate) = self.addresses.pop_front() {
                self.returned += 1;
                trace!("[DNS] candidate {} ({})", candidate.address, candidate.hostname);
                return Ok(Some(candidate));
            }

            if let Some(target) = self.targets.pop_front() {
                let addrs = absent_as_empty(self.resolver.lookup_address(&target.hostname).await)?;
                let hint = DnsHint {
                    is_server: false,
                    msdcs: self.msdcs,
                };
                self.queue(addrs, target.port, &target.hostname, hint);
                continue;
            }

            let phase = if self.returned > 0 { Phase::Done } else { self.phase };
            match phase {
                Phase::None => {
                    self.diag.info(format!("Resolving: _ldap._tcp.{}", self.name));
                    self.phase = Phase::Srv;
                    let msdcs_domain = format!("dc._msdcs.{}", self.name);
                    let (srv, msdcs) = tokio::join!(
                        self.resolver.lookup_service("ldap", "tcp", &self.name),
                        self.resolver.lookup_service("kerberos", "tcp", &msdcs_domain),
                    );
                    self.msdcs = msdcs_hint(&msdcs);
                    debug!("[DNS] {} msdcs hint: {:?}", self.name, self.msdcs);
                    self.targets.extend(absent_as_empty(srv)?);
                }
                Phase::Srv => {
                    self.diag.info(format!("Resolving: {}", self.name));
                    self.phase = Phase::Host;
                    let addrs = absent_as_empty(self.resolver.lookup_address(&self.name).await)?;
                    let name = self.name.clone();
                    let hint = DnsHint {
                        is_server: true,
                        msdcs: None,
                    };
                    self.queue(addrs, self.ldap_port, &name, hint);
                }
                Phase::Host => {
                    self.diag.info(format!("No results: {}", self.name));
                    self.phase = Phase::Done;
                    return Ok(None);
                }
                Phase::Done => {
                    self.phase = Phase::Done;
                    return Ok(None);
                }
            }
        }
    }

    fn queue(&mut self, addrs: Vec<IpAddr>, port: u16, hostname: &str, hint: DnsHint) {
        self.addresses.extend(addrs.into_iter().map(|ip| Candidate {
            address: SocketAddr::new(ip, port),
            hostname: hostname.to_string(),
            hint,
        }));
    }
}

fn absent_as_empty<T>(result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(e) if matches!(e, Error::NotFound(_) | Error::TemporaryFailure(_)) => {
            debug!("[DNS] {}", e);
            Ok(Vec::new())
        }
        other => other,
    }
}

fn msdcs_hint(result: &Result<Vec<ServerTarget>>) -> Option<bool> {
    match result {
        Ok(targets) => Some(!targets.is_empty()),
        Err(Error::NotFound(_)) => Some(false),
        Err(_) => None,
    }
}
