// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! rootDSE classification chain.
//!
//! One anonymous LDAP session, searches strictly in sequence:
//!
//! 1. rootDSE: `defaultNamingContext`, `supportedCapabilities`
//! 2. naming context: `info`, `associatedDomain` (FreeIPA marks `info`)
//! 3. naming context subtree: `krbRealmContainer` `cn`
//!
//! Active Directory servers branch off after step 1 to a NETLOGON search,
//! over the same TCP session on 2003+ servers or as a UDP ping otherwise.

use std::net::SocketAddr;
use tracing::debug;

use super::mscldap;
use crate::config::DiscoveryConfig;
use crate::diagnostics::Diagnostics;
use crate::disco::{Disco, ServerSoftware};
use crate::error::{Error, Result};
use crate::ldap::{Filter, LdapConnection, Scope, SearchEntry, SearchRequest};

/// LDAP_CAP_ACTIVE_DIRECTORY_OID
pub const CAP_ACTIVE_DIRECTORY: &str = "1.2.840.113556.1.4.800";
/// LDAP_CAP_ACTIVE_DIRECTORY_V51_OID (Windows Server 2003 and later)
pub const CAP_ACTIVE_DIRECTORY_V51: &str = "1.2.840.113556.1.4.1670";

const KRB_REALM_FILTER: &str = "krbRealmContainer";

/// A search in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    RootDse,
    Netlogon,
    DomainInfo,
    KerberosRealm,
}

/// Where the chain goes after a search result.
#[derive(Debug)]
enum State {
    Search(Step),
    UdpPing,
    Finished(Disco),
}

/// Facts gathered so far.
#[derive(Debug, Default)]
struct Chain {
    naming_context: Option<String>,
    software: Option<ServerSoftware>,
    domain: Option<String>,
}

impl Chain {
    fn request(&self, step: Step) -> Result<SearchRequest> {
        let nc = || {
            self.naming_context
                .clone()
                .ok_or_else(|| Error::Internal("naming context not known yet".into()))
        };
        Ok(match step {
            Step::RootDse => SearchRequest::new(
                "",
                Scope::Base,
                Filter::any(),
                &["defaultNamingContext", "supportedCapabilities"],
            ),
            Step::Netlogon => mscldap::request(),
            Step::DomainInfo => {
                SearchRequest::new(nc()?, Scope::Base, Filter::any(), &["info", "associatedDomain"])
            }
            Step::KerberosRealm => SearchRequest::new(
                nc()?,
                Scope::Subtree,
                Filter::equality("objectClass", KRB_REALM_FILTER),
                &["cn"],
            ),
        })
    }

    fn result(&mut self, step: Step, entries: &[SearchEntry]) -> Result<State> {
        let entry = entries.first();
        match step {
            Step::RootDse => {
                self.naming_context = entry.and_then(|e| e.first_string("defaultNamingContext"));
                debug!("[LDAP] defaultNamingContext: {:?}", self.naming_context);

                let has_cap = |oid| entry.is_some_and(|e| e.has_value("supportedCapabilities", oid));
                if has_cap(CAP_ACTIVE_DIRECTORY) {
                    if has_cap(CAP_ACTIVE_DIRECTORY_V51) {
                        return Ok(State::Search(Step::Netlogon));
                    }
                    return Ok(State::UdpPing);
                }
                if self.naming_context.is_none() {
                    return Err(Error::NoSuchObject(
                        "Couldn't find default naming context on LDAP server".into(),
                    ));
                }
                Ok(State::Search(Step::DomainInfo))
            }

            Step::Netlogon => {
                let entry = entry.ok_or_else(|| {
                    Error::NoSuchObject("No NetLogon response from LDAP server".into())
                })?;
                debug!("[LDAP] received TCP NetLogon response");
                Ok(State::Finished(mscldap::from_entry(entry)?.into_disco()?))
            }

            Step::DomainInfo => {
                let entry = entry.ok_or_else(|| {
                    Error::NoSuchObject("Couldn't lookup domain name on LDAP server".into())
                })?;
                self.software = entry
                    .first_value("info")
                    .filter(|info| info.len() >= 3 && info[..3].eq_ignore_ascii_case(b"IPA"))
                    .map(|_| ServerSoftware::FreeIpa);
                if let Some(software) = self.software {
                    debug!("[LDAP] server software: {}", software);
                }

                self.domain = entry.first_string("associatedDomain").filter(|d| !d.is_empty());
                debug!("[LDAP] associatedDomain: {:?}", self.domain);
                if self.domain.is_none() {
                    return Err(Error::NoSuchObject(
                        "Couldn't lookup domain name on LDAP server".into(),
                    ));
                }
                Ok(State::Search(Step::KerberosRealm))
            }

            Step::KerberosRealm => {
                let domain = self.domain.take().unwrap_or_default();
                let mut disco = Disco::new(domain);
                disco.server_software = self.software;
                if let Some(realm) = entry.and_then(|e| e.first_string("cn")) {
                    debug!("[LDAP] kerberos realm: {}", realm);
                    disco.kerberos_realm = realm;
                }
                Ok(State::Finished(disco))
            }
        }
    }
}

/// Classify the LDAP server at `address`.
///
/// The returned [`Disco`] carries domain, realm and software only; the
/// caller fills in which server answered.
pub async fn classify(address: SocketAddr, config: &DiscoveryConfig, diag: &Diagnostics) -> Result<Disco> {
    let mut conn =
        LdapConnection::connect_anonymous(address, config.connect_timeout(), config.io_timeout()).await?;

    let mut chain = Chain::default();
    let mut state = State::Search(Step::RootDse);
    let outcome = loop {
        let step = match state {
            State::Search(step) => step,
            other => break Ok(other),
        };
        match run_step(&mut conn, &mut chain, step).await {
            Ok(next) => state = next,
            Err(e) => break Err(e),
        }
    };
    conn.unbind().await;

    match outcome? {
        State::UdpPing => mscldap::ping(address, config, diag).await,
        State::Finished(disco) => Ok(disco),
        State::Search(_) => Err(Error::Internal("LDAP chain stopped mid-search".into())),
    }
}

async fn run_step(conn: &mut LdapConnection, chain: &mut Chain, step: Step) -> Result<State> {
    let request = chain.request(step)?;
    let entries = match conn.search(request).await {
        Ok(outcome) => outcome.entries,
        // An empty subtree under the naming context just means no realm container.
        Err(Error::NoSuchObject(_)) if step == Step::KerberosRealm => Vec::new(),
        Err(e) => return Err(e),
    };
    chain.result(step, &entries)
}
