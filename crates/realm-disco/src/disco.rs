// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery result types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Directory server product behind a realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerSoftware {
    ActiveDirectory,
    #[serde(rename = "ipa")]
    FreeIpa,
}

impl ServerSoftware {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveDirectory => "active-directory",
            Self::FreeIpa => "ipa",
        }
    }
}

impl fmt::Display for ServerSoftware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host and port from an SRV record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTarget {
    pub hostname: String,
    pub port: u16,
}

impl ServerTarget {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl fmt::Display for ServerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// A discovered realm.
///
/// Published behind an `Arc` and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disco {
    pub domain_name: String,
    pub kerberos_realm: String,
    pub server_software: Option<ServerSoftware>,
    /// Set when the input named a server rather than a domain.
    pub explicit_server: Option<String>,
    /// NetBIOS domain name (Active Directory only).
    pub workgroup: Option<String>,
    /// Address of the server that classified the realm.
    pub server_address: Option<SocketAddr>,
    pub kdc_targets: Vec<ServerTarget>,
}

impl Disco {
    /// A result for `domain` with the realm defaulted to its upper-case form.
    pub fn new(domain: impl Into<String>) -> Self {
        let domain_name = domain.into();
        Self {
            kerberos_realm: domain_name.to_uppercase(),
            domain_name,
            server_software: None,
            explicit_server: None,
            workgroup: None,
            server_address: None,
            kdc_targets: Vec::new(),
        }
    }

    pub fn with_software(mut self, software: ServerSoftware) -> Self {
        self.server_software = Some(software);
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.kerberos_realm = realm.into();
        self
    }

    pub fn kind(&self) -> RealmKind {
        RealmKind::from_software(self.server_software)
    }
}

/// Probe strategy run against a candidate server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Anonymous LDAP rootDSE chain.
    RootDse,
    /// MS-CLDAP NETLOGON ping over UDP.
    MsCldap,
    /// FreeIPA CA certificate heuristic over HTTPS.
    IpaCert,
}

/// Closed set of realm kinds a candidate may turn out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealmKind {
    ActiveDirectory,
    FreeIpa,
    GenericKerberos,
}

impl RealmKind {
    pub fn from_software(software: Option<ServerSoftware>) -> Self {
        match software {
            Some(ServerSoftware::ActiveDirectory) => Self::ActiveDirectory,
            Some(ServerSoftware::FreeIpa) => Self::FreeIpa,
            None => Self::GenericKerberos,
        }
    }

    /// Strategies worth running when a candidate is suspected to be this kind.
    pub fn strategies(self) -> &'static [Strategy] {
        match self {
            Self::ActiveDirectory => &[Strategy::RootDse, Strategy::MsCldap],
            Self::FreeIpa => &[Strategy::RootDse, Strategy::IpaCert],
            Self::GenericKerberos => &[Strategy::RootDse, Strategy::MsCldap, Strategy::IpaCert],
        }
    }
}

impl fmt::Display for RealmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ActiveDirectory => "active-directory",
            Self::FreeIpa => "ipa",
            Self::GenericKerberos => "kerberos",
        })
    }
}
