// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Minimal LDAPv3 client used by the discovery probes.
//!
//! Covers anonymous bind, search, and the connectionless (CLDAP) datagram
//! form used by the Active Directory NETLOGON ping.

pub mod ber;
pub mod connection;
pub mod filter;
pub mod message;
pub mod result;

pub use connection::{LdapConnection, SearchOutcome};
pub use filter::Filter;
pub use message::{
    Attribute, LdapMessage, LdapResult, ProtocolOp, Scope, SearchEntry, SearchRequest,
};
