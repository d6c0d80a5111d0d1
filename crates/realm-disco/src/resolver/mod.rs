// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name resolution.
//!
//! [`Resolver`] is the seam to the DNS: the production implementation is
//! [`SystemResolver`] (hickory, system configuration), tests script their
//! own. [`DnsProbe`] walks the SRV/host phases on top of it and yields
//! candidate servers one at a time.

pub mod probe;
pub mod system;

pub use probe::{Candidate, DnsHint, DnsProbe, Phase};
pub use system::SystemResolver;

use async_trait::async_trait;
use std::net::IpAddr;

use crate::disco::ServerTarget;
use crate::error::{Error, Result};

/// DNS lookups used by discovery.
///
/// Implementations report "no such name/record" as [`Error::NotFound`] and
/// transient failures as [`Error::TemporaryFailure`]; both are treated as
/// absence of data by the callers.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `_<service>._<protocol>.<domain>` SRV records.
    ///
    /// Targets come back ordered by priority, then by descending weight.
    async fn lookup_service(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<ServerTarget>>;

    /// Resolve the addresses of `host`.
    async fn lookup_address(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Convert user input to the ASCII (IDNA) form of a host name.
///
/// Surrounding whitespace and a trailing dot are removed; IP literals are
/// returned unchanged.
pub fn hostname_to_ascii(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.parse::<IpAddr>().is_ok() {
        return Ok(trimmed.to_string());
    }
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(Error::Resolve("empty host name".into()));
    }
    if trimmed.is_ascii() {
        return Ok(trimmed.to_string());
    }
    let name = hickory_resolver::Name::from_utf8(trimmed)
        .map_err(|e| Error::Resolve(format!("invalid host name '{}': {}", trimmed, e)))?;
    let ascii = name.to_ascii();
    Ok(ascii.strip_suffix('.').unwrap_or(&ascii).to_string())
}

/// Resolver answering from fixed tables, recording every query.
#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct Scripted {
        pub srv: HashMap<String, Result<Vec<ServerTarget>>>,
        pub hosts: HashMap<String, Result<Vec<IpAddr>>>,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Resolver for Scripted {
        async fn lookup_service(&self, service: &str, protocol: &str, domain: &str) -> Result<Vec<ServerTarget>> {
            let key = format!("_{}._{}.{}", service, protocol, domain);
            self.calls.lock().push(key.clone());
            self.srv
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(Error::NotFound(key)))
        }

        async fn lookup_address(&self, host: &str) -> Result<Vec<IpAddr>> {
            self.calls.lock().push(host.to_string());
            self.hosts
                .get(host)
                .cloned()
                .unwrap_or_else(|| Err(Error::NotFound(host.to_string())))
        }
    }
}
