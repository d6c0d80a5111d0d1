// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resolver backed by the system DNS configuration.

use async_trait::async_trait;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use tracing::debug;

use super::Resolver;
use crate::disco::ServerTarget;
use crate::error::{Error, Result};

/// hickory resolver configured from `/etc/resolv.conf` (or the platform
/// equivalent).
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::Resolve(format!("couldn't load system DNS configuration: {}", e)))?;
        Ok(Self { inner })
    }

    pub fn with_resolver(inner: TokioAsyncResolver) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_service(
        &self,
        service: &str,
        protocol: &str,
        domain: &str,
    ) -> Result<Vec<ServerTarget>> {
        let query = format!("_{}._{}.{}.", service, protocol, domain);
        let lookup = self
            .inner
            .srv_lookup(query.as_str())
            .await
            .map_err(|e| map_error(&query, e))?;

        let mut records: Vec<(u16, u16, ServerTarget)> = Vec::new();
        for srv in lookup.iter() {
            let target = srv.target().to_ascii();
            let hostname = target.strip_suffix('.').unwrap_or(&target);
            // A lone "." target means the service is decidedly not available.
            if hostname.is_empty() {
                continue;
            }
            records.push((
                srv.priority(),
                srv.weight(),
                ServerTarget::new(hostname, srv.port()),
            ));
        }
        if records.is_empty() {
            return Err(Error::NotFound(query));
        }

        let targets = order_by_priority(records);
        debug!("[DNS] {} -> {} target(s)", query, targets.len());
        Ok(targets)
    }

    async fn lookup_address(&self, host: &str) -> Result<Vec<IpAddr>> {
        let fqdn = if host.ends_with('.') {
            host.to_string()
        } else {
            format!("{}.", host)
        };
        let lookup = self
            .inner
            .lookup_ip(fqdn.as_str())
            .await
            .map_err(|e| map_error(host, e))?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        if addrs.is_empty() {
            return Err(Error::NotFound(host.to_string()));
        }
        Ok(addrs)
    }
}

/// Lowest priority first; within a priority, heaviest weight first.
pub(crate) fn order_by_priority(mut records: Vec<(u16, u16, ServerTarget)>) -> Vec<ServerTarget> {
    records.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));
    records.into_iter().map(|(_, _, target)| target).collect()
}

fn map_error(name: &str, err: ResolveError) -> Error {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::ServFail | ResponseCode::Refused => {
                Error::TemporaryFailure(format!("{}: {}", name, response_code))
            }
            _ => Error::NotFound(name.to_string()),
        },
        ResolveErrorKind::Timeout | ResolveErrorKind::NoConnections => {
            Error::TemporaryFailure(format!("{}: {}", name, err))
        }
        _ => Error::Resolve(format!("{}: {}", name, err)),
    }
}
