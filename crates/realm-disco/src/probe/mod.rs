// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-candidate probes.
//!
//! [`ServerProbes`] is the seam between the orchestrator and the network:
//! the orchestrator only decides *which* candidates to probe and when,
//! [`NetworkProbes`] does the talking.

pub mod ipa;
pub mod mscldap;
pub mod rootdse;
pub mod tls;

use async_trait::async_trait;
use futures::future::{self, BoxFuture, Either, FutureExt};

use crate::config::DiscoveryConfig;
use crate::diagnostics::Diagnostics;
use crate::disco::{Disco, Strategy};
use crate::error::{Error, Result};
use crate::resolver::Candidate;

/// Probes run against a single candidate server.
#[async_trait]
pub trait ServerProbes: Send + Sync {
    /// Classify the candidate with the LDAP-based `strategies`
    /// ([`Strategy::RootDse`], [`Strategy::MsCldap`]).
    ///
    /// "Not a realm" is an absence error (see [`Error::is_absence`]).
    async fn classify(&self, candidate: &Candidate, strategies: &[Strategy], diag: &Diagnostics) -> Result<Disco>;

    /// Whether the candidate looks like a FreeIPA server.
    async fn ipa_cert(&self, candidate: &Candidate, diag: &Diagnostics) -> Result<bool>;
}

/// Probes over real sockets.
#[derive(Debug, Clone, Default)]
pub struct NetworkProbes {
    config: DiscoveryConfig,
}

impl NetworkProbes {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }
}

#[async_trait]
impl ServerProbes for NetworkProbes {
    async fn classify(&self, candidate: &Candidate, strategies: &[Strategy], diag: &Diagnostics) -> Result<Disco> {
        let address = candidate.address;
        let mut attempts: Vec<BoxFuture<'_, Result<Disco>>> = Vec::with_capacity(2);

        if strategies.contains(&Strategy::RootDse) {
            diag.info(format!("Performing LDAP DSE lookup on: {}", address.ip()));
            attempts.push(rootdse::classify(address, &self.config, diag).boxed());
        }
        if strategies.contains(&Strategy::MsCldap) {
            attempts.push(mscldap::ping(address, &self.config, diag).boxed());
        }

        let mut disco = match attempts.len() {
            0 => {
                return Err(Error::NoSuchObject(format!(
                    "No LDAP strategy applies to {}",
                    candidate.hostname
                )))
            }
            1 => attempts.remove(0).await?,
            _ => {
                let second = attempts.remove(1);
                let first = attempts.remove(0);
                first_success(first, second, diag).await?
            }
        };

        disco.explicit_server = candidate.explicit_server().map(str::to_string);
        disco.server_address = Some(address);
        Ok(disco)
    }

    async fn ipa_cert(&self, candidate: &Candidate, diag: &Diagnostics) -> Result<bool> {
        ipa::discover(candidate, &self.config, diag).await
    }
}

/// Race two attempts; the first success wins and the other is dropped.
///
/// If both fail, the more significant error is returned and the other one
/// is reported.
async fn first_success<'a>(
    a: BoxFuture<'a, Result<Disco>>,
    b: BoxFuture<'a, Result<Disco>>,
    diag: &Diagnostics,
) -> Result<Disco> {
    let (first_err, rest) = match future::select(a, b).await {
        Either::Left((Ok(disco), _)) | Either::Right((Ok(disco), _)) => return Ok(disco),
        Either::Left((Err(e), rest)) | Either::Right((Err(e), rest)) => (e, rest),
    };
    let second_err = match rest.await {
        Ok(disco) => {
            report(diag, &first_err);
            return Ok(disco);
        }
        Err(e) => e,
    };

    if second_err.is_absence() && !first_err.is_absence() {
        report(diag, &second_err);
        Err(first_err)
    } else {
        report(diag, &first_err);
        Err(second_err)
    }
}

fn report(diag: &Diagnostics, err: &Error) {
    if !err.is_cancelled() {
        diag.error(err, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::disco::ServerSoftware;
    use crate::ldap::{LdapResult, Scope, SearchEntry, SearchRequest};
    use crate::resolver::DnsHint;
    use std::sync::Arc;

    fn ipa_directory() -> Arc<rootdse::fake::Handler> {
        Arc::new(|req: &SearchRequest| {
            let entries = match (req.base.as_str(), req.scope) {
                ("", _) => vec![SearchEntry::new("").with("defaultNamingContext", &["dc=ipa,dc=test"])],
                (_, Scope::Base) => vec![SearchEntry::new("dc=ipa,dc=test")
                    .with("info", &["IPA V2.0"])
                    .with("associatedDomain", &["ipa.test"])],
                _ => vec![SearchEntry::new("cn=IPA.TEST,cn=kerberos,dc=ipa,dc=test").with("cn", &["IPA.TEST"])],
            };
            (entries, LdapResult::success())
        })
    }

    fn probes() -> NetworkProbes {
        NetworkProbes::new(DiscoveryConfig {
            connect_timeout_ms: 2_000,
            io_timeout_ms: 2_000,
            cldap_timeout_ms: 500,
            cldap_retry_ms: 100,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_classify_fills_server_fields() {
        let addr = rootdse::fake::serve(ipa_directory()).await;
        let candidate = Candidate {
            address: addr,
            hostname: "ipa1.ipa.test".into(),
            hint: DnsHint {
                is_server: true,
                msdcs: Some(false),
            },
        };
        let sink = Arc::new(MemoryDiagnostics::new());
        let diag = Diagnostics::detached(sink.clone());

        let disco = probes()
            .classify(&candidate, &candidate.hint.strategies(), &diag)
            .await
            .expect("classify");

        assert_eq!(disco.domain_name, "ipa.test");
        assert_eq!(disco.server_software, Some(ServerSoftware::FreeIpa));
        assert_eq!(disco.explicit_server.as_deref(), Some("ipa1.ipa.test"));
        assert_eq!(disco.server_address, Some(addr));
        assert_eq!(sink.messages(), vec!["Performing LDAP DSE lookup on: 127.0.0.1"]);
    }

    #[tokio::test]
    async fn test_classify_races_cldap() {
        // Nothing answers the UDP ping on this port; the LDAP chain wins.
        let addr = rootdse::fake::serve(ipa_directory()).await;
        let candidate = Candidate {
            address: addr,
            hostname: "ipa1.ipa.test".into(),
            hint: DnsHint::default(),
        };
        let strategies = [Strategy::RootDse, Strategy::MsCldap];
        let diag = Diagnostics::detached(Arc::new(MemoryDiagnostics::new()));

        let disco = probes().classify(&candidate, &strategies, &diag).await.expect("classify");
        assert_eq!(disco.kerberos_realm, "IPA.TEST");
        assert_eq!(disco.explicit_server, None);
    }

    #[tokio::test]
    async fn test_significant_error_wins() {
        let sink = Arc::new(MemoryDiagnostics::new());
        let diag = Diagnostics::detached(sink.clone());
        let absent = async { Err::<Disco, _>(Error::NoSuchObject("nothing here".into())) }.boxed();
        let broken = async {
            tokio::task::yield_now().await;
            Err::<Disco, _>(Error::Protocol("garbled".into()))
        }
        .boxed();

        let err = first_success(absent, broken, &diag).await.expect_err("both fail");
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(sink.messages(), vec!["nothing here"]);
    }
}
