// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kerberos Realm Discovery
//!
//! Decides whether a domain or server name is a joinable Kerberos realm
//! (Active Directory, FreeIPA, or plain Kerberos) and describes it.
//!
//! # Features
//!
//! - **DNS probing**: `_ldap._tcp` SRV targets, MSDCS hint, host fallback
//! - **rootDSE classification**: naming context, IPA marker, realm container
//! - **MS-CLDAP ping**: NETLOGON over UDP or the open LDAP session
//! - **IPA certificate heuristic**: CA served over HTTPS anchors the server
//! - **Deduplication**: identical concurrent requests share one discovery
//!
//! # Quick Start
//!
//! ```no_run
//! use realm_disco::{DiscoveryConfig, DiscoveryService};
//!
//! # async fn run() -> realm_disco::Result<()> {
//! let service = DiscoveryService::new(DiscoveryConfig::default())?;
//! match service.discover_domain("example.com", None).await? {
//!     Some(disco) => println!("{} ({})", disco.domain_name, disco.kind()),
//!     None => println!("no realm found"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! max_outstanding = 3
//! connect_timeout_ms = 5000
//! ipa_enabled = true
//! kdc_lookup = true
//! ```

pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod disco;
pub mod error;
pub mod ldap;
pub mod orchestrator;
pub mod probe;
pub mod resolver;
pub mod task;

pub use cache::{DiscoveryKey, DiscoveryResult, DiscoveryService};
pub use config::{ConfigError, DiscoveryConfig};
pub use diagnostics::{
    DiagnosticEntry, DiagnosticLevel, Diagnostics, DiagnosticsSink, MemoryDiagnostics, RequestContext,
    TracingDiagnostics,
};
pub use disco::{Disco, RealmKind, ServerSoftware, ServerTarget, Strategy};
pub use error::{Error, Result};
pub use orchestrator::DiscoveryOrchestrator;
pub use probe::{NetworkProbes, ServerProbes};
pub use resolver::{Candidate, DnsHint, DnsProbe, Phase, Resolver, SystemResolver};
pub use task::{Cancellable, Task, WorkerPool};
