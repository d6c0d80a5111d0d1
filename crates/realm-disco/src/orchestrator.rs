// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery orchestrator.
//!
//! Pulls candidates from a [`DnsProbe`] and runs the per-candidate probes
//! with bounded fan-out. Every probe is a [`Task`] on the orchestration
//! scope; completions come back as [`Event`]s on one channel, so all the
//! bookkeeping below happens on a single logical thread.
//!
//! ```text
//!            +-----------+   Event::Dns     +--------------+
//!            | DnsProbe  | ---------------> |              |
//!            +-----------+                  |              |
//!   classify(candidate)    Event::Classified|  run() loop  | -> Disco / None / Error
//!   ipa_cert(candidate)    Event::IpaChecked|              |
//!            (<= max_outstanding at once)   +--------------+
//! ```
//!
//! The first positive result wins: the scope is cancelled, which drops
//! every sibling probe and silences their diagnostics.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::DiscoveryConfig;
use crate::diagnostics::{Diagnostics, DiagnosticsSink, RequestContext};
use crate::disco::{Disco, ServerSoftware, Strategy};
use crate::error::{Error, Result};
use crate::probe::ServerProbes;
use crate::resolver::{Candidate, DnsProbe, Resolver};
use crate::task::{Cancellable, Task};

enum Event {
    Dns(Result<(DnsProbe, Option<Candidate>)>),
    Classified(Result<Disco>),
    IpaChecked(Candidate, Result<bool>),
}

/// A probe waiting for a free slot.
enum Work {
    Classify(Candidate, Vec<Strategy>),
    IpaCert(Candidate),
}

enum Dns {
    Idle(DnsProbe),
    Fetching,
    Exhausted,
}

/// Bookkeeping for one run.
struct Progress {
    dns: Dns,
    pending: VecDeque<Work>,
    outstanding: usize,
    disco: Option<Disco>,
    error: Option<Error>,
}

impl Progress {
    fn finished(&self) -> bool {
        self.disco.is_some()
            || (matches!(self.dns, Dns::Exhausted) && self.outstanding == 0 && self.pending.is_empty())
    }

    fn record_error(&mut self, err: Error) {
        if !err.is_absence() && !err.is_cancelled() && self.error.is_none() {
            self.error = Some(err);
        }
    }
}

/// Runs one discovery request to a verdict.
pub struct DiscoveryOrchestrator {
    config: Arc<DiscoveryConfig>,
    resolver: Arc<dyn Resolver>,
    probes: Arc<dyn ServerProbes>,
    diag: Diagnostics,
    cancellable: Cancellable,
    scope: Cancellable,
}

impl DiscoveryOrchestrator {
    /// `cancellable` is the request's handle; the orchestrator works in a
    /// child scope of it.
    pub fn new(
        config: Arc<DiscoveryConfig>,
        resolver: Arc<dyn Resolver>,
        probes: Arc<dyn ServerProbes>,
        sink: Arc<dyn DiagnosticsSink>,
        ctx: Option<RequestContext>,
        cancellable: Cancellable,
    ) -> Self {
        let scope = cancellable.child();
        let diag = Diagnostics::new(sink, ctx, scope.clone());
        Self {
            config,
            resolver,
            probes,
            diag,
            cancellable,
            scope,
        }
    }

    /// Discover `input`.
    ///
    /// `Ok(None)` means nothing was found and no probe failed beyond plain
    /// absence of data.
    pub async fn run(self, input: &str) -> Result<Option<Disco>> {
        let probe = DnsProbe::new(input, self.resolver.clone(), self.diag.clone(), self.config.ldap_port)?;
        let domain = probe.name().to_string();
        debug!("[Discovery] starting discovery of {}", domain);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut progress = Progress {
            dns: Dns::Idle(probe),
            pending: VecDeque::new(),
            outstanding: 0,
            disco: None,
            error: None,
        };
        self.pump(&mut progress, &tx);

        while !progress.finished() {
            let event = tokio::select! {
                biased;
                _ = self.scope.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(&mut progress, &domain, event);
            self.pump(&mut progress, &tx);
        }

        if self.cancellable.is_cancelled() {
            self.scope.cancel();
            debug!("[Discovery] discovery of {} cancelled", domain);
            return Err(Error::Cancelled);
        }
        self.finalize(progress).await
    }

    fn handle(&self, progress: &mut Progress, domain: &str, event: Event) {
        match event {
            Event::Dns(Ok((probe, Some(candidate)))) => {
                progress.dns = Dns::Idle(probe);
                self.queue(progress, candidate);
            }
            Event::Dns(Ok((_, None))) => {
                trace!("[Discovery] no more candidates for {}", domain);
                progress.dns = Dns::Exhausted;
            }
            Event::Dns(Err(e)) => {
                progress.dns = Dns::Exhausted;
                if !e.is_cancelled() && !e.is_absence() {
                    self.diag.error(&e, "Couldn't lookup realm DNS records");
                }
                progress.record_error(e);
            }
            Event::Classified(result) => {
                progress.outstanding -= 1;
                match result {
                    Ok(disco) => {
                        progress.disco.get_or_insert(disco);
                    }
                    Err(e) => {
                        if !e.is_cancelled() {
                            self.diag.error(&e, "");
                        }
                        progress.record_error(e);
                    }
                }
            }
            Event::IpaChecked(candidate, result) => {
                progress.outstanding -= 1;
                match result {
                    Ok(true) => {
                        let mut disco = Disco::new(domain).with_software(ServerSoftware::FreeIpa);
                        disco.server_address = Some(candidate.address);
                        progress.disco.get_or_insert(disco);
                    }
                    Ok(false) => {}
                    // Already reported by the probe.
                    Err(e) => progress.record_error(e),
                }
            }
        }
    }

    fn queue(&self, progress: &mut Progress, candidate: Candidate) {
        let strategies = candidate.hint.strategies();
        let ldap: Vec<Strategy> = strategies
            .iter()
            .copied()
            .filter(|s| *s != Strategy::IpaCert)
            .collect();
        let ipa = self.config.ipa_enabled && strategies.contains(&Strategy::IpaCert);

        if !ldap.is_empty() {
            progress.pending.push_back(Work::Classify(candidate.clone(), ldap));
        }
        if ipa {
            progress.pending.push_back(Work::IpaCert(candidate));
        }
    }

    /// Start held-back probes while slots are free, then ask for another
    /// candidate if there is still room.
    fn pump(&self, progress: &mut Progress, tx: &mpsc::UnboundedSender<Event>) {
        if progress.disco.is_some() {
            return;
        }
        while progress.outstanding < self.config.max_outstanding {
            let Some(work) = progress.pending.pop_front() else {
                break;
            };
            progress.outstanding += 1;
            self.start(work, tx);
        }

        let room = progress.outstanding < self.config.max_outstanding && progress.pending.is_empty();
        if room && matches!(progress.dns, Dns::Idle(_)) {
            if let Dns::Idle(probe) = std::mem::replace(&mut progress.dns, Dns::Fetching) {
                self.fetch(probe, tx);
            }
        }
    }

    fn fetch(&self, mut probe: DnsProbe, tx: &mpsc::UnboundedSender<Event>) {
        let task = self.task("dns-probe", tx, Event::Dns);
        task.spawn(async move {
            let next = probe.next().await?;
            Ok::<_, Error>((probe, next))
        });
    }

    fn start(&self, work: Work, tx: &mpsc::UnboundedSender<Event>) {
        let probes = self.probes.clone();
        let diag = self.diag.clone();
        match work {
            Work::Classify(candidate, strategies) => {
                trace!("[Discovery] classifying {} ({:?})", candidate.address, strategies);
                let task = self.task("classify", tx, Event::Classified);
                task.spawn(async move { probes.classify(&candidate, &strategies, &diag).await });
            }
            Work::IpaCert(candidate) => {
                trace!("[Discovery] IPA check of {}", candidate.hostname);
                let for_event = candidate.clone();
                let task = self.task("ipa-cert", tx, move |result| Event::IpaChecked(for_event, result));
                task.spawn(async move { probes.ipa_cert(&candidate, &diag).await });
            }
        }
    }

    /// A task on the orchestration scope whose completion is posted as an
    /// event.
    fn task<T, F>(&self, tag: &'static str, tx: &mpsc::UnboundedSender<Event>, wrap: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(Result<T>) -> Event + Send + 'static,
    {
        let tx = tx.clone();
        let task = Task::with_callback(Some(self.scope.clone()), move |task: Task<T>| {
            // The receiver is gone once the run finalized.
            let _ = tx.send(wrap(task.propagate()));
        });
        task.set_source_tag(tag);
        task
    }

    async fn finalize(self, progress: Progress) -> Result<Option<Disco>> {
        // Stop every sibling probe.
        self.scope.cancel();

        let Some(mut disco) = progress.disco else {
            return match progress.error {
                Some(e) => Err(e),
                None => Ok(None),
            };
        };

        if self.config.kdc_lookup {
            let lookup = self.resolver.lookup_service("kerberos", "udp", &disco.domain_name);
            let result = tokio::select! {
                biased;
                _ = self.cancellable.cancelled() => return Err(Error::Cancelled),
                result = lookup => result,
            };
            match result {
                Ok(targets) => disco.kdc_targets = targets,
                Err(e) => debug!("[Discovery] no KDC records for {}: {}", disco.domain_name, e),
            }
        }

        self.diag
            .info_unscoped(format!("Successfully discovered: {}", disco.domain_name));
        Ok(Some(disco))
    }
}
