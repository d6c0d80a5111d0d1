// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery service and in-flight deduplication.
//!
//! Identical requests (same normalized name, same caller) that arrive while
//! a discovery is running attach to it instead of probing again. Entries
//! leave the registry the moment they complete: this deduplicates
//! concurrent work, it does not cache answers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::diagnostics::{DiagnosticsSink, RequestContext, TracingDiagnostics};
use crate::disco::Disco;
use crate::error::Result;
use crate::orchestrator::DiscoveryOrchestrator;
use crate::probe::{NetworkProbes, ServerProbes};
use crate::resolver::{Resolver, SystemResolver};
use crate::task::{Cancellable, Task, WorkerPool};

/// Verdict handed to every waiter: a realm, or `None` if nothing was found.
pub type DiscoveryResult = Option<Arc<Disco>>;

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryKey {
    pub name: String,
    pub operation_id: Option<String>,
    pub sender: Option<String>,
}

impl DiscoveryKey {
    pub fn new(name: &str, ctx: Option<&RequestContext>) -> Self {
        Self {
            name: normalize(name),
            operation_id: ctx.and_then(|c| c.operation_id.clone()),
            sender: ctx.and_then(|c| c.sender.clone()),
        }
    }
}

/// Trim, drop one trailing dot, lower-case.
pub fn normalize(name: &str) -> String {
    let trimmed = name.trim();
    trimmed.strip_suffix('.').unwrap_or(trimmed).to_lowercase()
}

struct CacheEntry {
    cancellable: Cancellable,
    state: Mutex<EntryState>,
}

#[derive(Default)]
struct EntryState {
    completed: bool,
    waiters: Vec<Task<DiscoveryResult>>,
}

struct ServiceInner {
    config: Arc<DiscoveryConfig>,
    resolver: Arc<dyn Resolver>,
    probes: Arc<dyn ServerProbes>,
    sink: Arc<dyn DiagnosticsSink>,
    pool: WorkerPool,
    registry: Mutex<HashMap<DiscoveryKey, Arc<CacheEntry>>>,
    launched: AtomicUsize,
}

/// Entry point for realm discovery.
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<ServiceInner>,
}

impl DiscoveryService {
    /// Service over the system resolver and real network probes, reporting
    /// diagnostics through `tracing`.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        let resolver = Arc::new(SystemResolver::from_system_conf()?);
        let probes = Arc::new(NetworkProbes::new(config.clone()));
        Self::with_parts(config, resolver, probes, Arc::new(TracingDiagnostics))
    }

    /// Service over caller-provided collaborators.
    pub fn with_parts(
        config: DiscoveryConfig,
        resolver: Arc<dyn Resolver>,
        probes: Arc<dyn ServerProbes>,
        sink: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new("realm-disco", config.worker_threads);
        info!(
            "[Discovery] service ready (max_outstanding={}, ipa={}, kdc_lookup={})",
            config.max_outstanding, config.ipa_enabled, config.kdc_lookup
        );
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config: Arc::new(config),
                resolver,
                probes,
                sink,
                pool,
                registry: Mutex::new(HashMap::new()),
                launched: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    /// Pool for blocking work done on behalf of discovery callers.
    pub fn worker_pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Discover `name`; await the returned task for the verdict.
    pub fn discover_domain(&self, name: &str, ctx: Option<&RequestContext>) -> Task<DiscoveryResult> {
        let task = Task::new(ctx.map(|c| c.cancellable.clone()));
        self.attach(name, ctx, task.clone());
        task
    }

    /// Discover `name` and invoke `callback` with the completed task.
    pub fn discover_domain_with<F>(&self, name: &str, ctx: Option<&RequestContext>, callback: F) -> Task<DiscoveryResult>
    where
        F: FnOnce(Task<DiscoveryResult>) + Send + 'static,
    {
        let task = Task::with_callback(ctx.map(|c| c.cancellable.clone()), callback);
        self.attach(name, ctx, task.clone());
        task
    }

    /// Number of discoveries currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Number of discoveries started since the service was created.
    pub fn launched(&self) -> usize {
        self.inner.launched.load(Ordering::SeqCst)
    }

    /// Cancel every running discovery. Waiters complete with
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    pub fn shutdown(&self) {
        let entries: Vec<Arc<CacheEntry>> = self.inner.registry.lock().values().cloned().collect();
        debug!("[Discovery] shutting down {} running discoveries", entries.len());
        for entry in entries {
            entry.cancellable.cancel();
        }
    }

    fn attach(&self, name: &str, ctx: Option<&RequestContext>, task: Task<DiscoveryResult>) {
        task.set_source_tag("discover-domain");
        let key = DiscoveryKey::new(name, ctx);

        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.get(&key) {
            let mut state = entry.state.lock();
            if !state.completed {
                debug!("[Discovery] joining running discovery of {}", key.name);
                state.waiters.push(task);
                return;
            }
        }

        let entry = Arc::new(CacheEntry {
            cancellable: ctx.map(|c| c.cancellable.child()).unwrap_or_default(),
            state: Mutex::new(EntryState {
                completed: false,
                waiters: vec![task],
            }),
        });
        registry.insert(key.clone(), entry.clone());
        drop(registry);

        self.launch(key, entry, name.to_string(), ctx.cloned());
    }

    fn launch(&self, key: DiscoveryKey, entry: Arc<CacheEntry>, name: String, ctx: Option<RequestContext>) {
        self.inner.launched.fetch_add(1, Ordering::SeqCst);
        let orchestrator = DiscoveryOrchestrator::new(
            self.inner.config.clone(),
            self.inner.resolver.clone(),
            self.inner.probes.clone(),
            self.inner.sink.clone(),
            ctx,
            entry.cancellable.clone(),
        );

        let inner = self.inner.clone();
        let finished = entry.clone();
        let run = Task::with_callback(None, move |run: Task<DiscoveryResult>| {
            inner.complete(&key, &finished, run.propagate());
        });
        run.set_source_tag("discovery");
        run.spawn(async move { orchestrator.run(&name).await.map(|found| found.map(Arc::new)) });
    }
}

impl ServiceInner {
    fn complete(&self, key: &DiscoveryKey, entry: &Arc<CacheEntry>, result: Result<DiscoveryResult>) {
        let waiters = {
            let mut registry = self.registry.lock();
            if registry.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
                registry.remove(key);
            }
            let mut state = entry.state.lock();
            state.completed = true;
            std::mem::take(&mut state.waiters)
        };

        // Stop anything still running for this entry.
        entry.cancellable.cancel();

        debug!(
            "[Discovery] discovery of {} finished, notifying {} waiter(s)",
            key.name,
            waiters.len()
        );
        for waiter in waiters {
            match &result {
                Ok(verdict) => waiter.return_value(verdict.clone()),
                Err(e) => waiter.return_error(e.clone()),
            }
        }
    }
}
