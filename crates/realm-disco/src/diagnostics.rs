// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Operator-visible diagnostics.
//!
//! Diagnostics describe which strategies were tried and why they failed.
//! They are separate from developer logging: a sink receives every message
//! together with the request context it belongs to, while `tracing` output
//! stays free-form.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::Error;
use crate::task::Cancellable;

/// Per-request context: cancellation plus identifiers for log correlation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub operation_id: Option<String>,
    pub sender: Option<String>,
    pub cancellable: Cancellable,
}

impl RequestContext {
    /// Context with no operation id and no sender.
    ///
    /// Discoveries are shared between callers whose name, operation id and
    /// sender match, so every anonymous context requesting the same name
    /// joins the first one's discovery. That discovery is bound to the first
    /// caller's cancellable: cancelling it also ends the others with
    /// [`Error::Cancelled`](crate::Error::Cancelled). Set an operation id to
    /// get an independent discovery.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_cancellable(mut self, cancellable: Cancellable) -> Self {
        self.cancellable = cancellable;
        self
    }

    fn label(&self) -> &str {
        self.operation_id.as_deref().unwrap_or("-")
    }
}

/// Receiver of diagnostics. A `None` context means log-only.
pub trait DiagnosticsSink: Send + Sync {
    fn info(&self, ctx: Option<&RequestContext>, message: &str);
    fn error(&self, ctx: Option<&RequestContext>, err: &Error, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn info(&self, ctx: Option<&RequestContext>, message: &str) {
        let operation = ctx.map_or("-", RequestContext::label);
        info!(operation = operation, "{}", message);
    }

    fn error(&self, ctx: Option<&RequestContext>, err: &Error, message: &str) {
        let operation = ctx.map_or("-", RequestContext::label);
        if message.is_empty() {
            warn!(operation = operation, "{}", err);
        } else {
            warn!(operation = operation, "{}: {}", message, err);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Info,
    Error,
}

/// A recorded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub operation_id: Option<String>,
    pub level: DiagnosticLevel,
    pub message: String,
    pub error: Option<String>,
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) if self.message.is_empty() => f.write_str(err),
            Some(err) => write!(f, "{}: {}", self.message, err),
            None => f.write_str(&self.message),
        }
    }
}

/// Records diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Mutex<Vec<DiagnosticEntry>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<DiagnosticEntry> {
        self.entries.lock().clone()
    }

    /// Rendered messages, in arrival order.
    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(ToString::to_string).collect()
    }

    /// Rendered messages for one operation id.
    pub fn messages_for(&self, operation_id: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.operation_id.as_deref() == Some(operation_id))
            .map(ToString::to_string)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn record(&self, ctx: Option<&RequestContext>, level: DiagnosticLevel, message: &str, error: Option<&Error>) {
        self.entries.lock().push(DiagnosticEntry {
            operation_id: ctx.and_then(|c| c.operation_id.clone()),
            level,
            message: message.to_string(),
            error: error.map(ToString::to_string),
        });
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn info(&self, ctx: Option<&RequestContext>, message: &str) {
        self.record(ctx, DiagnosticLevel::Info, message, None);
    }

    fn error(&self, ctx: Option<&RequestContext>, err: &Error, message: &str) {
        self.record(ctx, DiagnosticLevel::Error, message, Some(err));
    }
}

/// Diagnostics view handed to the probes of one discovery request.
///
/// Silent once `scope` is cancelled, so probes that are still unwinding
/// after finalization cannot emit anything for the request.
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticsSink>,
    ctx: Option<RequestContext>,
    scope: Cancellable,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticsSink>, ctx: Option<RequestContext>, scope: Cancellable) -> Self {
        Self { sink, ctx, scope }
    }

    /// Log-only diagnostics that never go silent.
    pub fn detached(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self::new(sink, None, Cancellable::new())
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.ctx.as_ref()
    }

    pub fn is_silenced(&self) -> bool {
        self.scope.is_cancelled()
    }

    pub fn info(&self, message: impl AsRef<str>) {
        if !self.is_silenced() {
            self.sink.info(self.ctx.as_ref(), message.as_ref());
        }
    }

    pub fn error(&self, err: &Error, message: impl AsRef<str>) {
        if !self.is_silenced() {
            self.sink.error(self.ctx.as_ref(), err, message.as_ref());
        }
    }

    /// Emit regardless of the scope; used for the final verdict.
    pub fn info_unscoped(&self, message: impl AsRef<str>) {
        self.sink.info(self.ctx.as_ref(), message.as_ref());
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("ctx", &self.ctx)
            .field("silenced", &self.is_silenced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_records_per_operation() {
        let sink = MemoryDiagnostics::new();
        let a = RequestContext::new().with_operation_id("op-a");
        let b = RequestContext::new().with_operation_id("op-b");

        sink.info(Some(&a), "Resolving: _ldap._tcp.example.com");
        sink.error(Some(&b), &Error::NotFound("example.com".into()), "Couldn't lookup realm DNS records");
        sink.info(None, "log only");

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.messages_for("op-a"), vec!["Resolving: _ldap._tcp.example.com"]);
        assert_eq!(
            sink.messages_for("op-b"),
            vec!["Couldn't lookup realm DNS records: No DNS records found for example.com"]
        );
        assert_eq!(sink.entries()[1].level, DiagnosticLevel::Error);
    }

    #[test]
    fn test_scoped_diagnostics_silenced_after_cancel() {
        let sink = Arc::new(MemoryDiagnostics::new());
        let scope = Cancellable::new();
        let diag = Diagnostics::new(sink.clone(), Some(RequestContext::new()), scope.clone());

        diag.info("before");
        scope.cancel();
        diag.info("after");
        diag.error(&Error::Cancelled, "after");
        diag.info_unscoped("verdict");

        assert_eq!(sink.messages(), vec!["before", "verdict"]);
    }
}
