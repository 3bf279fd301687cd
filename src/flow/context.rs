//! Explicit "active flow" stack.
//!
//! Each logical thread of control owns one [`FlowContext`] and passes it by
//! reference to whatever needs the active flow. Entering a flow returns a
//! [`FlowScope`] guard; dropping the guard pops exactly the entry it pushed,
//! whether the scope ends normally, through `?`, or by unwinding.
//!
//! Scopes carry the flow's tracing span without entering it, so a context
//! can be held across `.await`. Attach it to async work with
//! `.instrument(scope.span())`.

use crate::flow::session::Flow;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::Span;

struct Entry {
    token: u64,
    flow: Arc<Flow>,
    span: Span,
}

/// Stack of entered flows for one logical thread of control.
#[derive(Default)]
pub struct FlowContext {
    stack: Vec<Entry>,
    next_token: u64,
}

impl FlowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently entered flow, if any.
    pub fn current(&self) -> Option<&Arc<Flow>> {
        self.stack.last().map(|entry| &entry.flow)
    }

    /// Span of the most recently entered flow, or a disabled span.
    pub fn span(&self) -> Span {
        self.stack
            .last()
            .map(|entry| entry.span.clone())
            .unwrap_or_else(Span::none)
    }

    /// Number of active scopes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Make `flow` the active flow until the returned scope is dropped.
    ///
    /// The same flow may be entered any number of times; scopes nest.
    pub fn enter(&mut self, flow: &Arc<Flow>) -> FlowScope<'_> {
        let token = self.next_token;
        self.next_token += 1;

        let span = if flow.config().trace_spans {
            flow.span()
        } else {
            Span::none()
        };
        tracing::debug!(thread_id = %flow.thread_id(), depth = self.stack.len() + 1, "Entered flow");

        self.stack.push(Entry {
            token,
            flow: Arc::clone(flow),
            span,
        });
        FlowScope {
            ctx: self,
            token,
            flow: Arc::clone(flow),
        }
    }

    fn exit(&mut self, token: u64) {
        // Scopes borrow the context mutably, so the top entry is always ours.
        let on_top = self.stack.last().map(|entry| entry.token) == Some(token);
        if on_top {
            if let Some(entry) = self.stack.pop() {
                tracing::debug!(thread_id = %entry.flow.thread_id(), depth = self.stack.len(), "Exited flow");
            }
        } else {
            tracing::error!(token, "Flow scope exited out of order");
            if let Some(pos) = self.stack.iter().rposition(|entry| entry.token == token) {
                self.stack.truncate(pos);
            }
        }
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("depth", &self.stack.len())
            .field("current", &self.current().map(|flow| flow.thread_id()))
            .finish()
    }
}

/// Guard for an entered flow. Derefs to the context so scopes can nest.
pub struct FlowScope<'a> {
    ctx: &'a mut FlowContext,
    token: u64,
    flow: Arc<Flow>,
}

impl FlowScope<'_> {
    /// The flow this scope entered.
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }
}

impl Deref for FlowScope<'_> {
    type Target = FlowContext;

    fn deref(&self) -> &FlowContext {
        self.ctx
    }
}

impl DerefMut for FlowScope<'_> {
    fn deref_mut(&mut self) -> &mut FlowContext {
        self.ctx
    }
}

impl Drop for FlowScope<'_> {
    fn drop(&mut self) {
        self.ctx.exit(self.token);
    }
}
