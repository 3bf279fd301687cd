//! History - append-only, thread-scoped event storage.
//!
//! Durable storage is a collaborator behind the [`History`] trait.
//! [`InMemoryHistory`] backs tests and the CLI.

use super::event::{Event, EventId, StoredEvent, ThreadId};
use crate::agent::AgentId;
use crate::core::task::TaskId;
use crate::error::{Error, Result};
use std::sync::{PoisonError, RwLock};

/// Filter for [`History::query`].
///
/// Empty id/type lists mean "no filter". A non-empty list matches events
/// tagged with any of its entries. `before_id` and `after_id` are
/// exclusive bounds. `limit` keeps the most recent matches.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub thread_id: ThreadId,
    pub agent_ids: Vec<AgentId>,
    pub task_ids: Vec<TaskId>,
    pub before_id: Option<EventId>,
    pub after_id: Option<EventId>,
    pub limit: Option<usize>,
    pub types: Vec<String>,
}

impl EventQuery {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            agent_ids: Vec::new(),
            task_ids: Vec::new(),
            before_id: None,
            after_id: None,
            limit: None,
            types: Vec::new(),
        }
    }

    /// Check whether a stored event passes every filter except `limit`.
    pub fn matches(&self, stored: &StoredEvent) -> bool {
        if stored.thread_id != self.thread_id {
            return false;
        }
        if let Some(before) = self.before_id {
            if stored.id >= before {
                return false;
            }
        }
        if let Some(after) = self.after_id {
            if stored.id <= after {
                return false;
            }
        }
        if !self.agent_ids.is_empty()
            && !stored.agent_ids.iter().any(|a| self.agent_ids.contains(a))
        {
            return false;
        }
        if !self.task_ids.is_empty() && !stored.task_ids.iter().any(|t| self.task_ids.contains(t))
        {
            return false;
        }
        if !self.types.is_empty() && !self.types.iter().any(|t| t == stored.type_name()) {
            return false;
        }
        true
    }
}

/// Append/query interface to the event log.
pub trait History: Send + Sync {
    /// Append events to a thread, preserving submission order.
    ///
    /// Returns the ids assigned to the events, in the same order.
    fn append(&self, thread_id: &ThreadId, events: Vec<Event>) -> Result<Vec<EventId>>;

    /// Query events, ascending by id.
    fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>>;
}

/// In-memory history shared by every thread appended to it.
///
/// Ids come from one counter across all threads, so they are strictly
/// increasing in append order.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    events: Vec<StoredEvent>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all threads.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl History for InMemoryHistory {
    fn append(&self, thread_id: &ThreadId, events: Vec<Event>) -> Result<Vec<EventId>> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| Error::History(e.to_string()))?;

        let mut ids = Vec::with_capacity(events.len());
        for event in events {
            inner.next_id += 1;
            let id = EventId(inner.next_id);
            inner.events.push(StoredEvent {
                id,
                thread_id: thread_id.clone(),
                event,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| Error::History(e.to_string()))?;

        let matched: Vec<&StoredEvent> = inner.events.iter().filter(|e| query.matches(e)).collect();
        let skip = match query.limit {
            Some(limit) => matched.len().saturating_sub(limit),
            None => 0,
        };
        Ok(matched.into_iter().skip(skip).cloned().collect())
    }
}
