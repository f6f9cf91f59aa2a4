//! Ordered list of navigable entries.
//!
//! Entries are values: they are swapped in and out whole, never edited in
//! place, which keeps every rollback a plain push/pop/replace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::payload::{Payload, ScenePath};

/// One navigable scene plus the payload it arrived with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackEntry {
    pub scene_path: ScenePath,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl StackEntry {
    pub fn new(scene_path: ScenePath, payload: Payload) -> Self {
        Self {
            scene_path,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Same scene, fresh payload. Used when control returns to an entry.
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            scene_path: self.scene_path.clone(),
            payload,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationStack {
    entries: Vec<StackEntry>,
}

impl NavigationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack seeded with the entry that is active right now.
    pub fn seeded(active: StackEntry) -> Self {
        Self {
            entries: vec![active],
        }
    }

    pub fn push(&mut self, entry: StackEntry) {
        self.entries.push(entry);
    }

    /// Swaps the top entry, returning the one it displaced.
    ///
    /// On an empty stack the entry becomes the only one and `None` is returned.
    pub fn replace(&mut self, entry: StackEntry) -> Option<StackEntry> {
        match self.entries.last_mut() {
            Some(top) => Some(std::mem::replace(top, entry)),
            None => {
                self.entries.push(entry);
                None
            }
        }
    }

    /// Removes the top entry. The last remaining entry can never be popped.
    pub fn pop(&mut self) -> FlowResult<StackEntry> {
        if self.entries.len() <= 1 {
            return Err(FlowError::NoPreviousEntry);
        }
        self.entries.pop().ok_or(FlowError::NoPreviousEntry)
    }

    /// Removes the top entry without the last-entry guard. Rollback only.
    pub(crate) fn discard_top(&mut self) -> Option<StackEntry> {
        self.entries.pop()
    }

    pub fn peek(&self) -> Option<&StackEntry> {
        self.entries.last()
    }

    /// The entry directly beneath the top.
    pub fn beneath(&self) -> Option<&StackEntry> {
        self.entries.iter().rev().nth(1)
    }

    /// Drops every entry; with `keep_active` the current top survives.
    pub fn clear(&mut self, keep_active: bool) {
        let active = if keep_active { self.entries.pop() } else { None };
        self.entries.clear();
        self.entries.extend(active);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &ScenePath> {
        self.entries.iter().map(|entry| &entry.scene_path)
    }
}
