//! Breakpoint table
//!
//! Breakpoints are indexed twice: by id for controller operations, and by
//! the location's match key for the per-message lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::location::Location;

/// Breakpoint ids are unique for the lifetime of the process
static NEXT_BREAKPOINT_ID: AtomicU64 = AtomicU64::new(1);

fn next_breakpoint_id() -> String {
    NEXT_BREAKPOINT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

/// A rule that pauses the debugger when traffic reaches a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: String,
    pub location: Location,
    pub active: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    by_id: HashMap<String, Breakpoint>,
    /// match key -> breakpoint id
    by_location: HashMap<String, String>,
}

impl BreakpointTable {
    /// Add an active breakpoint. A location that already has one keeps
    /// its id and is re-activated.
    pub fn insert(&mut self, location: Location) -> String {
        let key = location.match_key();
        if let Some(existing) = self
            .by_location
            .get(&key)
            .and_then(|id| self.by_id.get_mut(id))
        {
            existing.active = true;
            return existing.id.clone();
        }

        let bp = Breakpoint {
            id: next_breakpoint_id(),
            location,
            active: true,
        };
        let id = bp.id.clone();
        self.by_location.insert(key, id.clone());
        self.by_id.insert(id.clone(), bp);
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<Breakpoint> {
        let bp = self.by_id.remove(id)?;
        let key = bp.location.match_key();
        if self.by_location.get(&key).map(String::as_str) == Some(id) {
            self.by_location.remove(&key);
        }
        Some(bp)
    }

    pub fn set_active(&mut self, id: &str, active: bool) -> bool {
        match self.by_id.get_mut(id) {
            Some(bp) => {
                bp.active = active;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Breakpoint> {
        self.by_id.get(id)
    }

    /// Active breakpoint registered under a match key
    pub fn active_at(&self, match_key: &str) -> Option<&Breakpoint> {
        self.by_location
            .get(match_key)
            .and_then(|id| self.by_id.get(id))
            .filter(|bp| bp.active)
    }

    /// All breakpoints in creation order
    pub fn list(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self.by_id.values().cloned().collect();
        all.sort_by_key(|bp| bp.id.parse::<u64>().unwrap_or(u64::MAX));
        all
    }
}
