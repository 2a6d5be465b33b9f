use crate::{BackendLocation, Breakpoint, BreakpointId, Origin};
use std::collections::{BTreeMap, HashSet};

/// The mirrored slice of the backend's breakpoint table owned by one actor:
/// either the breakpoints of a single source file or all instruction
/// breakpoints.
#[derive(Debug, Default)]
pub(crate) struct BreakpointTable {
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
}

impl BreakpointTable {
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    pub fn get_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.breakpoints.get_mut(&id)
    }

    pub fn insert(&mut self, breakpoint: Breakpoint) -> Option<Breakpoint> {
        self.breakpoints.insert(breakpoint.id, breakpoint)
    }

    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }

    pub fn ids(&self) -> Vec<BreakpointId> {
        self.breakpoints.keys().copied().collect()
    }

    /// The breakpoint a request resolving to `location` should reuse. Console
    /// commands may stack several breakpoints on one line; a client-origin
    /// one wins, otherwise the oldest.
    pub fn at(&self, location: &BackendLocation) -> Option<BreakpointId> {
        let mut candidates = self.iter().filter(|breakpoint| breakpoint.is_at(location));
        let first = candidates.next()?;
        if first.origin == Origin::Client {
            return Some(first.id);
        }
        Some(
            candidates
                .find(|breakpoint| breakpoint.origin == Origin::Client)
                .unwrap_or(first)
                .id,
        )
    }

    pub fn not_at(&self, locations: &HashSet<BackendLocation>) -> Vec<BreakpointId> {
        self.iter()
            .filter(|breakpoint| {
                !locations.contains(&breakpoint.backend_location())
                    && !breakpoint
                        .requested_at
                        .as_ref()
                        .is_some_and(|requested| locations.contains(requested))
            })
            .map(|breakpoint| breakpoint.id)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }
}
