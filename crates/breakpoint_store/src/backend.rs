use crate::{BreakpointId, BreakpointKind};
use anyhow::Result;
use async_trait::async_trait;
use dap::ThreadId;
use std::{path::Path, sync::Arc};

/// A location as the backend understands it: a concrete line with code, or
/// a raw instruction address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendLocation {
    Source { path: Arc<Path>, line: u32 },
    Address(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertBreakpoint {
    pub location: BackendLocation,
    pub condition: Option<String>,
    pub kind: BreakpointKind,
}

/// The backend's answer to an insert. The location may differ from the
/// requested one if the backend relocated further.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacedBreakpoint {
    pub id: BreakpointId,
    pub location: BackendLocation,
    pub pending: bool,
}

/// A breakpoint record pushed by the backend when its table changes outside
/// of the store's own requests, typically through console commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointSnapshot {
    pub id: BreakpointId,
    pub location: Option<BackendLocation>,
    pub condition: Option<String>,
    pub kind: BreakpointKind,
    pub enabled: bool,
    pub pending: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendNotification {
    New(BreakpointSnapshot),
    Changed(BreakpointSnapshot),
    Removed(BreakpointId),
}

impl BackendNotification {
    pub fn id(&self) -> BreakpointId {
        match self {
            BackendNotification::New(snapshot) | BackendNotification::Changed(snapshot) => {
                snapshot.id
            }
            BackendNotification::Removed(id) => *id,
        }
    }
}

/// The request/response channel to the attached native debugger.
///
/// Calls are issued one at a time per table and in the order the store
/// decided on them. Per-breakpoint failures should be reported as
/// [`crate::BreakpointError`] values wrapped in the returned error so they can
/// be told apart from transport failures.
#[async_trait]
pub trait DebuggerBackend: 'static + Send + Sync {
    async fn insert_breakpoint(&self, request: InsertBreakpoint) -> Result<PlacedBreakpoint>;

    async fn set_condition(&self, id: BreakpointId, condition: Option<&str>) -> Result<()>;

    async fn set_enabled(&self, id: BreakpointId, enabled: bool) -> Result<()>;

    async fn delete_breakpoint(&self, id: BreakpointId) -> Result<()>;

    /// Evaluates a breakpoint condition in the innermost frame of `thread_id`.
    async fn evaluate_condition(&self, thread_id: ThreadId, expression: &str) -> Result<bool>;

    async fn configuration_done(&self) -> Result<()>;

    async fn resume(&self, thread_id: ThreadId) -> Result<()>;
}
