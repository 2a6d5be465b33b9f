use crate::{BackendLocation, HitCondition};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, sync::Arc};

/// Identifier assigned by the debugger backend. The store never mints these.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct BreakpointId(pub u64);

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which channel most recently asserted that a breakpoint should exist.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    Client,
    Console,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKind {
    #[default]
    Software,
    Hardware,
}

impl BreakpointKind {
    /// The `type` field the backend prints in its breakpoint records.
    pub fn record_type(&self) -> &'static str {
        match self {
            BreakpointKind::Software => "breakpoint",
            BreakpointKind::Hardware => "hw breakpoint",
        }
    }
}

/// `Removed` is not represented: a removed breakpoint leaves the table.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BreakpointState {
    Pending,
    Verified,
    Disabled,
}

impl BreakpointState {
    pub fn from_backend(pending: bool, enabled: bool) -> Self {
        if pending {
            BreakpointState::Pending
        } else if enabled {
            BreakpointState::Verified
        } else {
            BreakpointState::Disabled
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: Arc<Path>,
    pub requested_line: u32,
    pub requested_column: Option<u32>,
    pub resolved_line: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakpointLocation {
    Source(SourceLocation),
    Instruction { address: u64 },
}

/// A breakpoint as mirrored from the backend's table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub location: BreakpointLocation,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
    pub kind: BreakpointKind,
    pub state: BreakpointState,
    pub origin: Origin,
    pub message: Option<String>,
    pub hit_count: u64,
    /// Where the client's request resolved to, when the backend placed the
    /// breakpoint somewhere else.
    pub requested_at: Option<BackendLocation>,
}

impl Breakpoint {
    pub fn verified(&self) -> bool {
        self.state != BreakpointState::Pending
    }

    pub fn enabled(&self) -> bool {
        self.state == BreakpointState::Verified
    }

    pub fn path(&self) -> Option<&Arc<Path>> {
        match &self.location {
            BreakpointLocation::Source(source) => Some(&source.path),
            BreakpointLocation::Instruction { .. } => None,
        }
    }

    pub fn resolved_line(&self) -> Option<u32> {
        match &self.location {
            BreakpointLocation::Source(source) => Some(source.resolved_line),
            BreakpointLocation::Instruction { .. } => None,
        }
    }

    pub fn address(&self) -> Option<u64> {
        match self.location {
            BreakpointLocation::Source(_) => None,
            BreakpointLocation::Instruction { address } => Some(address),
        }
    }

    pub fn backend_location(&self) -> BackendLocation {
        match &self.location {
            BreakpointLocation::Source(source) => BackendLocation::Source {
                path: source.path.clone(),
                line: source.resolved_line,
            },
            BreakpointLocation::Instruction { address } => BackendLocation::Address(*address),
        }
    }

    /// Whether a request resolving to `location` is answered by this
    /// breakpoint.
    pub fn is_at(&self, location: &BackendLocation) -> bool {
        self.backend_location() == *location || self.requested_at.as_ref() == Some(location)
    }

    pub fn to_dap(&self) -> dap::Breakpoint {
        let mut breakpoint = dap::Breakpoint {
            id: Some(self.id.0),
            verified: self.verified(),
            message: self.message.clone(),
            ..Default::default()
        };
        match &self.location {
            BreakpointLocation::Source(source) => {
                breakpoint.source = Some(dap::Source::from_path(
                    source.path.to_string_lossy().into_owned(),
                ));
                breakpoint.line = Some(source.resolved_line);
                breakpoint.column = source.requested_column;
            }
            BreakpointLocation::Instruction { address } => {
                breakpoint.instruction_reference = Some(format_address(*address));
            }
        }
        breakpoint
    }
}

pub fn format_address(address: u64) -> String {
    format!("{address:#x}")
}
