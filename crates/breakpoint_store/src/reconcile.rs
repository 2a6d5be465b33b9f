//! Diffing a client's desired breakpoint set against the mirrored table.
//!
//! The desired set replaces whatever the table held: anything not requested
//! is deleted, whoever created it. Requests that resolve to a location that
//! already holds a breakpoint reuse it, so identifiers survive repeated
//! requests and relocation collisions collapse into one breakpoint.

use crate::{
    actor::StoreContext, table::BreakpointTable, BackendLocation, Breakpoint, BreakpointError,
    BreakpointId, BreakpointLocation, BreakpointState, HitCondition, InsertBreakpoint, Origin,
    SourceLocation,
};
use dap::events::BreakpointEventReason;
use std::{collections::HashSet, path::Path, sync::Arc};

/// One entry of a desired set after resolution.
#[derive(Clone, Debug)]
pub(crate) struct Desired {
    pub location: BackendLocation,
    pub requested_line: Option<u32>,
    pub requested_column: Option<u32>,
    pub condition: Option<String>,
    pub hit_condition: Option<HitCondition>,
}

pub(crate) enum DesiredEntry {
    Resolved(Desired),
    /// Reported as a failed slot. `kept` is the location the entry resolved
    /// to before failing; a breakpoint already there survives the sync.
    Rejected {
        result: dap::Breakpoint,
        kept: Option<BackendLocation>,
    },
}

enum Slot {
    Placed { id: BreakpointId, location: BackendLocation },
    Failed(dap::Breakpoint),
}

pub(crate) async fn reconcile_source(
    path: &Arc<Path>,
    requests: &[dap::SourceBreakpoint],
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Vec<dap::Breakpoint> {
    let mut entries = Vec::with_capacity(requests.len());
    for request in requests {
        entries.push(resolve_source_entry(path, request, cx).await);
    }
    reconcile(entries, table, cx).await
}

async fn resolve_source_entry(
    path: &Arc<Path>,
    request: &dap::SourceBreakpoint,
    cx: &StoreContext,
) -> DesiredEntry {
    let rejected = |error: BreakpointError, kept: Option<BackendLocation>| {
        DesiredEntry::Rejected {
            result: dap::Breakpoint {
                verified: false,
                message: Some(error.to_string()),
                source: Some(dap::Source::from_path(path.to_string_lossy().into_owned())),
                line: Some(request.line),
                column: request.column,
                ..Default::default()
            },
            kept,
        }
    };

    if request.log_message.is_some() {
        return rejected(BreakpointError::LogMessageUnsupported, None);
    }

    let line = match cx
        .resolver
        .resolve_line(path, request.line, request.column)
        .await
    {
        Ok(line) => line,
        Err(error) => return rejected(error, None),
    };
    if line != request.line {
        log::debug!(
            "breakpoint at {}:{} relocated to line {line}",
            path.display(),
            request.line
        );
    }
    let location = BackendLocation::Source {
        path: path.clone(),
        line,
    };

    let hit_condition = match request
        .hit_condition
        .as_deref()
        .map(str::parse::<HitCondition>)
        .transpose()
    {
        Ok(hit_condition) => hit_condition,
        Err(error) => return rejected(error, Some(location)),
    };

    DesiredEntry::Resolved(Desired {
        location,
        requested_line: Some(request.line),
        requested_column: request.column,
        condition: request.condition.clone(),
        hit_condition,
    })
}

/// Applies a resolved desired set to `table` and returns one result per
/// entry, in entry order.
pub(crate) async fn reconcile(
    entries: Vec<DesiredEntry>,
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Vec<dap::Breakpoint> {
    let wanted: HashSet<BackendLocation> = entries
        .iter()
        .filter_map(|entry| match entry {
            DesiredEntry::Resolved(desired) => Some(desired.location.clone()),
            DesiredEntry::Rejected { kept, .. } => kept.clone(),
        })
        .collect();

    for id in table.not_at(&wanted) {
        delete(id, table, cx).await;
    }

    let mut slots = Vec::with_capacity(entries.len());
    for entry in entries {
        let slot = match entry {
            DesiredEntry::Resolved(desired) => match table.at(&desired.location) {
                Some(id) => reuse(id, &desired, table, cx).await,
                None => place(&desired, table, cx).await,
            },
            DesiredEntry::Rejected { result, .. } => Slot::Failed(result),
        };
        slots.push(slot);
    }

    slots
        .into_iter()
        .map(|slot| match slot {
            Slot::Placed { id, location } => table
                .get(id)
                .or_else(|| table.at(&location).and_then(|id| table.get(id)))
                .map(Breakpoint::to_dap)
                .unwrap_or_else(|| dap::Breakpoint {
                    verified: false,
                    message: Some(format!("breakpoint {id} was deleted")),
                    ..Default::default()
                }),
            Slot::Failed(failed) => failed,
        })
        .collect()
}

async fn reuse(
    id: BreakpointId,
    desired: &Desired,
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Slot {
    let Some(existing) = table.get(id) else {
        return place(desired, table, cx).await;
    };

    if existing.condition != desired.condition {
        cx.log_operation(format_args!(
            "set condition of {id} to {:?}",
            desired.condition
        ));
        if let Err(error) = cx
            .backend
            .set_condition(id, desired.condition.as_deref())
            .await
        {
            if BreakpointError::is_stale(&error) {
                // The backend lost it behind our back; place a fresh one.
                forget(id, table, cx);
                return place(desired, table, cx).await;
            }
            return Slot::Failed(dap::Breakpoint {
                id: Some(id.0),
                verified: false,
                message: Some(format!("{error:#}")),
                line: desired.requested_line,
                column: desired.requested_column,
                ..Default::default()
            });
        }
    }

    let Some(breakpoint) = table.get_mut(id) else {
        return place(desired, table, cx).await;
    };
    breakpoint.condition = desired.condition.clone();
    if breakpoint.hit_condition != desired.hit_condition {
        breakpoint.hit_condition = desired.hit_condition;
        breakpoint.hit_count = 0;
    }
    breakpoint.origin = Origin::Client;
    remember_request(breakpoint, &desired.location);
    if let BreakpointLocation::Source(source) = &mut breakpoint.location {
        if let Some(line) = desired.requested_line {
            source.requested_line = line;
        }
        source.requested_column = desired.requested_column;
    }

    Slot::Placed {
        id,
        location: desired.location.clone(),
    }
}

async fn place(desired: &Desired, table: &mut BreakpointTable, cx: &StoreContext) -> Slot {
    let kind = cx.settings.client_breakpoint_kind();
    cx.log_operation(format_args!("insert {kind:?} at {:?}", desired.location));
    let placed = cx
        .backend
        .insert_breakpoint(InsertBreakpoint {
            location: desired.location.clone(),
            condition: desired.condition.clone(),
            kind,
        })
        .await;

    let placed = match placed {
        Ok(placed) => placed,
        Err(error) => {
            log::warn!("failed to place breakpoint at {:?}: {error:#}", desired.location);
            let mut failed = dap::Breakpoint {
                verified: false,
                message: Some(format!("{error:#}")),
                line: desired.requested_line,
                column: desired.requested_column,
                ..Default::default()
            };
            match &desired.location {
                BackendLocation::Source { path, .. } => {
                    failed.source =
                        Some(dap::Source::from_path(path.to_string_lossy().into_owned()));
                }
                BackendLocation::Address(address) => {
                    failed.instruction_reference = Some(crate::format_address(*address));
                }
            }
            return Slot::Failed(failed);
        }
    };

    if cx.is_removed(placed.id) {
        log::debug!("breakpoint {} was deleted before its creation was confirmed", placed.id);
        return Slot::Failed(dap::Breakpoint {
            id: Some(placed.id.0),
            verified: false,
            message: Some(format!("breakpoint {} was deleted", placed.id)),
            line: desired.requested_line,
            column: desired.requested_column,
            ..Default::default()
        });
    }

    // The backend may relocate further than the resolver did. Landing on a
    // location that already holds a client breakpoint is a match.
    if placed.location != desired.location {
        if let Some(existing) = table.at(&placed.location) {
            if let Some(breakpoint) = table
                .get_mut(existing)
                .filter(|breakpoint| breakpoint.origin == Origin::Client)
            {
                remember_request(breakpoint, &desired.location);
                delete_in_backend(placed.id, cx).await;
                cx.forget(placed.id);
                return Slot::Placed {
                    id: existing,
                    location: placed.location,
                };
            }
        }
    }

    let location = match &placed.location {
        BackendLocation::Source { path, line } => BreakpointLocation::Source(SourceLocation {
            path: path.clone(),
            requested_line: desired.requested_line.unwrap_or(*line),
            requested_column: desired.requested_column,
            resolved_line: *line,
        }),
        BackendLocation::Address(address) => BreakpointLocation::Instruction { address: *address },
    };
    let breakpoint = Breakpoint {
        id: placed.id,
        location,
        condition: desired.condition.clone(),
        hit_condition: desired.hit_condition,
        kind,
        state: BreakpointState::from_backend(placed.pending, true),
        origin: Origin::Client,
        message: placed
            .pending
            .then(|| "breakpoint pending until the code is loaded".to_string()),
        hit_count: 0,
        requested_at: (placed.location != desired.location).then(|| desired.location.clone()),
    };
    cx.remember(&breakpoint);
    table.insert(breakpoint);

    Slot::Placed {
        id: placed.id,
        location: placed.location,
    }
}

/// Records where a request resolved to when the backend holds the breakpoint
/// elsewhere, so the next identical request finds it again.
fn remember_request(breakpoint: &mut Breakpoint, location: &BackendLocation) {
    if breakpoint.backend_location() != *location {
        breakpoint.requested_at = Some(location.clone());
    }
}

/// Deletes `id` from the backend and the mirror. Deleting a breakpoint the
/// client never asked for is reported so the client's view converges.
pub(crate) async fn delete(id: BreakpointId, table: &mut BreakpointTable, cx: &StoreContext) {
    delete_in_backend(id, cx).await;
    if let Some(breakpoint) = forget(id, table, cx) {
        if breakpoint.origin == Origin::Console {
            cx.emit_breakpoint(BreakpointEventReason::Removed, &breakpoint);
        }
    }
}

pub(crate) async fn delete_all(table: &mut BreakpointTable, cx: &StoreContext) {
    for id in table.ids() {
        delete_in_backend(id, cx).await;
        forget(id, table, cx);
    }
}

async fn delete_in_backend(id: BreakpointId, cx: &StoreContext) {
    cx.log_operation(format_args!("delete {id}"));
    if let Err(error) = cx.backend.delete_breakpoint(id).await {
        if BreakpointError::is_stale(&error) {
            log::debug!("breakpoint {id} was already gone from the backend");
        } else {
            log::error!("failed to delete breakpoint {id}: {error:#}");
        }
    }
}

fn forget(id: BreakpointId, table: &mut BreakpointTable, cx: &StoreContext) -> Option<Breakpoint> {
    cx.forget(id);
    table.remove(id)
}
