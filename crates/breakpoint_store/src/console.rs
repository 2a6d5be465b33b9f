use crate::{
    actor::StoreContext, table::BreakpointTable, BackendLocation, BackendNotification,
    Breakpoint, BreakpointError, BreakpointId, BreakpointKind, BreakpointLocation,
    BreakpointSnapshot, BreakpointState, InsertBreakpoint, Origin, SourceLocation,
};
use anyhow::Result;
use dap::events::BreakpointEventReason;
use std::{fmt::Write as _, path::PathBuf};

/// A breakpoint command typed into the backend console, already parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Create {
        path: PathBuf,
        line: u32,
        condition: Option<String>,
        kind: BreakpointKind,
    },
    Enable(BreakpointId),
    Disable(BreakpointId),
    Delete(BreakpointId),
}

impl ConsoleCommand {
    pub fn id(&self) -> Option<BreakpointId> {
        match self {
            ConsoleCommand::Create { .. } => None,
            ConsoleCommand::Enable(id)
            | ConsoleCommand::Disable(id)
            | ConsoleCommand::Delete(id) => Some(*id),
        }
    }
}

pub(crate) async fn apply_command(
    command: ConsoleCommand,
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Result<Option<Breakpoint>> {
    match command {
        ConsoleCommand::Create {
            path,
            line,
            condition,
            kind,
        } => {
            let resolved = cx.resolver.resolve_line(&path, line, None).await?;
            cx.log_operation(format_args!(
                "console insert {kind:?} at {}:{resolved}",
                path.display()
            ));
            let placed = cx
                .backend
                .insert_breakpoint(InsertBreakpoint {
                    location: BackendLocation::Source {
                        path: path.into(),
                        line: resolved,
                    },
                    condition: condition.clone(),
                    kind,
                })
                .await?;
            let snapshot = BreakpointSnapshot {
                id: placed.id,
                location: Some(placed.location),
                condition,
                kind,
                enabled: true,
                pending: placed.pending,
            };
            fold_notification(BackendNotification::New(snapshot), table, cx);
            Ok(table.get(placed.id).cloned())
        }
        ConsoleCommand::Enable(id) => set_enabled(id, true, table, cx).await,
        ConsoleCommand::Disable(id) => set_enabled(id, false, table, cx).await,
        ConsoleCommand::Delete(id) => {
            if table.get(id).is_none() {
                log::debug!("ignoring console delete of unknown breakpoint {id}");
                return Ok(None);
            }
            cx.log_operation(format_args!("console delete {id}"));
            if let Err(error) = cx.backend.delete_breakpoint(id).await {
                if !BreakpointError::is_stale(&error) {
                    return Err(error);
                }
            }
            fold_notification(BackendNotification::Removed(id), table, cx);
            Ok(None)
        }
    }
}

async fn set_enabled(
    id: BreakpointId,
    enabled: bool,
    table: &mut BreakpointTable,
    cx: &StoreContext,
) -> Result<Option<Breakpoint>> {
    if table.get(id).is_none() {
        log::debug!("ignoring console command for unknown breakpoint {id}");
        return Ok(None);
    }
    cx.log_operation(format_args!("set {id} enabled={enabled}"));
    if let Err(error) = cx.backend.set_enabled(id, enabled).await {
        if BreakpointError::is_stale(&error) {
            fold_notification(BackendNotification::Removed(id), table, cx);
            return Ok(None);
        }
        return Err(error);
    }

    let Some(breakpoint) = table.get_mut(id) else {
        return Ok(None);
    };
    let state = match breakpoint.state {
        BreakpointState::Pending => BreakpointState::Pending,
        _ => BreakpointState::from_backend(false, enabled),
    };
    if breakpoint.state != state {
        breakpoint.state = state;
        breakpoint.origin = Origin::Console;
        let breakpoint = breakpoint.clone();
        cx.emit_breakpoint(BreakpointEventReason::Changed, &breakpoint);
        cx.echo(BreakpointEventReason::Changed, &breakpoint);
    }
    Ok(table.get(id).cloned())
}

/// Folds a backend notification into the table and tells the client.
pub(crate) fn fold_notification(
    notification: BackendNotification,
    table: &mut BreakpointTable,
    cx: &StoreContext,
) {
    match notification {
        BackendNotification::New(snapshot) | BackendNotification::Changed(snapshot) => {
            if cx.is_removed(snapshot.id) {
                log::debug!("ignoring record for deleted breakpoint {}", snapshot.id);
                return;
            }
            match table.get_mut(snapshot.id) {
                Some(existing) => {
                    if apply_snapshot(existing, &snapshot) {
                        let breakpoint = existing.clone();
                        cx.emit_breakpoint(BreakpointEventReason::Changed, &breakpoint);
                        cx.echo(BreakpointEventReason::Changed, &breakpoint);
                    }
                }
                None => {
                    let Some(breakpoint) = breakpoint_from_snapshot(&snapshot) else {
                        log::warn!(
                            "breakpoint {} changed in the backend but has no location",
                            snapshot.id
                        );
                        return;
                    };
                    cx.remember(&breakpoint);
                    cx.emit_breakpoint(BreakpointEventReason::New, &breakpoint);
                    cx.echo(BreakpointEventReason::New, &breakpoint);
                    table.insert(breakpoint);
                }
            }
        }
        BackendNotification::Removed(id) => {
            cx.forget(id);
            match table.remove(id) {
                Some(breakpoint) => {
                    cx.emit_breakpoint(BreakpointEventReason::Removed, &breakpoint);
                    cx.echo(BreakpointEventReason::Removed, &breakpoint);
                }
                None => log::debug!("breakpoint {id} already removed"),
            }
        }
    }
}

fn breakpoint_from_snapshot(snapshot: &BreakpointSnapshot) -> Option<Breakpoint> {
    let location = match snapshot.location.clone()? {
        BackendLocation::Source { path, line } => BreakpointLocation::Source(SourceLocation {
            path,
            requested_line: line,
            requested_column: None,
            resolved_line: line,
        }),
        BackendLocation::Address(address) => BreakpointLocation::Instruction { address },
    };
    Some(Breakpoint {
        id: snapshot.id,
        location,
        condition: snapshot.condition.clone(),
        hit_condition: None,
        kind: snapshot.kind,
        state: BreakpointState::from_backend(snapshot.pending, snapshot.enabled),
        origin: Origin::Console,
        message: snapshot
            .pending
            .then(|| "breakpoint pending until the code is loaded".to_string()),
        hit_count: 0,
        requested_at: None,
    })
}

/// Returns whether anything the client can observe changed.
fn apply_snapshot(breakpoint: &mut Breakpoint, snapshot: &BreakpointSnapshot) -> bool {
    let before = breakpoint.clone();

    if let Some(location) = &snapshot.location {
        match (&mut breakpoint.location, location) {
            (BreakpointLocation::Source(source), BackendLocation::Source { line, .. }) => {
                source.resolved_line = *line;
            }
            (BreakpointLocation::Instruction { address }, BackendLocation::Address(new)) => {
                *address = *new;
            }
            _ => log::warn!(
                "breakpoint {} changed between source and instruction form",
                breakpoint.id
            ),
        }
    }
    breakpoint.condition = snapshot.condition.clone();
    breakpoint.kind = snapshot.kind;
    breakpoint.state = BreakpointState::from_backend(snapshot.pending, snapshot.enabled);
    if !snapshot.pending {
        breakpoint.message = None;
    }

    let changed = *breakpoint != before;
    if changed {
        breakpoint.origin = Origin::Console;
    }
    changed
}

/// Formats a change the way the backend reports it on its own console, so
/// client-side consoles show the familiar record.
pub fn format_record(reason: BreakpointEventReason, breakpoint: &Breakpoint) -> String {
    let mut record = String::new();
    match reason {
        BreakpointEventReason::Removed => {
            write!(record, "=breakpoint-deleted,id=\"{}\"", breakpoint.id).ok();
        }
        BreakpointEventReason::New | BreakpointEventReason::Changed => {
            let prefix = if reason == BreakpointEventReason::New {
                "=breakpoint-created"
            } else {
                "=breakpoint-modified"
            };
            write!(
                record,
                "{prefix},bkpt={{number=\"{}\",type=\"{}\",disp=\"keep\",enabled=\"{}\"",
                breakpoint.id,
                breakpoint.kind.record_type(),
                if breakpoint.state == BreakpointState::Disabled {
                    "n"
                } else {
                    "y"
                },
            )
            .ok();
            match &breakpoint.location {
                _ if breakpoint.state == BreakpointState::Pending => {
                    record.push_str(",addr=\"<PENDING>\"");
                }
                BreakpointLocation::Source(source) => {
                    let name = source
                        .path
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    write!(
                        record,
                        ",file=\"{}\",fullname=\"{}\",line=\"{}\"",
                        escape(&name),
                        escape(&source.path.to_string_lossy()),
                        source.resolved_line
                    )
                    .ok();
                }
                BreakpointLocation::Instruction { address } => {
                    write!(record, ",addr=\"{}\"", crate::format_address(*address)).ok();
                }
            }
            if let Some(condition) = &breakpoint.condition {
                write!(record, ",cond=\"{}\"", escape(condition)).ok();
            }
            write!(record, ",times=\"{}\"}}", breakpoint.hit_count).ok();
        }
    }
    record.push('\n');
    record
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn console_breakpoint(kind: BreakpointKind, state: BreakpointState) -> Breakpoint {
        Breakpoint {
            id: BreakpointId(2),
            location: BreakpointLocation::Source(SourceLocation {
                path: Path::new("/work/my dir/count.c").into(),
                requested_line: 4,
                requested_column: None,
                resolved_line: 4,
            }),
            condition: Some("count == \"x\"".into()),
            hit_condition: None,
            kind,
            state,
            origin: Origin::Console,
            message: None,
            hit_count: 0,
            requested_at: None,
        }
    }

    #[test]
    fn test_created_record() {
        let breakpoint = console_breakpoint(BreakpointKind::Software, BreakpointState::Verified);
        assert_eq!(
            format_record(BreakpointEventReason::New, &breakpoint),
            "=breakpoint-created,bkpt={number=\"2\",type=\"breakpoint\",disp=\"keep\",\
             enabled=\"y\",file=\"count.c\",fullname=\"/work/my dir/count.c\",line=\"4\",\
             cond=\"count == \\\"x\\\"\",times=\"0\"}\n"
        );
    }

    #[test]
    fn test_hardware_record_type() {
        let breakpoint = console_breakpoint(BreakpointKind::Hardware, BreakpointState::Disabled);
        let record = format_record(BreakpointEventReason::Changed, &breakpoint);
        assert!(record.starts_with("=breakpoint-modified,"));
        assert!(record.contains("type=\"hw breakpoint\""));
        assert!(record.contains("enabled=\"n\""));
    }

    #[test]
    fn test_deleted_and_pending_records() {
        let breakpoint = console_breakpoint(BreakpointKind::Software, BreakpointState::Pending);
        assert_eq!(
            format_record(BreakpointEventReason::Removed, &breakpoint),
            "=breakpoint-deleted,id=\"2\"\n"
        );
        assert!(format_record(BreakpointEventReason::New, &breakpoint)
            .contains("addr=\"<PENDING>\""));
    }

    #[test]
    fn test_snapshot_without_changes_is_quiet() {
        let mut breakpoint =
            console_breakpoint(BreakpointKind::Software, BreakpointState::Verified);
        breakpoint.origin = Origin::Client;
        let snapshot = BreakpointSnapshot {
            id: breakpoint.id,
            location: Some(breakpoint.backend_location()),
            condition: breakpoint.condition.clone(),
            kind: breakpoint.kind,
            enabled: true,
            pending: false,
        };
        assert!(!apply_snapshot(&mut breakpoint, &snapshot));
        assert_eq!(breakpoint.origin, Origin::Client);

        let disabled = BreakpointSnapshot {
            enabled: false,
            ..snapshot
        };
        assert!(apply_snapshot(&mut breakpoint, &disabled));
        assert_eq!(breakpoint.state, BreakpointState::Disabled);
        assert_eq!(breakpoint.origin, Origin::Console);
    }
}
