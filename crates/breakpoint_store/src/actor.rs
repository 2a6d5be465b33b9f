use crate::{
    console::{self, ConsoleCommand},
    instruction, reconcile, BackendLocation, BackendNotification, Breakpoint, BreakpointId,
    BreakpointSettings, DebuggerBackend, LocationResolver,
};
use anyhow::Result;
use dap::{
    events::{BreakpointEvent, BreakpointEventReason, OutputEvent},
    ThreadId,
};
use futures::{
    channel::{mpsc, oneshot},
    StreamExt as _,
};
use parking_lot::Mutex;
use smol::Task;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    path::Path,
    sync::Arc,
};

use crate::table::BreakpointTable;

/// Which slice of the mirrored table an actor owns.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Source(Arc<Path>),
    Instructions,
}

impl TableKey {
    pub fn for_location(location: &BackendLocation) -> Self {
        match location {
            BackendLocation::Source { path, .. } => TableKey::Source(path.clone()),
            BackendLocation::Address(_) => TableKey::Instructions,
        }
    }
}

/// How many deleted identifiers are remembered. Late records trail the
/// deletion by at most a few in-flight messages.
const TOMBSTONE_LIMIT: usize = 1024;

/// Routes backend identifiers to the actor that owns them, and remembers
/// recently deleted identifiers so a late creation record or create response
/// cannot bring them back.
#[derive(Debug, Default)]
pub(crate) struct BreakpointIndex {
    owners: HashMap<BreakpointId, TableKey>,
    removed: HashSet<BreakpointId>,
    removal_order: VecDeque<BreakpointId>,
}

impl BreakpointIndex {
    pub fn claim(&mut self, id: BreakpointId, key: TableKey) {
        self.owners.insert(id, key);
    }

    pub fn release(&mut self, id: BreakpointId) {
        self.owners.remove(&id);
        if !self.removed.insert(id) {
            return;
        }
        self.removal_order.push_back(id);
        if self.removal_order.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.removal_order.pop_front() {
                self.removed.remove(&oldest);
            }
        }
    }

    pub fn owner(&self, id: BreakpointId) -> Option<&TableKey> {
        self.owners.get(&id)
    }

    pub fn is_removed(&self, id: BreakpointId) -> bool {
        self.removed.contains(&id)
    }
}

/// State shared by every table actor of one debug session.
pub(crate) struct StoreContext {
    pub backend: Arc<dyn DebuggerBackend>,
    pub resolver: Arc<dyn LocationResolver>,
    pub settings: BreakpointSettings,
    pub index: Mutex<BreakpointIndex>,
    pub events: mpsc::UnboundedSender<dap::Event>,
}

impl StoreContext {
    pub fn log_operation(&self, operation: fmt::Arguments) {
        if self.settings.log_backend_operations {
            log::info!("backend: {operation}");
        } else {
            log::debug!("backend: {operation}");
        }
    }

    pub fn emit(&self, event: dap::Event) {
        if self.events.unbounded_send(event).is_err() {
            log::debug!("client event channel closed, dropping event");
        }
    }

    pub fn emit_breakpoint(&self, reason: BreakpointEventReason, breakpoint: &Breakpoint) {
        self.emit(dap::Event::Breakpoint(BreakpointEvent {
            reason,
            breakpoint: breakpoint.to_dap(),
        }));
    }

    /// Echoes a console-driven change in the backend's own record format.
    pub fn echo(&self, reason: BreakpointEventReason, breakpoint: &Breakpoint) {
        if !self.settings.echo_console_changes {
            return;
        }
        self.emit(dap::Event::Output(OutputEvent {
            output: console::format_record(reason, breakpoint),
            category: Some("console".into()),
            source: None,
            line: None,
        }));
    }

    pub fn remember(&self, breakpoint: &Breakpoint) {
        self.index.lock().claim(
            breakpoint.id,
            TableKey::for_location(&breakpoint.backend_location()),
        );
    }

    pub fn forget(&self, id: BreakpointId) {
        self.index.lock().release(id);
    }

    pub fn is_removed(&self, id: BreakpointId) -> bool {
        self.index.lock().is_removed(id)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitOutcome {
    Stop,
    Continue,
}

pub(crate) enum TableMessage {
    SetSourceBreakpoints {
        breakpoints: Vec<dap::SourceBreakpoint>,
        reply: oneshot::Sender<Vec<dap::Breakpoint>>,
    },
    SetInstructionBreakpoints {
        breakpoints: Vec<dap::InstructionBreakpoint>,
        reply: oneshot::Sender<Vec<dap::Breakpoint>>,
    },
    Notification(BackendNotification),
    Console {
        command: ConsoleCommand,
        reply: oneshot::Sender<Result<Option<Breakpoint>>>,
    },
    Hit {
        id: BreakpointId,
        thread_id: ThreadId,
        reply: oneshot::Sender<HitOutcome>,
    },
    Snapshot(oneshot::Sender<Vec<Breakpoint>>),
    Flush(oneshot::Sender<()>),
    Clear(oneshot::Sender<()>),
}

pub(crate) struct TableHandle {
    pub tx: mpsc::UnboundedSender<TableMessage>,
    _task: Task<()>,
}

/// Owns one slice of the mirrored table. Every mutation of that slice is a
/// message on the actor's queue, so a reconciliation and a console
/// notification for the same file are applied one after the other.
pub(crate) struct TableActor {
    key: TableKey,
    table: BreakpointTable,
    cx: Arc<StoreContext>,
}

impl TableActor {
    pub fn spawn(key: TableKey, cx: Arc<StoreContext>) -> TableHandle {
        let (tx, rx) = mpsc::unbounded();
        let actor = Self {
            key,
            table: BreakpointTable::default(),
            cx,
        };
        TableHandle {
            tx,
            _task: smol::spawn(actor.run(rx)),
        }
    }

    async fn run(mut self, mut messages: mpsc::UnboundedReceiver<TableMessage>) {
        while let Some(message) = messages.next().await {
            self.handle(message).await;
        }
        log::debug!("breakpoint table actor for {:?} stopped", self.key);
    }

    async fn handle(&mut self, message: TableMessage) {
        match message {
            TableMessage::SetSourceBreakpoints { breakpoints, reply } => {
                let TableKey::Source(path) = &self.key else {
                    log::error!("source breakpoints sent to the instruction table");
                    return;
                };
                let results =
                    reconcile::reconcile_source(path, &breakpoints, &mut self.table, &self.cx)
                        .await;
                reply.send(results).ok();
            }
            TableMessage::SetInstructionBreakpoints { breakpoints, reply } => {
                let results =
                    instruction::reconcile_instructions(&breakpoints, &mut self.table, &self.cx)
                        .await;
                reply.send(results).ok();
            }
            TableMessage::Notification(notification) => {
                console::fold_notification(notification, &mut self.table, &self.cx);
            }
            TableMessage::Console { command, reply } => {
                let result = console::apply_command(command, &mut self.table, &self.cx).await;
                reply.send(result).ok();
            }
            TableMessage::Hit {
                id,
                thread_id,
                reply,
            } => {
                let outcome = self.evaluate_hit(id, thread_id).await;
                reply.send(outcome).ok();
            }
            TableMessage::Snapshot(reply) => {
                reply.send(self.table.snapshot()).ok();
            }
            TableMessage::Flush(reply) => {
                reply.send(()).ok();
            }
            TableMessage::Clear(reply) => {
                reconcile::delete_all(&mut self.table, &self.cx).await;
                reply.send(()).ok();
            }
        }
    }

    async fn evaluate_hit(&mut self, id: BreakpointId, thread_id: ThreadId) -> HitOutcome {
        let Some(breakpoint) = self.table.get(id) else {
            log::debug!("hit on unknown breakpoint {id}, continuing");
            return HitOutcome::Continue;
        };
        if !breakpoint.enabled() {
            return HitOutcome::Continue;
        }

        if let Some(condition) = breakpoint.condition.clone() {
            match self.cx.backend.evaluate_condition(thread_id, &condition).await {
                Ok(true) => {}
                Ok(false) => return HitOutcome::Continue,
                Err(error) => {
                    log::warn!("failed to evaluate condition {condition:?} of breakpoint {id}: {error:#}");
                    return HitOutcome::Stop;
                }
            }
        }

        let Some(breakpoint) = self.table.get_mut(id) else {
            return HitOutcome::Continue;
        };
        breakpoint.hit_count += 1;
        match breakpoint.hit_condition {
            Some(hit_condition) if !hit_condition.is_satisfied(breakpoint.hit_count) => {
                HitOutcome::Continue
            }
            _ => HitOutcome::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_released_identifiers_are_tombstoned() {
        let mut index = BreakpointIndex::default();
        let key = TableKey::Instructions;
        index.claim(BreakpointId(1), key.clone());
        assert_eq!(index.owner(BreakpointId(1)), Some(&key));

        index.release(BreakpointId(1));
        index.release(BreakpointId(1));
        assert_eq!(index.owner(BreakpointId(1)), None);
        assert!(index.is_removed(BreakpointId(1)));
        assert_eq!(index.removal_order.len(), 1);
    }

    #[test]
    fn test_oldest_tombstones_are_dropped() {
        let mut index = BreakpointIndex::default();
        for id in 1..=TOMBSTONE_LIMIT as u64 + 10 {
            index.release(BreakpointId(id));
        }
        assert_eq!(index.removed.len(), TOMBSTONE_LIMIT);
        assert_eq!(index.removal_order.len(), TOMBSTONE_LIMIT);
        assert!(!index.is_removed(BreakpointId(10)));
        assert!(index.is_removed(BreakpointId(11)));
        assert!(index.is_removed(BreakpointId(TOMBSTONE_LIMIT as u64 + 10)));
    }
}
