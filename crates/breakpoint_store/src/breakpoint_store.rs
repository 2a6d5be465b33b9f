//! Keeps the client's breakpoints, the ones typed into the debugger console and
//! the backend's own breakpoint table in agreement.
//!
//! Each source file, plus one table for instruction breakpoints, is owned by a
//! sequential actor. Set requests, backend notifications, console commands and
//! hit reports for a file are queued on its actor, so they never interleave.

mod actor;
mod backend;
mod breakpoint;
mod console;
mod error;
#[cfg(any(test, feature = "test-support"))]
mod fake;
mod hit_condition;
mod instruction;
mod reconcile;
mod resolver;
mod settings;
mod table;

#[cfg(test)]
mod breakpoint_store_tests;

pub use actor::HitOutcome;
pub use backend::{
    BackendLocation, BackendNotification, BreakpointSnapshot, DebuggerBackend, InsertBreakpoint,
    PlacedBreakpoint,
};
pub use breakpoint::{
    format_address, Breakpoint, BreakpointId, BreakpointKind, BreakpointLocation,
    BreakpointState, Origin, SourceLocation,
};
pub use console::{format_record, ConsoleCommand};
pub use error::BreakpointError;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeBackend, FakeBreakpoint, FakeOperation};
pub use hit_condition::HitCondition;
pub use instruction::parse_instruction_reference;
pub use resolver::{LineTable, LocationResolver};
pub use settings::BreakpointSettings;

use actor::{BreakpointIndex, StoreContext, TableActor, TableHandle, TableKey, TableMessage};
use anyhow::{anyhow, Context as _, Result};
use dap::{
    events::StoppedEvent,
    requests::{
        SetBreakpointsArguments, SetBreakpointsResponse, SetInstructionBreakpointsArguments,
        SetInstructionBreakpointsResponse,
    },
    Capabilities, ThreadId,
};
use futures::{
    channel::{mpsc, oneshot},
    future, Future,
};
use parking_lot::Mutex;
use std::{collections::HashMap, path::Path, sync::Arc};

pub struct BreakpointStore {
    cx: Arc<StoreContext>,
    tables: Mutex<Option<HashMap<TableKey, TableHandle>>>,
}

impl BreakpointStore {
    /// Creates a store for one debug session. Events for the client are
    /// delivered on the returned receiver in the order they were produced.
    pub fn new(
        backend: Arc<dyn DebuggerBackend>,
        resolver: Arc<dyn LocationResolver>,
        settings: BreakpointSettings,
    ) -> (Self, mpsc::UnboundedReceiver<dap::Event>) {
        let (events_tx, events_rx) = mpsc::unbounded();
        let cx = Arc::new(StoreContext {
            backend,
            resolver,
            settings,
            index: Mutex::new(BreakpointIndex::default()),
            events: events_tx,
        });
        let store = Self {
            cx,
            tables: Mutex::new(Some(HashMap::default())),
        };
        (store, events_rx)
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            supports_configuration_done_request: Some(true),
            supports_conditional_breakpoints: Some(true),
            supports_hit_conditional_breakpoints: Some(true),
            supports_instruction_breakpoints: Some(true),
        }
    }

    pub fn settings(&self) -> &BreakpointSettings {
        &self.cx.settings
    }

    /// Replaces the breakpoints of one source file with the requested set.
    ///
    /// The request is queued before this returns, so requests are applied in
    /// call order even if the returned futures are polled out of order.
    pub fn set_breakpoints(
        &self,
        arguments: SetBreakpointsArguments,
    ) -> impl Future<Output = Result<SetBreakpointsResponse>> {
        let requested = arguments.breakpoints.unwrap_or_default();
        let reply = match arguments.source.path.as_deref() {
            Some(path) => self
                .request(TableKey::Source(Path::new(path).into()), |reply| {
                    TableMessage::SetSourceBreakpoints {
                        breakpoints: requested,
                        reply,
                    }
                })
                .map(Ok),
            None => Ok(Err(requested
                .iter()
                .map(|breakpoint| dap::Breakpoint {
                    verified: false,
                    message: Some("breakpoints need a source with a path".into()),
                    line: Some(breakpoint.line),
                    column: breakpoint.column,
                    ..Default::default()
                })
                .collect::<Vec<_>>())),
        };

        async move {
            let breakpoints = match reply? {
                Ok(reply) => reply.await.context("breakpoint table stopped")?,
                Err(unsupported) => unsupported,
            };
            Ok(SetBreakpointsResponse { breakpoints })
        }
    }

    /// Replaces every instruction breakpoint with the requested set.
    pub fn set_instruction_breakpoints(
        &self,
        arguments: SetInstructionBreakpointsArguments,
    ) -> impl Future<Output = Result<SetInstructionBreakpointsResponse>> {
        let reply = self.request(TableKey::Instructions, |reply| {
            TableMessage::SetInstructionBreakpoints {
                breakpoints: arguments.breakpoints,
                reply,
            }
        });
        async move {
            let breakpoints = reply?.await.context("breakpoint table stopped")?;
            Ok(SetInstructionBreakpointsResponse { breakpoints })
        }
    }

    /// Routes a change the backend made on its own to the table that owns the
    /// breakpoint.
    pub fn handle_notification(&self, notification: BackendNotification) -> Result<()> {
        let id = notification.id();
        let owner = self.cx.index.lock().owner(id).cloned();
        let key = owner.or_else(|| match &notification {
            BackendNotification::New(snapshot) | BackendNotification::Changed(snapshot) => {
                snapshot.location.as_ref().map(TableKey::for_location)
            }
            BackendNotification::Removed(_) => None,
        });

        match key {
            Some(key) => {
                let tx = self.table(key)?;
                tx.unbounded_send(TableMessage::Notification(notification))
                    .map_err(|_| anyhow!("breakpoint table stopped"))
            }
            None => {
                if let BackendNotification::Removed(id) = notification {
                    // Remember it in case its creation is still in flight.
                    log::debug!("breakpoint {id} removed before it was mirrored");
                    self.cx.forget(id);
                } else {
                    log::warn!("ignoring record for breakpoint {id} without a location");
                }
                Ok(())
            }
        }
    }

    /// Applies a breakpoint command typed into the debugger console. Commands
    /// naming an unknown breakpoint are ignored and yield `None`.
    pub fn console_command(
        &self,
        command: ConsoleCommand,
    ) -> impl Future<Output = Result<Option<Breakpoint>>> {
        let key = match &command {
            ConsoleCommand::Create { path, .. } => Some(TableKey::Source(path.as_path().into())),
            command => command
                .id()
                .and_then(|id| self.cx.index.lock().owner(id).cloned()),
        };
        let reply = key
            .map(|key| self.request(key, |reply| TableMessage::Console { command, reply }))
            .transpose();

        async move {
            match reply? {
                Some(reply) => reply.await.context("breakpoint table stopped")?,
                None => Ok(None),
            }
        }
    }

    /// Decides whether a trap reported by the backend should stop the thread.
    ///
    /// A stop is reported to the client as a `stopped` event; otherwise the
    /// thread is resumed right away.
    pub fn breakpoint_hit(
        &self,
        id: BreakpointId,
        thread_id: ThreadId,
    ) -> impl Future<Output = Result<HitOutcome>> {
        let owner = self.cx.index.lock().owner(id).cloned();
        let reply = owner
            .map(|key| {
                self.request(key, |reply| TableMessage::Hit {
                    id,
                    thread_id,
                    reply,
                })
            })
            .transpose();
        let cx = self.cx.clone();

        async move {
            let outcome = match reply? {
                Some(reply) => reply.await.context("breakpoint table stopped")?,
                None => {
                    log::debug!("hit on unknown breakpoint {id}, continuing");
                    HitOutcome::Continue
                }
            };
            match outcome {
                HitOutcome::Stop => cx.emit(dap::Event::Stopped(StoppedEvent {
                    reason: "breakpoint".into(),
                    description: None,
                    thread_id: Some(thread_id),
                    all_threads_stopped: Some(true),
                    hit_breakpoint_ids: Some(vec![id.0]),
                })),
                HitOutcome::Continue => cx.backend.resume(thread_id).await?,
            }
            Ok(outcome)
        }
    }

    /// Resolves once every operation queued before this call has been applied.
    pub fn flush(&self) -> impl Future<Output = Result<()>> {
        let replies = self.broadcast(TableMessage::Flush);
        async move {
            future::try_join_all(replies?)
                .await
                .context("breakpoint table stopped")?;
            Ok(())
        }
    }

    /// Forwards `configurationDone` once every breakpoint request sent before
    /// it has reached the backend.
    pub fn configuration_done(&self) -> impl Future<Output = Result<()>> {
        let flush = self.flush();
        let cx = self.cx.clone();
        async move {
            flush.await?;
            cx.log_operation(format_args!("configuration done"));
            cx.backend.configuration_done().await
        }
    }

    pub fn resume(&self, thread_id: ThreadId) -> impl Future<Output = Result<()>> {
        let flush = self.flush();
        let cx = self.cx.clone();
        async move {
            flush.await?;
            cx.log_operation(format_args!("resume thread {thread_id}"));
            cx.backend.resume(thread_id).await
        }
    }

    /// Every mirrored breakpoint, ordered by identifier.
    pub fn breakpoints(&self) -> impl Future<Output = Result<Vec<Breakpoint>>> {
        let replies = self.broadcast(TableMessage::Snapshot);
        async move {
            let mut breakpoints = future::try_join_all(replies?)
                .await
                .context("breakpoint table stopped")?
                .into_iter()
                .flatten()
                .collect::<Vec<_>>();
            breakpoints.sort_by_key(|breakpoint| breakpoint.id);
            Ok(breakpoints)
        }
    }

    /// Deletes every breakpoint from the backend and stops the table actors.
    /// Later requests fail.
    pub fn shutdown(&self) -> impl Future<Output = Result<()>> {
        let tables = self.tables.lock().take().unwrap_or_default();
        let replies = tables
            .values()
            .filter_map(|handle| {
                let (tx, rx) = oneshot::channel();
                handle.tx.unbounded_send(TableMessage::Clear(tx)).ok()?;
                Some(rx)
            })
            .collect::<Vec<_>>();

        async move {
            let result = future::try_join_all(replies).await;
            drop(tables);
            result.context("breakpoint table stopped")?;
            Ok(())
        }
    }

    fn table(&self, key: TableKey) -> Result<mpsc::UnboundedSender<TableMessage>> {
        let mut tables = self.tables.lock();
        let tables = tables
            .as_mut()
            .ok_or_else(|| anyhow!("breakpoint store has shut down"))?;
        let handle = tables
            .entry(key.clone())
            .or_insert_with(|| TableActor::spawn(key, self.cx.clone()));
        Ok(handle.tx.clone())
    }

    fn request<T>(
        &self,
        key: TableKey,
        message: impl FnOnce(oneshot::Sender<T>) -> TableMessage,
    ) -> Result<oneshot::Receiver<T>> {
        let (tx, rx) = oneshot::channel();
        self.table(key)?
            .unbounded_send(message(tx))
            .map_err(|_| anyhow!("breakpoint table stopped"))?;
        Ok(rx)
    }

    fn broadcast<T>(
        &self,
        message: impl Fn(oneshot::Sender<T>) -> TableMessage,
    ) -> Result<Vec<oneshot::Receiver<T>>> {
        let tables = self.tables.lock();
        let tables = tables
            .as_ref()
            .ok_or_else(|| anyhow!("breakpoint store has shut down"))?;
        tables
            .values()
            .map(|handle| {
                let (tx, rx) = oneshot::channel();
                handle
                    .tx
                    .unbounded_send(message(tx))
                    .map_err(|_| anyhow!("breakpoint table stopped"))?;
                Ok(rx)
            })
            .collect()
    }
}
