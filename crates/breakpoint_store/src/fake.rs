use crate::{
    BackendLocation, BreakpointError, BreakpointId, DebuggerBackend, InsertBreakpoint, LineTable,
    LocationResolver, PlacedBreakpoint,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dap::ThreadId;
use futures::{
    channel::{mpsc, oneshot},
    future::Shared,
    FutureExt as _,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering::SeqCst},
};

/// An in-memory debugger backend driven by a [`LineTable`]. It also acts as
/// the location resolver, so tests can share one instance for both seams.
pub struct FakeBackend {
    lines: LineTable,
    next_id: AtomicU64,
    state: Mutex<FakeBackendState>,
    insert_gate: Mutex<Option<InsertGate>>,
}

/// Holds inserts back until the test opens it.
struct InsertGate {
    reached: mpsc::UnboundedSender<BackendLocation>,
    opened: Shared<oneshot::Receiver<()>>,
    _open: oneshot::Sender<()>,
}

#[derive(Default)]
struct FakeBackendState {
    placed: BTreeMap<BreakpointId, FakeBreakpoint>,
    operations: Vec<FakeOperation>,
    rejected: HashSet<BackendLocation>,
    relocations: HashMap<BackendLocation, BackendLocation>,
    pending_files: HashSet<PathBuf>,
    variables: HashMap<String, i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeBreakpoint {
    pub location: BackendLocation,
    pub condition: Option<String>,
    pub enabled: bool,
    pub insert: InsertBreakpoint,
}

/// Every call the store made, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeOperation {
    Insert(BackendLocation),
    SetCondition(BreakpointId, Option<String>),
    SetEnabled(BreakpointId, bool),
    Delete(BreakpointId),
    ConfigurationDone,
    Resume(ThreadId),
}

impl FakeBackend {
    pub fn new(lines: LineTable) -> Self {
        Self {
            lines,
            next_id: AtomicU64::new(1),
            state: Default::default(),
            insert_gate: Default::default(),
        }
    }

    pub fn reject_line(&self, path: impl AsRef<Path>, line: u32) {
        self.state.lock().rejected.insert(BackendLocation::Source {
            path: path.as_ref().into(),
            line,
        });
    }

    /// Makes the backend place breakpoints requested at `from` at `to`.
    pub fn relocate(&self, from: BackendLocation, to: BackendLocation) {
        self.state.lock().relocations.insert(from, to);
    }

    /// Breakpoints in `path` are placed but stay pending, as if the shared
    /// library holding it were not loaded yet.
    pub fn defer_file(&self, path: impl Into<PathBuf>) {
        self.state.lock().pending_files.insert(path.into());
    }

    pub fn set_variable(&self, name: &str, value: i64) {
        self.state.lock().variables.insert(name.to_string(), value);
    }

    /// Makes every insert wait until [`Self::resume_inserts`] is called. Each
    /// waiting insert reports its location on the returned channel.
    pub fn pause_inserts(&self) -> mpsc::UnboundedReceiver<BackendLocation> {
        let (reached, reached_rx) = mpsc::unbounded();
        let (open, opened) = oneshot::channel();
        *self.insert_gate.lock() = Some(InsertGate {
            reached,
            opened: opened.shared(),
            _open: open,
        });
        reached_rx
    }

    pub fn resume_inserts(&self) {
        self.insert_gate.lock().take();
    }

    /// Drops a breakpoint without telling anyone, as a backend restart would.
    pub fn lose_breakpoint(&self, id: BreakpointId) {
        self.state.lock().placed.remove(&id);
    }

    /// Mints an identifier the way an insert from the console would.
    pub fn next_id(&self) -> BreakpointId {
        BreakpointId(self.next_id.fetch_add(1, SeqCst))
    }

    pub fn placed(&self) -> BTreeMap<BreakpointId, FakeBreakpoint> {
        self.state.lock().placed.clone()
    }

    pub fn operations(&self) -> Vec<FakeOperation> {
        self.state.lock().operations.clone()
    }

    pub fn take_operations(&self) -> Vec<FakeOperation> {
        std::mem::take(&mut self.state.lock().operations)
    }

    fn evaluate(&self, expression: &str) -> Result<bool> {
        let state = self.state.lock();
        let mut parts = expression.split_whitespace();
        let (Some(name), Some(operator), Some(value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(anyhow!("cannot evaluate {expression:?}"));
        };
        let left = *state
            .variables
            .get(name)
            .ok_or_else(|| anyhow!("No symbol \"{name}\" in current context."))?;
        let right: i64 = value.parse()?;
        Ok(match operator {
            "==" => left == right,
            "!=" => left != right,
            "<" => left < right,
            "<=" => left <= right,
            ">" => left > right,
            ">=" => left >= right,
            _ => return Err(anyhow!("unknown operator {operator:?}")),
        })
    }
}

#[async_trait]
impl DebuggerBackend for FakeBackend {
    async fn insert_breakpoint(&self, request: InsertBreakpoint) -> Result<PlacedBreakpoint> {
        let gate = self.insert_gate.lock().as_ref().map(|gate| {
            gate.reached.unbounded_send(request.location.clone()).ok();
            gate.opened.clone()
        });
        if let Some(opened) = gate {
            // Resolves once `resume_inserts` drops the sender.
            opened.await.ok();
        }

        let mut state = self.state.lock();
        state
            .operations
            .push(FakeOperation::Insert(request.location.clone()));
        if state.rejected.contains(&request.location) {
            return Err(BreakpointError::BackendRejected(format!(
                "Cannot insert breakpoint at {:?}",
                request.location
            ))
            .into());
        }

        let location = state
            .relocations
            .get(&request.location)
            .cloned()
            .unwrap_or_else(|| request.location.clone());
        let pending = match &location {
            BackendLocation::Source { path, .. } => state.pending_files.contains(&**path),
            BackendLocation::Address(_) => false,
        };
        let id = self.next_id();
        state.placed.insert(
            id,
            FakeBreakpoint {
                location: location.clone(),
                condition: request.condition.clone(),
                enabled: true,
                insert: request,
            },
        );
        Ok(PlacedBreakpoint {
            id,
            location,
            pending,
        })
    }

    async fn set_condition(&self, id: BreakpointId, condition: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        state
            .operations
            .push(FakeOperation::SetCondition(id, condition.map(str::to_string)));
        let breakpoint = state
            .placed
            .get_mut(&id)
            .ok_or(BreakpointError::StaleIdentifier(id))?;
        breakpoint.condition = condition.map(str::to_string);
        Ok(())
    }

    async fn set_enabled(&self, id: BreakpointId, enabled: bool) -> Result<()> {
        let mut state = self.state.lock();
        state.operations.push(FakeOperation::SetEnabled(id, enabled));
        let breakpoint = state
            .placed
            .get_mut(&id)
            .ok_or(BreakpointError::StaleIdentifier(id))?;
        breakpoint.enabled = enabled;
        Ok(())
    }

    async fn delete_breakpoint(&self, id: BreakpointId) -> Result<()> {
        let mut state = self.state.lock();
        state.operations.push(FakeOperation::Delete(id));
        state
            .placed
            .remove(&id)
            .ok_or(BreakpointError::StaleIdentifier(id))?;
        Ok(())
    }

    async fn evaluate_condition(&self, _thread_id: ThreadId, expression: &str) -> Result<bool> {
        self.evaluate(expression)
    }

    async fn configuration_done(&self) -> Result<()> {
        self.state
            .lock()
            .operations
            .push(FakeOperation::ConfigurationDone);
        Ok(())
    }

    async fn resume(&self, thread_id: ThreadId) -> Result<()> {
        self.state
            .lock()
            .operations
            .push(FakeOperation::Resume(thread_id));
        Ok(())
    }
}

#[async_trait]
impl LocationResolver for FakeBackend {
    async fn resolve_line(
        &self,
        path: &Path,
        line: u32,
        column: Option<u32>,
    ) -> Result<u32, BreakpointError> {
        self.lines.resolve_line(path, line, column).await
    }

    async fn resolve_instruction(&self, address: u64) -> Result<u64, BreakpointError> {
        self.lines.resolve_instruction(address).await
    }
}
