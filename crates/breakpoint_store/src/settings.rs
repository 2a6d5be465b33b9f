use crate::BreakpointKind;
use anyhow::{Context as _, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BreakpointSettings {
    /// Whether breakpoints requested by the client are placed as hardware
    /// breakpoints.
    ///
    /// Default: false
    pub hardware_breakpoints: bool,
    /// Whether breakpoint changes made from the debugger console are echoed
    /// to the client as output events.
    ///
    /// Default: true
    pub echo_console_changes: bool,
    /// Whether every operation sent to the backend is logged at info level.
    ///
    /// Default: false
    pub log_backend_operations: bool,
}

impl Default for BreakpointSettings {
    fn default() -> Self {
        Self {
            hardware_breakpoints: false,
            echo_console_changes: true,
            log_backend_operations: false,
        }
    }
}

impl BreakpointSettings {
    pub const KEY: &'static str = "breakpoints";

    /// Reads the settings from the `breakpoints` section of a launch or
    /// attach configuration. A missing section yields the defaults.
    pub fn from_launch_config(config: &Value) -> Result<Self> {
        match config.get(Self::KEY) {
            Some(section) => serde_json::from_value(section.clone())
                .with_context(|| format!("invalid `{}` settings", Self::KEY)),
            None => Ok(Self::default()),
        }
    }

    pub fn client_breakpoint_kind(&self) -> BreakpointKind {
        if self.hardware_breakpoints {
            BreakpointKind::Hardware
        } else {
            BreakpointKind::Software
        }
    }

    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(BreakpointSettings)).unwrap_or_default()
    }
}
