use crate::types::{Breakpoint, InstructionBreakpoint, Source, SourceBreakpoint};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub trait Request {
    type Arguments: DeserializeOwned + Serialize;
    type Response: DeserializeOwned + Serialize;
    const COMMAND: &'static str;
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_modified: Option<bool>,
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsResponse {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug)]
pub enum SetBreakpoints {}

impl Request for SetBreakpoints {
    type Arguments = SetBreakpointsArguments;
    type Response = SetBreakpointsResponse;
    const COMMAND: &'static str = "setBreakpoints";
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInstructionBreakpointsArguments {
    pub breakpoints: Vec<InstructionBreakpoint>,
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInstructionBreakpointsResponse {
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug)]
pub enum SetInstructionBreakpoints {}

impl Request for SetInstructionBreakpoints {
    type Arguments = SetInstructionBreakpointsArguments;
    type Response = SetInstructionBreakpointsResponse;
    const COMMAND: &'static str = "setInstructionBreakpoints";
}

#[derive(Debug)]
pub enum ConfigurationDone {}

impl Request for ConfigurationDone {
    type Arguments = ();
    type Response = ();
    const COMMAND: &'static str = "configurationDone";
}
