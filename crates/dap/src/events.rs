use crate::types::{Breakpoint, Source, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "event", content = "body")]
// seq is assigned by the transport when the event is written
pub enum Event {
    Stopped(StoppedEvent),
    Output(OutputEvent),
    Breakpoint(BreakpointEvent),
}

#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_breakpoint_ids: Option<Vec<u64>>,
}

#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointEventReason {
    New,
    Changed,
    Removed,
}

impl fmt::Display for BreakpointEventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Changed => write!(f, "changed"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointEvent {
    pub reason: BreakpointEventReason,
    pub breakpoint: Breakpoint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_breakpoint_event_wire_shape() {
        let event = Event::Breakpoint(BreakpointEvent {
            reason: BreakpointEventReason::Removed,
            breakpoint: Breakpoint {
                id: Some(7),
                verified: false,
                ..Default::default()
            },
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "breakpoint",
                "body": { "reason": "removed", "breakpoint": { "id": 7, "verified": false } }
            })
        );
    }

    #[test]
    fn test_stopped_event_wire_shape() {
        let event = Event::Stopped(StoppedEvent {
            reason: "breakpoint".into(),
            description: None,
            thread_id: Some(ThreadId(1)),
            all_threads_stopped: None,
            hit_breakpoint_ids: Some(vec![2]),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "stopped",
                "body": { "reason": "breakpoint", "threadId": 1, "hitBreakpointIds": [2] }
            })
        );
    }
}
