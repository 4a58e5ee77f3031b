//! Events emitted by the adapter
use serde::Serialize;

use crate::types::{Source, ThreadId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "body", rename_all = "camelCase")]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Output(OutputEventBody),
    Invalidated(InvalidatedEventBody),
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    /// `entry`, `step`, `breakpoint`, `instruction breakpoint` or `exception`
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub thread_id: ThreadId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_threads_stopped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StoppedEventBody {
    pub fn new(reason: impl Into<String>, thread_id: ThreadId) -> Self {
        Self {
            reason: reason.into(),
            description: None,
            thread_id,
            all_threads_stopped: None,
            text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputEventGroup {
    Start,
    StartCollapsed,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEventBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<OutputEventGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidatedEventBody {
    pub areas: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unit_events_have_no_body() {
        assert_eq!(
            serde_json::to_value(Event::Terminated).unwrap(),
            json!({"event": "terminated"})
        );
    }

    #[test]
    fn stopped_event() {
        let event = Event::Stopped(StoppedEventBody::new("instruction breakpoint", 1));
        assert_eq!(
            serde_json::to_value(event).unwrap(),
            json!({"event": "stopped", "body": {"reason": "instruction breakpoint", "threadId": 1}})
        );
    }

    #[test]
    fn output_group() {
        let event = Event::Output(OutputEventBody {
            category: Some("stdout".to_string()),
            output: "group-startCollapsed\n".to_string(),
            group: Some(OutputEventGroup::StartCollapsed),
            source: None,
            line: None,
            column: None,
        });
        assert_eq!(
            serde_json::to_value(event).unwrap()["body"],
            json!({"category": "stdout", "output": "group-startCollapsed\n", "group": "startCollapsed"})
        );
    }
}
