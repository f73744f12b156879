//! Status events relayed to live clients.
//!
//! Every lifecycle notification raised by the phase controller or by the
//! executor's tasks becomes a [`StatusEvent`] and travels, in arrival order,
//! through a per-request [`crate::EventRelay`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator serialized as the `type` field of every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventKind {
    Started,
    System,
    AgentStarted,
    Thinking,
    Action,
    StepComplete,
    ToolStart,
    ToolEnd,
    TaskStarted,
    Progress,
    TaskCompleted,
    Completed,
    Error,
    Done,
}

impl StatusEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusEventKind::Started => "started",
            StatusEventKind::System => "system",
            StatusEventKind::AgentStarted => "agent_started",
            StatusEventKind::Thinking => "thinking",
            StatusEventKind::Action => "action",
            StatusEventKind::StepComplete => "step_complete",
            StatusEventKind::ToolStart => "tool_start",
            StatusEventKind::ToolEnd => "tool_end",
            StatusEventKind::TaskStarted => "task_started",
            StatusEventKind::Progress => "progress",
            StatusEventKind::TaskCompleted => "task_completed",
            StatusEventKind::Completed => "completed",
            StatusEventKind::Error => "error",
            StatusEventKind::Done => "done",
        }
    }
}

/// A discrete lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: StatusEventKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusEvent {
    pub fn new(kind: StatusEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            agent: None,
            extra: Map::new(),
        }
    }

    pub fn started(message: impl Into<String>) -> Self {
        Self::new(StatusEventKind::Started, message).with_agent("System")
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(StatusEventKind::System, message).with_agent("System")
    }

    pub fn progress(message: impl Into<String>) -> Self {
        Self::new(StatusEventKind::Progress, message)
    }

    pub fn completed(result: impl Into<String>) -> Self {
        Self::new(StatusEventKind::Completed, "Research complete!")
            .with_extra("result", Value::String(result.into()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusEventKind::Error, message)
    }

    pub fn done() -> Self {
        Self::new(StatusEventKind::Done, String::new())
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// `done` closes a run; nothing is relayed after it.
    pub fn is_terminal(&self) -> bool {
        self.kind == StatusEventKind::Done
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Cut `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn done_serializes_to_bare_type() {
        let encoded = StatusEvent::done().to_json().unwrap();
        assert_eq!(encoded, r#"{"type":"done"}"#);
    }

    #[test]
    fn extra_fields_are_flattened() {
        let event = StatusEvent::new(StatusEventKind::ToolStart, "Using tool: claim_extractor")
            .with_agent("Literature Miner")
            .with_extra("tool", "claim_extractor");

        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "tool_start",
                "message": "Using tool: claim_extractor",
                "agent": "Literature Miner",
                "tool": "claim_extractor",
            })
        );
    }

    #[test]
    fn parses_events_with_unknown_fields_into_extra() {
        let event: StatusEvent =
            serde_json::from_str(r#"{"type":"completed","message":"ok","result":"report"}"#)
                .unwrap();
        assert_eq!(event.kind, StatusEventKind::Completed);
        assert_eq!(event.extra.get("result"), Some(&json!("report")));
        assert!(!event.is_terminal());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
