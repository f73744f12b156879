//! Observer interface through which an execution engine reports its lifecycle.

use serde::{Deserialize, Serialize};

/// Output of a single agent step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepOutput {
    /// Free-form reasoning log, possibly containing `Thought:` and `Action:` lines.
    Log(String),
    /// The agent finished with a final answer.
    Finish(String),
}

/// Output of a completed task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    pub task: String,
    pub raw: String,
}

impl TaskOutput {
    pub fn new(task: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            raw: raw.into(),
        }
    }
}

/// Callbacks invoked by the phase controller and by executors.
///
/// Implementations must be cheap and non-blocking; they run inline with the
/// executor.
pub trait ExecutionObserver: Send + Sync {
    fn on_start(&self, agent: &str, task: &str);

    fn on_step(&self, step: StepOutput);

    fn on_complete(&self, output: TaskOutput);

    fn on_error(&self, message: &str);

    fn on_task_start(&self, _task: &str, _description: &str) {}

    fn on_tool_start(&self, _tool: &str, _input: &str) {}

    fn on_tool_end(&self, _tool: &str, _output: &str) {}

    fn on_progress(&self, _message: &str, _details: serde_json::Value) {}

    fn on_system(&self, _message: &str) {}
}

/// Observer that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    fn on_start(&self, _agent: &str, _task: &str) {}

    fn on_step(&self, _step: StepOutput) {}

    fn on_complete(&self, _output: TaskOutput) {}

    fn on_error(&self, _message: &str) {}
}

/// Extract the remainder of the first line following `marker`.
pub(crate) fn marker_line<'a>(log: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = log.split_once(marker)?;
    Some(rest.lines().next().unwrap_or_default().trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_line_reads_single_line() {
        let log = "Thought: compare sources\nAction: claim_extractor\nAction Input: {}";
        assert_eq!(marker_line(log, "Thought:"), Some("compare sources"));
        assert_eq!(marker_line(log, "Action:"), Some("claim_extractor"));
        assert_eq!(marker_line(log, "Observation:"), None);
    }
}
