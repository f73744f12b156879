//! Per-request event relay.
//!
//! Producers publish [`StatusEvent`]s into an unbounded FIFO queue owned by a
//! single request; the consumer turns the queue into a lazy stream of frames
//! with heartbeats and stops right after the terminal `done` event.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::events::{StatusEvent, StatusEventKind, truncate_chars};
use crate::observer::{ExecutionObserver, StepOutput, TaskOutput, marker_line};

/// Wait applied before a heartbeat is emitted.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct RelayState {
    done: bool,
    current_agent: Option<String>,
    current_task: Option<String>,
}

/// Producer half of a relay. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct EventRelay {
    sender: mpsc::UnboundedSender<StatusEvent>,
    state: Arc<Mutex<RelayState>>,
}

/// Consumer half of a relay.
pub struct RelayReceiver {
    receiver: mpsc::UnboundedReceiver<StatusEvent>,
}

/// One item handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    Event(StatusEvent),
    Heartbeat,
}

pub type RelayStream = Pin<Box<dyn Stream<Item = RelayFrame> + Send>>;

impl EventRelay {
    /// Create a relay and its consumer for a single request.
    pub fn channel() -> (Self, RelayReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let relay = Self {
            sender,
            state: Arc::new(Mutex::new(RelayState::default())),
        };
        (relay, RelayReceiver { receiver })
    }

    /// Append an event to the queue. Events published after `done` are dropped.
    pub fn publish(&self, event: StatusEvent) {
        let mut state = self.lock_state();
        if state.done {
            warn!(kind = event.kind.as_str(), "dropping event published after done");
            return;
        }
        if event.is_terminal() {
            state.done = true;
        }

        debug!(kind = event.kind.as_str(), "relaying status event");
        if let Err(err) = self.sender.send(event) {
            debug!(kind = err.0.kind.as_str(), "relay consumer disconnected");
        }
    }

    /// Publish the terminal `done` event.
    pub fn finish(&self) {
        self.publish(StatusEvent::done());
    }

    pub fn is_finished(&self) -> bool {
        self.lock_state().done
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_agent(&self) -> Option<String> {
        self.lock_state().current_agent.clone()
    }

    fn publish_for_agent(&self, event: StatusEvent) {
        let event = match self.current_agent() {
            Some(agent) if event.agent.is_none() => event.with_agent(agent),
            _ => event,
        };
        self.publish(event);
    }
}

enum ConsumeState {
    Open(mpsc::UnboundedReceiver<StatusEvent>),
    Closing,
    Finished,
}

impl RelayReceiver {
    /// Turn the queue into a stream of frames.
    ///
    /// Waits up to `heartbeat` for each event and yields
    /// [`RelayFrame::Heartbeat`] whenever the wait elapses. The stream ends
    /// right after the first `done`. When every producer is gone without a
    /// `done`, an `error` event and a `done` are yielded instead.
    pub fn frames(self, heartbeat: Duration) -> RelayStream {
        let stream = futures::stream::unfold(
            ConsumeState::Open(self.receiver),
            move |state| async move {
                match state {
                    ConsumeState::Open(mut receiver) => {
                        match timeout(heartbeat, receiver.recv()).await {
                            Ok(Some(event)) if event.is_terminal() => {
                                Some((RelayFrame::Event(event), ConsumeState::Finished))
                            }
                            Ok(Some(event)) => {
                                Some((RelayFrame::Event(event), ConsumeState::Open(receiver)))
                            }
                            Ok(None) => {
                                warn!("relay closed before the run signalled done");
                                let event =
                                    StatusEvent::error("status relay closed before completion");
                                Some((RelayFrame::Event(event), ConsumeState::Closing))
                            }
                            Err(_) => Some((RelayFrame::Heartbeat, ConsumeState::Open(receiver))),
                        }
                    }
                    ConsumeState::Closing => Some((
                        RelayFrame::Event(StatusEvent::done()),
                        ConsumeState::Finished,
                    )),
                    ConsumeState::Finished => None,
                }
            },
        );
        Box::pin(stream)
    }
}

impl RelayFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayFrame::Event(event) if event.is_terminal())
    }

    /// Serialize the frame as a server-sent-event text delta.
    pub fn encode(&self) -> String {
        match self {
            RelayFrame::Event(event) => format!("data: {}\n\n", event_json(event)),
            RelayFrame::Heartbeat => ": keepalive\n\n".to_string(),
        }
    }
}

/// JSON body of an event; serialization failures become an `error` payload.
pub fn event_json(event: &StatusEvent) -> String {
    event.to_json().unwrap_or_else(|err| {
        warn!(error = %err, "failed to serialize status event");
        json!({
            "type": StatusEventKind::Error.as_str(),
            "message": format!("failed to serialize status event: {err}"),
        })
        .to_string()
    })
}

impl ExecutionObserver for EventRelay {
    fn on_start(&self, agent: &str, task: &str) {
        {
            let mut state = self.lock_state();
            state.current_agent = Some(agent.to_string());
            state.current_task = Some(task.to_string());
        }
        self.publish(
            StatusEvent::new(
                StatusEventKind::AgentStarted,
                format!("Starting: {}...", truncate_chars(task, 100)),
            )
            .with_agent(agent)
            .with_extra("task", task),
        );
    }

    fn on_step(&self, step: StepOutput) {
        match step {
            StepOutput::Log(log) => {
                if let Some(thought) = marker_line(&log, "Thought:") {
                    self.publish_for_agent(StatusEvent::new(
                        StatusEventKind::Thinking,
                        truncate_chars(thought, 200),
                    ));
                }
                if let Some(action) = marker_line(&log, "Action:") {
                    self.publish_for_agent(StatusEvent::new(
                        StatusEventKind::Action,
                        format!("Taking action: {}", truncate_chars(action, 150)),
                    ));
                }
            }
            StepOutput::Finish(output) => {
                self.publish_for_agent(StatusEvent::new(
                    StatusEventKind::StepComplete,
                    format!("Completed step: {}", truncate_chars(&output, 200)),
                ));
            }
        }
    }

    fn on_complete(&self, output: TaskOutput) {
        let task = self
            .lock_state()
            .current_task
            .clone()
            .unwrap_or_else(|| output.task.clone());
        let message = if output.raw.is_empty() {
            "Task completed successfully".to_string()
        } else {
            format!("Task completed: {}...", truncate_chars(&output.raw, 200))
        };
        self.publish_for_agent(
            StatusEvent::new(StatusEventKind::TaskCompleted, message).with_extra("task", task),
        );
    }

    fn on_error(&self, message: &str) {
        self.publish(StatusEvent::error(message));
    }

    fn on_task_start(&self, task: &str, description: &str) {
        self.publish(
            StatusEvent::new(StatusEventKind::TaskStarted, format!("Starting task: {task}"))
                .with_extra("task", task)
                .with_extra("description", truncate_chars(description, 150)),
        );
    }

    fn on_tool_start(&self, tool: &str, input: &str) {
        self.publish_for_agent(
            StatusEvent::new(StatusEventKind::ToolStart, format!("Using tool: {tool}"))
                .with_extra("tool", tool)
                .with_extra("input", truncate_chars(input, 100)),
        );
    }

    fn on_tool_end(&self, tool: &str, _output: &str) {
        self.publish_for_agent(
            StatusEvent::new(StatusEventKind::ToolEnd, format!("Tool {tool} completed"))
                .with_extra("tool", tool),
        );
    }

    fn on_progress(&self, message: &str, details: Value) {
        let mut event = StatusEvent::progress(message);
        if let Value::Object(fields) = details {
            event.extra.extend(fields);
        }
        self.publish(event);
    }

    fn on_system(&self, message: &str) {
        self.publish(StatusEvent::system(message));
    }
}
