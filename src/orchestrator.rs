//! Streaming tool-use loop.
//!
//! One user message drives repeated upstream calls: each call is streamed
//! through a [`StreamAssembler`], requested tools run one after another, their
//! results are appended as a user message and the conversation goes back
//! upstream. The loop ends when the model stops asking for tools, on a
//! transport failure, or when the iteration cap is reached.
//!
//! Every turn the client still listens to ends with exactly one `done` event.

use crate::messages::{ContentBlock, Message, Role, ToolInvocation};
use crate::stream::{StreamAssembler, StreamEvent};
use crate::tools::{ToolRegistry, ToolResult};
use crate::upstream::{ChatUpstream, UpstreamError, UpstreamRequest};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const INCOMPLETE_RESPONSE: &str = "Upstream response ended before the message was complete";
const NOT_AN_EVENT_STREAM: &str = "Upstream response was not a valid event stream";

/// Per-turn settings
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub max_iterations: usize,
}

/// Final state of a turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Conversation including everything appended during the turn
    pub messages: Vec<Message>,
    pub success: bool,
    pub iterations: usize,
    /// True when the client went away mid-turn and the transcript may end in
    /// unanswered tool calls
    pub cancelled: bool,
}

/// How one upstream call ended
enum CallOutcome {
    Finished(crate::stream::AssistantTurn),
    Failed(String),
    Cancelled,
}

/// Sender side of the UI event channel
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Send an event; false once the receiver is gone
    async fn emit(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Drives the request/stream/tool loop for one conversation turn
pub struct Orchestrator {
    upstream: Arc<dyn ChatUpstream>,
    tools: ToolRegistry,
    settings: TurnSettings,
}

impl Orchestrator {
    pub fn new(upstream: Arc<dyn ChatUpstream>, tools: ToolRegistry, settings: TurnSettings) -> Self {
        Self {
            upstream,
            tools,
            settings,
        }
    }

    /// Run the loop until the model is done, streaming events to `sink`
    pub async fn run(&self, mut messages: Vec<Message>, sink: &EventSink) -> TurnOutcome {
        let max_iterations = self.settings.max_iterations.max(1);
        let mut iterations = 0;

        loop {
            if iterations >= max_iterations {
                warn!(
                    max_iterations,
                    "Iteration cap reached, ending turn while the model still requests tools"
                );
                return settle(sink, messages, None, iterations).await;
            }
            iterations += 1;

            debug!(iteration = iterations, messages = messages.len(), "Requesting completion");
            let turn = match self.call_upstream(&messages, sink).await {
                CallOutcome::Finished(turn) => turn,
                CallOutcome::Failed(message) => {
                    error!(error = %message, iteration = iterations, "Chat turn failed");
                    return settle(sink, messages, Some(message), iterations).await;
                }
                CallOutcome::Cancelled => return cancelled(messages, iterations),
            };

            let requests_tools = turn.requests_tools();
            let invocations = turn.tool_invocations();
            if let Some(message) = turn.to_message() {
                messages.push(message);
            }

            if !requests_tools {
                info!(
                    iterations,
                    stop_reason = turn.stop_reason.as_deref().unwrap_or("none"),
                    "Chat turn complete"
                );
                return settle(sink, messages, None, iterations).await;
            }

            let mut results = Vec::with_capacity(invocations.len());
            for invocation in invocations {
                if sink.tx.is_closed() {
                    return cancelled(messages, iterations);
                }
                let result = self.execute_tool(&invocation).await;
                let block = ContentBlock::ToolResult {
                    tool_use_id: invocation.id.clone(),
                    content: result.to_model_content(),
                    is_error: !result.success,
                };
                let delivered = sink
                    .emit(StreamEvent::ToolResult {
                        id: invocation.id,
                        name: invocation.name,
                        input: invocation.input,
                        result,
                    })
                    .await;
                results.push(block);
                if !delivered {
                    return cancelled(messages, iterations);
                }
            }
            messages.push(Message::with_blocks(Role::User, results));
        }
    }

    /// One upstream call, streamed to completion
    async fn call_upstream(&self, messages: &[Message], sink: &EventSink) -> CallOutcome {
        let request = UpstreamRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            stream: true,
            system: self.settings.system_prompt.clone(),
            messages: messages.to_vec(),
            tools: self.tools.definitions(),
        };

        let mut frames = match self.upstream.stream(&request).await {
            Ok(frames) => frames,
            Err(e) => return CallOutcome::Failed(user_message(&e)),
        };

        let mut assembler = StreamAssembler::new();
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return CallOutcome::Failed(user_message(&e)),
            };
            let events = match assembler.apply(&frame) {
                Ok(events) => events,
                Err(failure) => {
                    return CallOutcome::Failed(user_message(&UpstreamError::Stream(failure.0)))
                }
            };
            for event in events {
                if !sink.emit(event).await {
                    return CallOutcome::Cancelled;
                }
            }
        }

        if !assembler.is_complete() {
            let reason = if assembler.has_started() {
                INCOMPLETE_RESPONSE
            } else {
                NOT_AN_EVENT_STREAM
            };
            warn!(started = assembler.has_started(), "Upstream stream ended without message_stop");
            return CallOutcome::Failed(reason.to_string());
        }

        CallOutcome::Finished(assembler.finish())
    }

    /// Run a tool on the blocking pool; tools do synchronous file and process I/O
    async fn execute_tool(&self, invocation: &ToolInvocation) -> ToolResult {
        let registry = self.tools.clone();
        let name = invocation.name.clone();
        let input = invocation.input.clone();

        match tokio::task::spawn_blocking(move || registry.execute(&name, &input)).await {
            Ok(result) => result,
            Err(e) => {
                error!(tool = %invocation.name, error = %e, "Tool task panicked");
                ToolResult::failure(format!("Tool '{}' crashed: {}", invocation.name, e))
            }
        }
    }
}

/// End a turn whose transcript is consistent. The outcome stands even when
/// the client is no longer there to receive the closing events.
async fn settle(
    sink: &EventSink,
    messages: Vec<Message>,
    failure: Option<String>,
    iterations: usize,
) -> TurnOutcome {
    let success = failure.is_none();
    let delivered = match failure {
        Some(message) => {
            sink.emit(StreamEvent::Error { message }).await
                && sink.emit(StreamEvent::Done { success: false }).await
        }
        None => sink.emit(StreamEvent::Done { success: true }).await,
    };
    if !delivered {
        debug!(iterations, "Client went away before the closing events");
    }
    TurnOutcome {
        messages,
        success,
        iterations,
        cancelled: false,
    }
}

fn cancelled(messages: Vec<Message>, iterations: usize) -> TurnOutcome {
    info!(iterations, "Client disconnected, abandoning chat turn");
    TurnOutcome {
        messages,
        success: false,
        iterations,
        cancelled: true,
    }
}

fn user_message(error: &UpstreamError) -> String {
    match error {
        UpstreamError::Network(e) if e.is_connect() => {
            "Could not connect to the API. Check your network connection.".to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathResolver;
    use crate::sse::SseFrame;
    use crate::upstream::FrameStream;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn frame(event: &str, data: Value) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data,
        }
    }

    fn tool_call_frames(id: &str, name: &str, input: &str) -> Vec<SseFrame> {
        vec![
            frame(
                "content_block_start",
                json!({"index": 0, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
            ),
            frame(
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "input_json_delta", "partial_json": input}}),
            ),
            frame("content_block_stop", json!({"index": 0})),
            frame("message_delta", json!({"delta": {"stop_reason": "tool_use"}})),
            frame("message_stop", json!({"type": "message_stop"})),
        ]
    }

    fn text_frames(text: &str) -> Vec<SseFrame> {
        vec![
            frame(
                "content_block_start",
                json!({"index": 0, "content_block": {"type": "text", "text": ""}}),
            ),
            frame(
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "text_delta", "text": text}}),
            ),
            frame("content_block_stop", json!({"index": 0})),
            frame("message_delta", json!({"delta": {"stop_reason": "end_turn"}})),
            frame("message_stop", json!({"type": "message_stop"})),
        ]
    }

    /// Replays scripted responses; the last one repeats forever
    struct ScriptedUpstream {
        script: Vec<Result<Vec<SseFrame>, u16>>,
        calls: AtomicUsize,
        requests: Mutex<Vec<UpstreamRequest>>,
    }

    impl ScriptedUpstream {
        fn new(script: Vec<Result<Vec<SseFrame>, u16>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatUpstream for ScriptedUpstream {
        async fn stream(&self, request: &UpstreamRequest) -> Result<FrameStream, UpstreamError> {
            self.requests.lock().unwrap().push(request.clone());
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script[call.min(self.script.len() - 1)].clone();
            match step {
                Ok(frames) => Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed()),
                Err(status) => Err(UpstreamError::Status {
                    status,
                    message: crate::upstream::describe_status(status),
                }),
            }
        }
    }

    fn settings(max_iterations: usize) -> TurnSettings {
        TurnSettings {
            model: "test-model".to_string(),
            max_tokens: 256,
            system_prompt: "system".to_string(),
            max_iterations,
        }
    }

    async fn run(
        upstream: Arc<ScriptedUpstream>,
        dir: &TempDir,
        max_iterations: usize,
    ) -> (TurnOutcome, Vec<StreamEvent>) {
        let tools = ToolRegistry::with_defaults(PathResolver::new(dir.path(), None));
        let orchestrator = Orchestrator::new(upstream, tools, settings(max_iterations));
        let (tx, mut rx) = mpsc::channel(1024);
        let outcome = orchestrator
            .run(vec![Message::user("list files")], &EventSink::new(tx))
            .await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn test_list_files_scenario_event_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.md"), "hi").unwrap();
        let upstream = ScriptedUpstream::new(vec![
            Ok(tool_call_frames("toolu_1", "list_directory", "{\"path\":\".\"}")),
            Ok(text_frames("Here are the files: notes.md")),
        ]);

        let (outcome, events) = run(upstream.clone(), &dir, 10).await;

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["tool_use_start", "tool_input_delta", "tool_result", "content", "done"]
        );
        assert_eq!(events.last(), Some(&StreamEvent::Done { success: true }));
        match &events[2] {
            StreamEvent::ToolResult { result, input, .. } => {
                assert!(result.success);
                assert!(result.content.as_deref().unwrap().contains("notes.md"));
                assert_eq!(input, &json!({"path": "."}));
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        // user, assistant(tool_use), user(tool_result), assistant(text)
        assert_eq!(outcome.messages.len(), 4);
        assert_eq!(outcome.messages[2].role, Role::User);
        assert_eq!(outcome.messages[3].text(), "Here are the files: notes.md");

        // the second request carried the tool result back upstream
        let requests = upstream.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[0].system, "system");
        assert!(requests[0].stream);
        assert_eq!(requests[0].tools.len(), 8);
    }

    #[tokio::test]
    async fn test_iteration_cap_terminates_with_single_done() {
        let dir = TempDir::new().unwrap();
        let upstream = ScriptedUpstream::new(vec![Ok(tool_call_frames(
            "toolu_loop",
            "list_directory",
            "{}",
        ))]);

        let (outcome, events) = run(upstream.clone(), &dir, 3).await;

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.iterations, 3);
        assert!(outcome.success);
        let dones: Vec<&StreamEvent> = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Done { .. }))
            .collect();
        assert_eq!(dones, vec![&StreamEvent::Done { success: true }]);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StreamEvent::ToolResult { .. }))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_upstream_status_error_emits_error_then_done() {
        let dir = TempDir::new().unwrap();
        let upstream = ScriptedUpstream::new(vec![Err(429)]);

        let (outcome, events) = run(upstream, &dir, 10).await;

        assert!(!outcome.success);
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Error { message } => assert!(message.starts_with("Rate limited")),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::Done { success: false });
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_not_fatal() {
        let dir = TempDir::new().unwrap();
        let upstream = ScriptedUpstream::new(vec![
            Ok(tool_call_frames("t1", "read_file", "{\"path\":\"missing.txt\"}")),
            Ok(text_frames("That file does not exist.")),
        ]);

        let (outcome, events) = run(upstream.clone(), &dir, 10).await;

        assert!(outcome.success);
        match &outcome.messages[2].content {
            crate::messages::MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    content,
                } => {
                    assert_eq!(tool_use_id, "t1");
                    assert!(*is_error);
                    assert!(content.contains("File not found"));
                }
                other => panic!("unexpected block {:?}", other),
            },
            other => panic!("unexpected content {:?}", other),
        }
        assert_eq!(events.last(), Some(&StreamEvent::Done { success: true }));
    }

    #[tokio::test]
    async fn test_tool_use_stop_without_tool_blocks_is_done() {
        let dir = TempDir::new().unwrap();
        let mut frames = text_frames("nothing to do");
        frames[3] = frame("message_delta", json!({"delta": {"stop_reason": "tool_use"}}));
        let upstream = ScriptedUpstream::new(vec![Ok(frames)]);

        let (outcome, events) = run(upstream.clone(), &dir, 10).await;

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert!(outcome.success);
        assert_eq!(events.last(), Some(&StreamEvent::Done { success: true }));
    }

    #[tokio::test]
    async fn test_multiple_tools_run_in_order() {
        let dir = TempDir::new().unwrap();
        let frames = vec![
            frame(
                "content_block_start",
                json!({"index": 1, "content_block": {"type": "tool_use", "id": "a", "name": "create_directory"}}),
            ),
            frame(
                "content_block_delta",
                json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"path\":\"out\"}"}}),
            ),
            frame("content_block_stop", json!({"index": 1})),
            frame(
                "content_block_start",
                json!({"index": 2, "content_block": {"type": "tool_use", "id": "b", "name": "write_file"}}),
            ),
            frame(
                "content_block_delta",
                json!({"index": 2, "delta": {"type": "input_json_delta", "partial_json": "{\"path\":\"out/a.txt\",\"content\":\"x\"}"}}),
            ),
            frame("content_block_stop", json!({"index": 2})),
            frame("message_delta", json!({"delta": {"stop_reason": "tool_use"}})),
            frame("message_stop", json!({})),
        ];
        let upstream = ScriptedUpstream::new(vec![Ok(frames), Ok(text_frames("done"))]);

        let (_outcome, events) = run(upstream, &dir, 10).await;

        let results: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolResult { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec!["a", "b"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/a.txt")).unwrap(),
            "x"
        );
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_turn() {
        let dir = TempDir::new().unwrap();
        let upstream = ScriptedUpstream::new(vec![Ok(tool_call_frames(
            "t",
            "list_directory",
            "{}",
        ))]);
        let tools = ToolRegistry::with_defaults(PathResolver::new(dir.path(), None));
        let orchestrator = Orchestrator::new(upstream.clone(), tools, settings(10));
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let outcome = orchestrator
            .run(vec![Message::user("hi")], &EventSink::new(tx))
            .await;

        assert!(outcome.cancelled);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_cut_before_message_stop_fails() {
        let dir = TempDir::new().unwrap();
        let mut frames = text_frames("Partial answ");
        frames.truncate(2);
        let upstream = ScriptedUpstream::new(vec![Ok(frames)]);

        let (outcome, events) = run(upstream, &dir, 10).await;

        assert!(!outcome.success);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(
            events,
            vec![
                StreamEvent::Content {
                    text: "Partial answ".to_string()
                },
                StreamEvent::Error {
                    message: INCOMPLETE_RESPONSE.to_string()
                },
                StreamEvent::Done { success: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_stream_is_not_a_completed_turn() {
        let dir = TempDir::new().unwrap();
        let upstream = ScriptedUpstream::new(vec![Ok(Vec::new())]);

        let (outcome, events) = run(upstream, &dir, 10).await;

        assert!(!outcome.success);
        assert_eq!(
            events,
            vec![
                StreamEvent::Error {
                    message: NOT_AN_EVENT_STREAM.to_string()
                },
                StreamEvent::Done { success: false },
            ]
        );
    }

    /// Streams its frames, then drops the UI receiver before the stream ends
    struct DisconnectingUpstream {
        frames: Vec<SseFrame>,
        receiver: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
        seen: Arc<Mutex<Vec<StreamEvent>>>,
    }

    #[async_trait]
    impl ChatUpstream for DisconnectingUpstream {
        async fn stream(&self, _request: &UpstreamRequest) -> Result<FrameStream, UpstreamError> {
            let receiver = self.receiver.lock().unwrap().take();
            let seen = self.seen.clone();
            let disconnect = futures::stream::once(async move {
                if let Some(mut rx) = receiver {
                    while let Ok(event) = rx.try_recv() {
                        seen.lock().unwrap().push(event);
                    }
                }
                None::<Result<SseFrame, UpstreamError>>
            })
            .filter_map(futures::future::ready);
            Ok(futures::stream::iter(self.frames.clone().into_iter().map(Ok))
                .chain(disconnect)
                .boxed())
        }
    }

    #[tokio::test]
    async fn test_client_gone_before_done_keeps_finished_turn() {
        let dir = TempDir::new().unwrap();
        let (tx, rx) = mpsc::channel(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let upstream = Arc::new(DisconnectingUpstream {
            frames: text_frames("All done."),
            receiver: Mutex::new(Some(rx)),
            seen: seen.clone(),
        });
        let tools = ToolRegistry::with_defaults(PathResolver::new(dir.path(), None));
        let orchestrator = Orchestrator::new(upstream, tools, settings(10));

        let outcome = orchestrator
            .run(vec![Message::user("hi")], &EventSink::new(tx))
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![StreamEvent::Content {
                text: "All done.".to_string()
            }]
        );
        assert!(outcome.success);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1].text(), "All done.");
    }
}
