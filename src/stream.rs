//! Per-call stream state: turns upstream SSE frames into content blocks and
//! the events relayed to the browser.
//!
//! Block indices come from the upstream API and are used verbatim as map
//! keys; they are not guaranteed to be contiguous.

use crate::messages::{self, ContentBlock, Message, Role, ToolInvocation};
use crate::sse::SseFrame;
use crate::tools::ToolResult;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Event emitted to the UI while a turn is in progress
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content {
        text: String,
    },
    ToolUseStart {
        id: String,
        name: String,
    },
    ToolInputDelta {
        partial: String,
    },
    ToolResult {
        id: String,
        name: String,
        input: Value,
        result: ToolResult,
    },
    Error {
        message: String,
    },
    Done {
        success: bool,
    },
}

impl StreamEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Content { .. } => "content",
            StreamEvent::ToolUseStart { .. } => "tool_use_start",
            StreamEvent::ToolInputDelta { .. } => "tool_input_delta",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }

    /// SSE data payload
    pub fn payload(&self) -> Value {
        match self {
            StreamEvent::Content { text } => json!({ "text": text }),
            StreamEvent::ToolUseStart { id, name } => json!({ "id": id, "name": name }),
            StreamEvent::ToolInputDelta { partial } => json!({ "partial": partial }),
            StreamEvent::ToolResult {
                id,
                name,
                input,
                result,
            } => json!({
                "id": id,
                "name": name,
                "input": input,
                "result": result,
            }),
            StreamEvent::Error { message } => json!({ "message": message }),
            StreamEvent::Done { success } => json!({ "success": success }),
        }
    }
}

/// Upstream reported an error inside an otherwise successful stream
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct StreamFailure(pub String);

#[derive(Debug)]
enum BlockState {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        partial_json: String,
        input: Option<Value>,
    },
}

impl BlockState {
    fn close(&mut self) {
        if let BlockState::ToolUse {
            name,
            partial_json,
            input,
            ..
        } = self
        {
            if input.is_none() {
                *input = Some(parse_tool_input(name, partial_json));
            }
        }
    }
}

/// Parse accumulated tool input; anything but a JSON object becomes `{}`
pub fn parse_tool_input(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => {
            warn!(tool = %tool, "Tool input is not a JSON object, using empty input");
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(tool = %tool, error = %e, "Malformed tool input JSON, using empty input");
            Value::Object(Map::new())
        }
    }
}

/// Explicit parser state for one upstream call
#[derive(Debug, Default)]
pub struct StreamAssembler {
    blocks: BTreeMap<u64, BlockState>,
    current: Option<u64>,
    stop_reason: Option<String>,
    started: bool,
    completed: bool,
}

/// What one upstream call produced
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub blocks: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
}

impl AssistantTurn {
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        messages::tool_invocations(&self.blocks)
    }

    /// True when the model stopped to wait for tool results
    pub fn requests_tools(&self) -> bool {
        self.stop_reason.as_deref() == Some("tool_use") && !self.tool_invocations().is_empty()
    }

    /// The assistant message to append to the conversation, if any content
    pub fn to_message(&self) -> Option<Message> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(Message::with_blocks(Role::Assistant, self.blocks.clone()))
        }
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one frame, returning the UI events it produces
    pub fn apply(&mut self, frame: &SseFrame) -> Result<Vec<StreamEvent>, StreamFailure> {
        let data = &frame.data;
        // frames without an `event:` line still carry their type in the payload
        let kind = if frame.event == "message" {
            data.get("type").and_then(|t| t.as_str()).unwrap_or("message")
        } else {
            frame.event.as_str()
        };

        self.started = true;
        let mut events = Vec::new();
        match kind {
            "message_stop" => self.completed = true,
            "content_block_start" => {
                let index = self.index_of(data);
                let block = data.get("content_block").cloned().unwrap_or(Value::Null);
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        let text = block
                            .get("text")
                            .and_then(|t| t.as_str())
                            .unwrap_or("")
                            .to_string();
                        if !text.is_empty() {
                            events.push(StreamEvent::Content { text: text.clone() });
                        }
                        self.open(index, BlockState::Text { text });
                    }
                    Some("tool_use") => {
                        let id = block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        let name = block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .to_string();
                        events.push(StreamEvent::ToolUseStart {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        self.open(
                            index,
                            BlockState::ToolUse {
                                id,
                                name,
                                partial_json: String::new(),
                                input: None,
                            },
                        );
                    }
                    other => {
                        debug!(index, block_type = ?other, "Ignoring unsupported content block");
                    }
                }
            }
            "content_block_delta" => {
                let index = self.index_of(data);
                let delta = data.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let piece = delta.get("text").and_then(|t| t.as_str()).unwrap_or("");
                        let block = self
                            .blocks
                            .entry(index)
                            .or_insert_with(|| BlockState::Text {
                                text: String::new(),
                            });
                        if let BlockState::Text { text } = block {
                            text.push_str(piece);
                            if !piece.is_empty() {
                                events.push(StreamEvent::Content {
                                    text: piece.to_string(),
                                });
                            }
                        }
                    }
                    Some("input_json_delta") => {
                        let piece = delta
                            .get("partial_json")
                            .and_then(|t| t.as_str())
                            .unwrap_or("");
                        if let Some(BlockState::ToolUse { partial_json, .. }) =
                            self.blocks.get_mut(&index)
                        {
                            partial_json.push_str(piece);
                            events.push(StreamEvent::ToolInputDelta {
                                partial: piece.to_string(),
                            });
                        } else {
                            debug!(index, "input_json_delta for a block that is not a tool call");
                        }
                    }
                    other => {
                        debug!(index, delta_type = ?other, "Ignoring unsupported delta");
                    }
                }
            }
            "content_block_stop" => {
                let index = self.index_of(data);
                if let Some(block) = self.blocks.get_mut(&index) {
                    block.close();
                }
                if self.current == Some(index) {
                    self.current = None;
                }
            }
            "message_delta" => {
                if let Some(reason) = data
                    .get("delta")
                    .and_then(|d| d.get("stop_reason"))
                    .and_then(|r| r.as_str())
                {
                    self.stop_reason = Some(reason.to_string());
                }
            }
            "error" => {
                let message = data
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("Upstream stream error")
                    .to_string();
                return Err(StreamFailure(message));
            }
            _ => {}
        }

        Ok(events)
    }

    /// True once any frame was applied
    pub fn has_started(&self) -> bool {
        self.started
    }

    /// True once upstream signalled the end of the message with `message_stop`
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Close any block left open and return the assembled turn
    pub fn finish(mut self) -> AssistantTurn {
        for block in self.blocks.values_mut() {
            block.close();
        }

        let blocks = self
            .blocks
            .into_values()
            .filter_map(|block| match block {
                BlockState::Text { text } if text.is_empty() => None,
                BlockState::Text { text } => Some(ContentBlock::Text { text }),
                BlockState::ToolUse {
                    id, name, input, ..
                } => Some(ContentBlock::ToolUse {
                    id,
                    name,
                    input: input.unwrap_or_else(|| Value::Object(Map::new())),
                }),
            })
            .collect();

        AssistantTurn {
            blocks,
            stop_reason: self.stop_reason,
        }
    }

    fn open(&mut self, index: u64, block: BlockState) {
        if let Some(previous) = self.current.filter(|p| *p != index) {
            if let Some(open) = self.blocks.get_mut(&previous) {
                open.close();
            }
        }
        self.blocks.insert(index, block);
        self.current = Some(index);
    }

    fn index_of(&self, data: &Value) -> u64 {
        data.get("index")
            .and_then(|i| i.as_u64())
            .or(self.current)
            .unwrap_or(0)
    }
}
