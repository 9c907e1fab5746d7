//! agentdesk - local web chat client with server-side tools
//!
//! Proxies conversations to a streaming chat API, runs filesystem and shell
//! tools on the model's behalf inside a workspace, and keeps conversations and
//! agent definitions as JSON files.
//!
//! This library exposes the core functionality for both the CLI binary and
//! integration testing.

pub mod agents;
pub mod config;
pub mod history;
pub mod messages;
pub mod orchestrator;
pub mod paths;
pub mod prompt;
pub mod server;
pub mod sse;
pub mod stream;
pub mod tools;
pub mod upstream;
