//! System prompt resolution
//!
//! The first non-empty source wins:
//! 1. Per-request override sent by the browser
//! 2. The selected agent's prompt
//! 3. `chat.system_prompt` from config
//! 4. The built-in base prompt
//!
//! An environment section describing the workspace and the available tools is
//! always appended.

use crate::paths::PathResolver;

/// Built-in prompt used when nothing else is configured
const BASE_PROMPT: &str = r#"You are a helpful assistant working inside a local project workspace.

## Your Tools

### `read_file` - Read File Contents
Returns the file with line numbers. ALWAYS read a file before editing it.

### `write_file` - Create or Overwrite Files
Writes the full content of a file, creating parent directories as needed.
- Prefer `edit_file` for changes to existing files

### `edit_file` - Modify Existing Files
Replaces one exact occurrence of `old_string` with `new_string`.
- The old_string must match EXACTLY (including whitespace/indentation)
- If old_string isn't unique, provide more surrounding context

### `list_directory` - List Directory Contents
Lists the immediate children of a directory with their sizes.

### `search_files` - Find Files by Name
Glob search relative to a directory, e.g. `**/*.md`.

### `search_content` - Search Inside Files
Case-insensitive regex search over file contents. Binary files are skipped.

### `execute_command` - Run Shell Commands
Runs a command through the shell and returns its output and exit code.
- Use for builds, tests and git; use the file tools for file operations

### `create_directory` - Create Directories
Creates a directory and any missing parents.

## Working Principles
- Read before you write and keep changes minimal
- Files can only be written inside the workspace; shared framework files are read-only
- When a tool fails, read the error and adjust instead of repeating the same call
- Be concise and direct"#;

/// Candidate prompt sources in priority order
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptSources<'a> {
    pub request_override: Option<&'a str>,
    pub agent_prompt: Option<&'a str>,
    pub config_prompt: Option<&'a str>,
}

impl<'a> PromptSources<'a> {
    /// Highest-priority non-blank source, or the base prompt
    pub fn base(&self) -> &'a str {
        [self.request_override, self.agent_prompt, self.config_prompt]
            .into_iter()
            .flatten()
            .find(|p| !p.trim().is_empty())
            .unwrap_or(BASE_PROMPT)
    }
}

/// Build the complete system prompt sent upstream
pub fn build_system_prompt(
    sources: PromptSources<'_>,
    paths: &PathResolver,
    tool_names: &[String],
) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(sources.base());

    prompt.push_str("\n\n## Environment\n");
    prompt.push_str(&format!(
        "- Workspace root (writable): {}\n",
        paths.workspace_root().display()
    ));
    if let Some(framework) = paths.framework_root() {
        prompt.push_str(&format!(
            "- Framework root (read-only, searched after the workspace): {}\n",
            framework.display()
        ));
    }
    if tool_names.is_empty() {
        prompt.push_str("- No tools are available in this conversation\n");
    } else {
        prompt.push_str(&format!("- Available tools: {}\n", tool_names.join(", ")));
    }

    prompt
}
