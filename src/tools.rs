//! Tool definitions and execution for agentdesk
//!
//! Implements the workspace tools the model can call:
//! - read_file / write_file / edit_file: file I/O
//! - list_directory / create_directory: directory handling
//! - search_files: glob search (supports `**`)
//! - search_content: case-insensitive regex search over file contents
//! - execute_command: run a shell command in the workspace
//!
//! Every tool is a [`Tool`] implementation held by a [`ToolRegistry`]. The
//! registry validates input against the same JSON schema that is advertised
//! to the model, and tools never fail outward: problems come back as a
//! [`ToolResult`] with `success: false`.

use crate::paths::PathResolver;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum characters returned by read_file
const MAX_READ_CHARS: usize = 100_000;

/// Maximum characters of command output returned by execute_command
const MAX_COMMAND_OUTPUT: usize = 50_000;

/// Maximum matches returned by search_content
const MAX_CONTENT_MATCHES: usize = 100;

/// Maximum paths returned by search_files
const MAX_FILE_MATCHES: usize = 1_000;

/// Bytes inspected when deciding whether a file is binary
const BINARY_SNIFF_BYTES: usize = 8192;

/// Tool definition advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Result of executing a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool-specific fields, flattened next to success/content/error
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            extra: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            extra: Map::new(),
        }
    }

    /// Attach a tool-specific field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Text fed back to the model as the tool_result block content
    pub fn to_model_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            self.error
                .clone()
                .or_else(|| self.content.clone())
                .unwrap_or_default()
        })
    }
}

/// A named server-side action the model can request
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult;
}

/// Registry mapping tool names to their handlers
#[derive(Clone)]
pub struct ToolRegistry {
    entries: Arc<Vec<RegisteredTool>>,
    paths: Arc<PathResolver>,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn Tool>,
}

impl ToolRegistry {
    /// Empty registry, for callers that register their own tools
    pub fn new(paths: PathResolver) -> Self {
        Self {
            entries: Arc::new(Vec::new()),
            paths: Arc::new(paths),
        }
    }

    /// Registry holding the full built-in catalog
    pub fn with_defaults(paths: PathResolver) -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(ReadFileTool),
            Arc::new(WriteFileTool),
            Arc::new(EditFileTool),
            Arc::new(ListDirectoryTool),
            Arc::new(SearchFilesTool),
            Arc::new(SearchContentTool),
            Arc::new(ExecuteCommandTool),
            Arc::new(CreateDirectoryTool),
        ];
        let mut registry = Self::new(paths);
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool, replacing any existing tool with the same name
    pub fn register(&mut self, handler: Arc<dyn Tool>) {
        let definition = handler.definition();
        let mut entries: Vec<RegisteredTool> = self
            .entries
            .iter()
            .filter(|e| e.definition.name != definition.name)
            .map(|e| RegisteredTool {
                definition: e.definition.clone(),
                handler: e.handler.clone(),
            })
            .collect();
        entries.push(RegisteredTool {
            definition,
            handler,
        });
        self.entries = Arc::new(entries);
    }

    /// Copy of this registry keeping only the named tools
    pub fn restricted_to(&self, names: &[String]) -> Self {
        let entries = self
            .entries
            .iter()
            .filter(|e| names.iter().any(|n| n == &e.definition.name))
            .map(|e| RegisteredTool {
                definition: e.definition.clone(),
                handler: e.handler.clone(),
            })
            .collect();
        Self {
            entries: Arc::new(entries),
            paths: self.paths.clone(),
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.definition.name.clone())
            .collect()
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    /// Execute one tool call. Never panics outward, always returns a result.
    pub fn execute(&self, name: &str, input: &Value) -> ToolResult {
        let Some(entry) = self.entries.iter().find(|e| e.definition.name == name) else {
            warn!(tool = %name, "Model requested unknown tool");
            return ToolResult::failure(format!("Unknown tool: {}", name));
        };

        if let Err(reason) = validate_input(&entry.definition.input_schema, input) {
            debug!(tool = %name, reason = %reason, "Rejected tool input");
            return ToolResult::failure(format!("Invalid input for {}: {}", name, reason));
        }

        info!(tool = %name, "Executing tool");
        let result = entry.handler.execute(input, &self.paths);
        if !result.success {
            debug!(
                tool = %name,
                error = result.error.as_deref().unwrap_or(""),
                "Tool reported failure"
            );
        }
        result
    }
}

/// Check a tool input against its advertised JSON schema.
///
/// Covers what the catalog uses: an object with required properties and
/// primitive property types.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    let Some(obj) = input.as_object() else {
        return Err("tool input must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if obj.get(field).map(|v| v.is_null()).unwrap_or(true) {
                return Err(format!("missing required field '{}'", field));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (field, prop) in props {
            let (Some(value), Some(expected)) =
                (obj.get(field), prop.get("type").and_then(|t| t.as_str()))
            else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!("field '{}' must be of type {}", field, expected));
            }
        }
    }

    Ok(())
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

fn missing(key: &str) -> ToolResult {
    ToolResult::failure(format!("Missing '{}' argument", key))
}

/// Cut `text` to at most `max` bytes on a char boundary, noting the total
fn truncate_output(text: String, max: usize, what: &str) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}...\n({} truncated, {} total bytes)",
        &text[..cut],
        what,
        text.len()
    )
}

fn is_binary(bytes: &[u8]) -> bool {
    let len = bytes.len().min(BINARY_SNIFF_BYTES);
    bytes[..len].contains(&0)
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Read a file with line numbers
struct ReadFileTool;

impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read the contents of a file. Returns the content with line numbers. \
                Paths are looked up in the workspace first, then in the shared framework directory."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "The path to the file to read"
                    }
                }),
                &["path"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(path) = str_arg(input, "path") else {
            return missing("path");
        };
        let resolved = paths.resolve_read(path);

        match fs::read_to_string(&resolved) {
            Ok(content) => {
                let numbered: Vec<String> = content
                    .lines()
                    .enumerate()
                    .map(|(i, line)| format!("{:4}| {}", i + 1, line))
                    .collect();
                let line_count = numbered.len();
                let result = truncate_output(numbered.join("\n"), MAX_READ_CHARS, "file");

                ToolResult::ok(result)
                    .with("path", paths.display(&resolved))
                    .with("lines", line_count)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ToolResult::failure(format!("File not found: '{}'", path))
            }
            Err(e) => ToolResult::failure(format!("Failed to read file '{}': {}", path, e)),
        }
    }
}

/// Create or overwrite a file inside the workspace
struct WriteFileTool;

impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Write content to a file in the workspace. Creates the file (and any \
                missing parent directories) if needed, overwrites it otherwise."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "The path to the file to write"
                    },
                    "content": {
                        "type": "string",
                        "description": "The content to write to the file"
                    }
                }),
                &["path", "content"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(path) = str_arg(input, "path") else {
            return missing("path");
        };
        let Some(content) = str_arg(input, "content") else {
            return missing("content");
        };
        let target = paths.resolve_write(path);

        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                return ToolResult::failure(format!("Failed to create directories: {}", e));
            }
        }

        match fs::write(&target, content) {
            Ok(()) => {
                let shown = paths.display(&target);
                ToolResult::ok(format!(
                    "Successfully wrote {} bytes to '{}'",
                    content.len(),
                    shown
                ))
                .with("path", shown)
                .with("bytes", content.len())
            }
            Err(e) => ToolResult::failure(format!("Failed to write file '{}': {}", path, e)),
        }
    }
}

/// Replace a unique exact substring in a file
struct EditFileTool;

impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "edit_file".to_string(),
            description: "Make a targeted edit to a file by replacing old_string with new_string. \
                old_string must match exactly and occur exactly once; include surrounding context \
                to make it unique. Files from the shared framework directory are copied into the \
                workspace before being edited."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "The path to the file to edit"
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The exact text to find"
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The text to replace it with"
                    }
                }),
                &["path", "old_string", "new_string"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(path) = str_arg(input, "path") else {
            return missing("path");
        };
        let Some(old_string) = str_arg(input, "old_string") else {
            return missing("old_string");
        };
        let Some(new_string) = str_arg(input, "new_string") else {
            return missing("new_string");
        };
        if old_string.is_empty() {
            return ToolResult::failure("old_string must not be empty");
        }

        let source = paths.resolve_read(path);
        let target = paths.resolve_write(path);

        let content = match fs::read_to_string(&source) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ToolResult::failure(format!("File not found: '{}'", path))
            }
            Err(e) => {
                return ToolResult::failure(format!("Failed to read file '{}': {}", path, e))
            }
        };

        let count = content.matches(old_string).count();
        if count == 0 {
            return ToolResult::failure(format!(
                "Could not find the specified text in '{}'. Make sure old_string matches exactly.",
                path
            ));
        }
        if count > 1 {
            return ToolResult::failure(format!(
                "Found {} occurrences of the text in '{}'. Provide more surrounding context so \
                 old_string matches exactly once.",
                count, path
            ));
        }

        let new_content = content.replacen(old_string, new_string, 1);
        let copied = source != target;
        if copied {
            if let Some(parent) = target.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return ToolResult::failure(format!("Failed to create directories: {}", e));
                }
            }
        }

        if let Err(e) = fs::write(&target, &new_content) {
            return ToolResult::failure(format!("Failed to write file '{}': {}", path, e));
        }

        let shown = paths.display(&target);
        let message = if copied {
            format!(
                "Copied '{}' into the workspace at '{}' and applied the edit.",
                source.display(),
                shown
            )
        } else {
            format!(
                "Successfully edited '{}'. Replaced {} chars with {} chars.",
                shown,
                old_string.len(),
                new_string.len()
            )
        };

        ToolResult::ok(message)
            .with("path", shown)
            .with("copied_to_workspace", copied)
    }
}

/// List the immediate children of a directory
struct ListDirectoryTool;

impl Tool for ListDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "List files and directories at a given path with their type and size."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "The directory path to list (defaults to the workspace root)"
                    }
                }),
                &[],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let path = str_arg(input, "path").unwrap_or(".");
        let dir = paths.resolve_read(path);

        if !dir.exists() {
            return ToolResult::failure(format!("Directory not found: '{}'", path));
        }
        if !dir.is_dir() {
            return ToolResult::failure(format!("Not a directory: '{}'", path));
        }

        let read = match fs::read_dir(&dir) {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::failure(format!("Failed to list directory '{}': {}", path, e))
            }
        };

        let mut entries: Vec<(String, bool, u64)> = read
            .flatten()
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let meta = fs::metadata(entry.path()).ok();
                let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
                let size = meta.map(|m| m.len()).unwrap_or(0);
                (name, is_dir, size)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let lines: Vec<String> = entries
            .iter()
            .map(|(name, is_dir, size)| {
                if *is_dir {
                    format!("{}/", name)
                } else {
                    format!("{} ({} bytes)", name, size)
                }
            })
            .collect();
        let listing: Vec<Value> = entries
            .iter()
            .map(|(name, is_dir, size)| {
                json!({
                    "name": name,
                    "type": if *is_dir { "directory" } else { "file" },
                    "size": size,
                })
            })
            .collect();

        let content = if lines.is_empty() {
            "(empty directory)".to_string()
        } else {
            lines.join("\n")
        };

        ToolResult::ok(content)
            .with("path", paths.display(&dir))
            .with("entries", listing)
    }
}

/// Glob search for paths
struct SearchFilesTool;

impl Tool for SearchFilesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_files".to_string(),
            description: "Find files matching a glob pattern such as '*.md' or 'src/**/*.rs'. \
                '**' matches any number of directories."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "pattern": {
                        "type": "string",
                        "description": "Glob pattern relative to the search directory"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search from (defaults to the workspace root)"
                    }
                }),
                &["pattern"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(pattern) = str_arg(input, "pattern") else {
            return missing("pattern");
        };
        let base = paths.resolve_read(str_arg(input, "path").unwrap_or("."));
        let full = format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            pattern.trim_start_matches("./")
        );

        let walker = match glob::glob(&full) {
            Ok(w) => w,
            Err(e) => return ToolResult::failure(format!("Invalid glob pattern: {}", e)),
        };

        let mut matches: Vec<String> = walker
            .flatten()
            .map(|p| relative_to(&p, &base))
            .collect();
        matches.sort();
        let truncated = matches.len() > MAX_FILE_MATCHES;
        matches.truncate(MAX_FILE_MATCHES);

        let mut content = if matches.is_empty() {
            format!("No files matched pattern '{}'", pattern)
        } else {
            matches.join("\n")
        };
        if truncated {
            content.push_str(&format!("\n(results truncated at {} paths)", MAX_FILE_MATCHES));
        }

        ToolResult::ok(content)
            .with("count", matches.len())
            .with("matches", matches)
            .with("truncated", truncated)
    }
}

/// Grep-like line search
struct SearchContentTool;

impl Tool for SearchContentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_content".to_string(),
            description: "Search file contents for a case-insensitive regular expression. Binary \
                files are skipped and results are capped at 100 matching lines."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "pattern": {
                        "type": "string",
                        "description": "Regular expression to search for"
                    },
                    "path": {
                        "type": "string",
                        "description": "File or directory to search (defaults to the workspace root)"
                    },
                    "file_pattern": {
                        "type": "string",
                        "description": "Glob limiting which files are searched, e.g. '*.md' (default: all files)"
                    }
                }),
                &["pattern"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(pattern) = str_arg(input, "pattern") else {
            return missing("pattern");
        };
        let regex = match regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolResult::failure(format!("Invalid regex '{}': {}", pattern, e)),
        };

        let base = paths.resolve_read(str_arg(input, "path").unwrap_or("."));
        let file_pattern = str_arg(input, "file_pattern").unwrap_or("*");

        let files: Vec<std::path::PathBuf> = if base.is_file() {
            vec![base.clone()]
        } else {
            let full = format!(
                "{}/**/{}",
                glob::Pattern::escape(&base.to_string_lossy()),
                file_pattern
            );
            match glob::glob(&full) {
                Ok(walker) => {
                    let mut files: Vec<_> = walker.flatten().filter(|p| p.is_file()).collect();
                    files.sort();
                    files
                }
                Err(e) => {
                    return ToolResult::failure(format!("Invalid file pattern: {}", e));
                }
            }
        };

        let display_base = if base.is_file() {
            base.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            base.clone()
        };

        let mut lines = Vec::new();
        let mut matches = Vec::new();
        let mut truncated = false;

        'files: for file in &files {
            let bytes = match fs::read(file) {
                Ok(b) => b,
                Err(e) => {
                    debug!(path = ?file, error = %e, "Skipping unreadable file");
                    continue;
                }
            };
            if is_binary(&bytes) {
                continue;
            }
            let text = String::from_utf8_lossy(&bytes);
            let shown = relative_to(file, &display_base);

            for (i, line) in text.lines().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                if matches.len() >= MAX_CONTENT_MATCHES {
                    truncated = true;
                    break 'files;
                }
                lines.push(format!("{}:{}: {}", shown, i + 1, line.trim_end()));
                matches.push(json!({
                    "file": shown,
                    "line": i + 1,
                    "text": line.trim_end(),
                }));
            }
        }

        let mut content = if lines.is_empty() {
            format!("No matches found for '{}'", pattern)
        } else {
            lines.join("\n")
        };
        if truncated {
            content.push_str(&format!(
                "\n(results truncated at {} matches)",
                MAX_CONTENT_MATCHES
            ));
        }

        ToolResult::ok(content)
            .with("count", matches.len())
            .with("matches", matches)
            .with("truncated", truncated)
    }
}

/// Run a shell command inside the workspace
struct ExecuteCommandTool;

impl Tool for ExecuteCommandTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_command".to_string(),
            description: "Execute a shell command and return its combined stdout/stderr and exit \
                code. Runs in the workspace root unless working_directory is given."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    },
                    "working_directory": {
                        "type": "string",
                        "description": "Directory to run in, relative to the workspace"
                    }
                }),
                &["command"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(command) = str_arg(input, "command") else {
            return missing("command");
        };
        let cwd = match str_arg(input, "working_directory") {
            Some(dir) => paths.resolve_write(dir),
            None => paths.workspace_root().to_path_buf(),
        };
        if !cwd.is_dir() {
            return ToolResult::failure(format!(
                "Working directory does not exist: '{}'",
                paths.display(&cwd)
            ));
        }

        #[cfg(windows)]
        let output = Command::new("cmd")
            .args(["/C", command])
            .current_dir(&cwd)
            .output();

        #[cfg(not(windows))]
        let output = Command::new("bash")
            .args(["-c", command])
            .current_dir(&cwd)
            .output();

        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                let mut result = String::new();
                if !stdout.is_empty() {
                    result.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !result.is_empty() {
                        result.push('\n');
                    }
                    result.push_str("stderr: ");
                    result.push_str(&stderr);
                }
                if result.is_empty() {
                    result = "(command completed with no output)".to_string();
                }
                let result = truncate_output(result, MAX_COMMAND_OUTPUT, "output");

                // killed by a signal: no exit code
                let exit_code = output.status.code().unwrap_or(-1);
                let mut tool_result = ToolResult::ok(result).with("exit_code", exit_code);
                if !output.status.success() {
                    tool_result.success = false;
                    tool_result.error = Some(format!("Command exited with code {}", exit_code));
                }
                tool_result
            }
            Err(e) => ToolResult::failure(format!("Failed to execute command: {}", e))
                .with("exit_code", -1),
        }
    }
}

/// Recursive mkdir inside the workspace
struct CreateDirectoryTool;

impl Tool for CreateDirectoryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "create_directory".to_string(),
            description: "Create a directory in the workspace, including missing parents. \
                Succeeds if the directory already exists."
                .to_string(),
            input_schema: object_schema(
                json!({
                    "path": {
                        "type": "string",
                        "description": "The directory to create"
                    }
                }),
                &["path"],
            ),
        }
    }

    fn execute(&self, input: &Value, paths: &PathResolver) -> ToolResult {
        let Some(path) = str_arg(input, "path") else {
            return missing("path");
        };
        let dir = paths.resolve_write(path);
        let shown = paths.display(&dir);

        if dir.is_dir() {
            return ToolResult::ok(format!("Directory already exists: '{}'", shown))
                .with("path", shown)
                .with("created", false);
        }

        match fs::create_dir_all(&dir) {
            Ok(()) => ToolResult::ok(format!("Created directory '{}'", shown))
                .with("path", shown)
                .with("created", true),
            Err(e) => ToolResult::failure(format!("Failed to create directory '{}': {}", path, e)),
        }
    }
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
