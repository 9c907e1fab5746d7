//! Path resolution for tool calls.
//!
//! Reads search a prioritized list of roots (workspace first, then the
//! framework/template root) so agents can consult bundled content. Writes are
//! always confined to the workspace root: bundled content can be read but
//! never overwritten.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct PathResolver {
    workspace: PathBuf,
    framework: Option<PathBuf>,
}

impl PathResolver {
    /// Create a resolver. Relative roots are anchored at the current directory.
    pub fn new(workspace: impl Into<PathBuf>, framework: Option<PathBuf>) -> Self {
        Self {
            workspace: absolutize(&workspace.into()),
            framework: framework.map(|p| absolutize(&p)),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace
    }

    pub fn framework_root(&self) -> Option<&Path> {
        self.framework.as_deref()
    }

    /// Resolve a path for reading.
    ///
    /// Returns the first candidate that exists across the read roots, falling
    /// back to the workspace-relative path so errors name a sensible location.
    pub fn resolve_read(&self, path: &str) -> PathBuf {
        let requested = Path::new(path);
        if requested.is_absolute() {
            return normalize(requested);
        }

        for root in self.read_roots() {
            let candidate = normalize(&root.join(requested));
            if candidate.exists() {
                return candidate;
            }
        }

        normalize(&self.workspace.join(requested))
    }

    /// Resolve a path for writing; the result always lies under the workspace.
    ///
    /// Absolute paths outside the workspace, and relative paths whose `..`
    /// components climb out of it, are redirected to `<workspace>/<basename>`.
    pub fn resolve_write(&self, path: &str) -> PathBuf {
        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            normalize(requested)
        } else {
            normalize(&self.workspace.join(requested))
        };

        if joined.starts_with(&self.workspace) {
            return joined;
        }

        match requested.file_name() {
            Some(name) => self.workspace.join(name),
            None => self.workspace.clone(),
        }
    }

    /// Display a path relative to the workspace when possible
    pub fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace)
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    fn read_roots(&self) -> impl Iterator<Item = &PathBuf> {
        std::iter::once(&self.workspace).chain(self.framework.iter())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize(&cwd.join(path))
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
