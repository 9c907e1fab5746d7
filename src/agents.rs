//! Agent definitions: named system prompts with an optional tool subset and
//! model override.
//!
//! Agents are JSON files discovered in two places:
//! - the workspace agents directory (`storage.agents_dir`), writable
//! - `<framework_root>/agents`, read-only
//!
//! A workspace agent shadows a framework agent with the same id. The file stem
//! is the agent id.

use crate::history::{validate_id, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where an agent was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    Workspace,
    Framework,
}

/// A stored agent definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    /// Restricts the tool catalog; `None` means every tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Agent plus where it was loaded from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    #[serde(flatten)]
    pub definition: AgentDefinition,
    pub source: AgentSource,
}

/// What a client sends to create or update a workspace agent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub source: AgentSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl From<&Agent> for AgentSummary {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.definition.id.clone(),
            name: agent.definition.name.clone(),
            description: agent.definition.description.clone(),
            source: agent.source,
            tools: agent.definition.tools.clone(),
            model: agent.definition.model.clone(),
        }
    }
}

/// Lowercase id derived from a display name
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

fn load_agent_file(path: &Path, source: AgentSource) -> Result<Agent, StoreError> {
    let json = fs::read_to_string(path)?;
    let mut definition: AgentDefinition = serde_json::from_str(&json)?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    definition.id = stem;
    if definition.name.trim().is_empty() {
        definition.name = definition.id.clone();
    }
    Ok(Agent { definition, source })
}

/// Two-directory agent store
#[derive(Debug, Clone)]
pub struct AgentStore {
    workspace_dir: PathBuf,
    framework_dir: Option<PathBuf>,
}

impl AgentStore {
    pub fn new(workspace_dir: impl Into<PathBuf>, framework_root: Option<&Path>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            framework_dir: framework_root.map(|root| root.join("agents")),
        }
    }

    fn search_dirs(&self) -> Vec<(&Path, AgentSource)> {
        let mut dirs = vec![(self.workspace_dir.as_path(), AgentSource::Workspace)];
        if let Some(framework) = &self.framework_dir {
            dirs.push((framework.as_path(), AgentSource::Framework));
        }
        dirs
    }

    /// Walk both directories; workspace entries shadow framework ones
    pub fn discover(&self) -> Vec<AgentSummary> {
        let mut found: BTreeMap<String, Agent> = BTreeMap::new();

        for (dir, source) in self.search_dirs() {
            if !dir.exists() {
                debug!(path = ?dir, "Agent directory does not exist");
                continue;
            }
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = ?dir, error = %e, "Failed to read agent directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                if !path.extension().map(|e| e == "json").unwrap_or(false) {
                    continue;
                }
                match load_agent_file(&path, source) {
                    Ok(agent) => {
                        if validate_id(&agent.definition.id).is_err() {
                            warn!(path = ?path, "Agent file name is not a valid id, skipping");
                            continue;
                        }
                        if found.contains_key(&agent.definition.id) {
                            debug!(agent_id = %agent.definition.id, path = ?path, "Agent shadowed by workspace copy");
                            continue;
                        }
                        found.insert(agent.definition.id.clone(), agent);
                    }
                    Err(e) => warn!(path = ?path, error = %e, "Failed to load agent"),
                }
            }
        }

        let mut summaries: Vec<AgentSummary> = found.values().map(AgentSummary::from).collect();
        summaries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        summaries
    }

    /// Look an agent up, workspace first
    pub fn get(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        validate_id(id)?;
        for (dir, source) in self.search_dirs() {
            let path = dir.join(format!("{}.json", id));
            if path.exists() {
                return load_agent_file(&path, source).map(Some);
            }
        }
        Ok(None)
    }

    /// Create or update an agent in the workspace directory
    pub fn save(&self, draft: AgentDraft) -> Result<Agent, StoreError> {
        let id = match draft.id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                let slug = slugify(&draft.name);
                if slug.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    slug
                }
            }
        };
        validate_id(&id)?;

        let path = self.workspace_dir.join(format!("{}.json", id));
        let existing = if path.exists() {
            Some(load_agent_file(&path, AgentSource::Workspace)?)
        } else {
            None
        };

        let now = Utc::now();
        let definition = AgentDefinition {
            id: id.clone(),
            name: draft.name,
            description: draft.description,
            system_prompt: draft.system_prompt,
            tools: draft.tools,
            model: draft.model.filter(|m| !m.trim().is_empty()),
            created_at: existing
                .as_ref()
                .and_then(|a| a.definition.created_at)
                .or(Some(now)),
            updated_at: Some(now),
        };

        fs::create_dir_all(&self.workspace_dir)?;
        fs::write(&path, serde_json::to_string_pretty(&definition)?)?;
        info!(agent_id = %id, path = ?path, "Saved agent");

        Ok(Agent {
            definition,
            source: AgentSource::Workspace,
        })
    }

    /// Delete a workspace agent; framework agents are read-only
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        validate_id(id)?;
        let path = self.workspace_dir.join(format!("{}.json", id));
        if path.exists() {
            fs::remove_file(&path)?;
            info!(agent_id = %id, "Deleted agent");
            return Ok(true);
        }

        if let Some(framework) = &self.framework_dir {
            if framework.join(format!("{}.json", id)).exists() {
                return Err(StoreError::ReadOnly(id.to_string()));
            }
        }
        Ok(false)
    }
}
