//! Chunk plan persistence and validation.
//!
//! The planner (an external collaborator) writes `plan.json` into a task's
//! spec directory. Foreman only loads it, validates its shape, and adopts its
//! chunks; it never plans chunks itself.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::Chunk;

/// On-disk plan format: the chunk list plus provenance of the spec document
/// that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// SHA-256 of the spec document the plan was generated from.
    pub spec_hash: String,
    pub generated_at: String,
    pub chunks: Vec<Chunk>,
}

impl PlanFile {
    pub fn new(spec_content: &str, chunks: Vec<Chunk>) -> Self {
        Self {
            spec_hash: hash_spec(spec_content),
            generated_at: chrono::Utc::now().to_rfc3339(),
            chunks,
        }
    }

    /// Load a plan from a JSON file and validate its shape.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let plan: PlanFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize plan file")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    /// Structural validation: every chunk has a non-empty, unique id and a
    /// description. Status values are already constrained by the enum.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.id.trim().is_empty() {
                anyhow::bail!("Chunk {} has an empty id", i);
            }
            if chunk.description.trim().is_empty() {
                anyhow::bail!("Chunk '{}' has an empty description", chunk.id);
            }
            if !seen.insert(chunk.id.as_str()) {
                anyhow::bail!("Duplicate chunk id '{}'", chunk.id);
            }
        }
        Ok(())
    }

    /// Whether the plan was generated from the given spec content. A stale
    /// hash is a warning condition for the caller, not an error.
    pub fn matches_spec(&self, spec_content: &str) -> bool {
        self.spec_hash == hash_spec(spec_content)
    }
}

pub fn hash_spec(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
