//! Review skill playbooks
//!
//! A skill is a `SKILL.md` file: YAML frontmatter followed by markdown
//! instructions that get appended to an agent's system prompt.
//!
//! ```markdown
//! ---
//! name: firebase-review
//! description: Audit a Firebase project
//! platform: firebase
//! checks:
//!   - security rules
//!   - auth providers
//! ---
//! Walk through the project and report...
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Result, TorqError};

const SKILL_FILE: &str = "SKILL.md";

/// Parsed skill definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub checks: Vec<String>,
    #[serde(skip_serializing)]
    pub instructions: String,
}

#[derive(Debug, Deserialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    checks: Vec<String>,
}

/// Parse a SKILL.md file into a SkillDefinition
pub fn parse_skill(content: &str) -> Result<SkillDefinition> {
    let content = content.trim();

    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| TorqError::Skill("SKILL.md must start with YAML frontmatter (---)".into()))?;

    let end = rest
        .find("\n---")
        .ok_or_else(|| TorqError::Skill("Missing closing --- in YAML frontmatter".into()))?;

    let yaml_str = &rest[..end];
    let instructions = rest[end + 4..].trim().to_string();

    let frontmatter: SkillFrontmatter = serde_yml::from_str(yaml_str)
        .map_err(|e| TorqError::Skill(format!("Failed to parse YAML frontmatter: {}", e)))?;

    if frontmatter.name.is_empty() {
        return Err(TorqError::Skill("Skill name cannot be empty".into()));
    }

    if !frontmatter
        .name
        .chars()
        .all(|c: char| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(TorqError::Skill(format!(
            "Skill name '{}' must be alphanumeric (with _ or -)",
            frontmatter.name
        )));
    }

    Ok(SkillDefinition {
        name: frontmatter.name,
        description: frontmatter.description,
        platform: frontmatter.platform,
        checks: frontmatter.checks,
        instructions,
    })
}

/// Loaded skills, sorted by name
#[derive(Debug, Clone, Default)]
pub struct SkillSet {
    skills: Vec<SkillDefinition>,
}

impl SkillSet {
    pub fn new(mut skills: Vec<SkillDefinition>) -> Self {
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills.dedup_by(|a, b| a.name == b.name);
        Self { skills }
    }

    pub fn get(&self, name: &str) -> Option<&SkillDefinition> {
        self.skills.iter().find(|s| s.name == name)
    }

    /// Like [`get`](Self::get) but reports unknown names as invalid requests
    pub fn require(&self, name: &str) -> Result<&SkillDefinition> {
        self.get(name)
            .ok_or_else(|| TorqError::InvalidRequest(format!("Unknown skill '{}'", name)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SkillDefinition> {
        self.skills.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Load every `<dir>/<skill>/SKILL.md`. A missing directory yields an empty
/// set; unparseable skill files are skipped.
pub fn load_skills_dir(dir: &Path) -> Result<SkillSet> {
    if !dir.exists() {
        debug!("Skills directory {} does not exist", dir.display());
        return Ok(SkillSet::default());
    }

    let mut skills = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let skill_file = path.join(SKILL_FILE);
        if !path.is_dir() || !skill_file.is_file() {
            continue;
        }

        let content = match std::fs::read_to_string(&skill_file) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read {}: {}", skill_file.display(), e);
                continue;
            }
        };

        match parse_skill(&content) {
            Ok(skill) => {
                debug!("Loaded skill '{}' from {}", skill.name, skill_file.display());
                skills.push(skill);
            }
            Err(e) => warn!("Skipping invalid skill {}: {}", skill_file.display(), e),
        }
    }

    Ok(SkillSet::new(skills))
}
