//! `load_skill` — return the instructions in `<skills_dir>/<name>/SKILL.md`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::json;

use super::{required_str, NativeTool, ToolContext, ToolError};
use crate::inference::types::ToolDefinition;

const TOOL_NAME: &str = "load_skill";
const SKILL_FILE: &str = "SKILL.md";

pub struct LoadSkillTool {
    skills_dir: PathBuf,
}

impl LoadSkillTool {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    /// Names of the skill directories that contain a `SKILL.md`, sorted.
    pub fn available_skills(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.skills_dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().join(SKILL_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| is_valid_skill_name(name))
            .collect();
        names.sort();
        names
    }
}

/// `[A-Za-z0-9_-]+`
pub fn is_valid_skill_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl NativeTool for LoadSkillTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        let mut description =
            "Load the instructions for a named skill before attempting the task it covers."
                .to_string();
        let skills = self.available_skills();
        if !skills.is_empty() {
            description.push_str(&format!(" Available skills: {}.", skills.join(", ")));
        }

        ToolDefinition::function(
            TOOL_NAME,
            description,
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "pattern": "^[A-Za-z0-9_-]+$",
                        "description": "Skill name"
                    }
                },
                "required": ["name"]
            }),
            false,
        )
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let name = required_str(TOOL_NAME, args, "name")?;
        if !is_valid_skill_name(name) {
            return Err(ToolError::invalid(
                TOOL_NAME,
                format!("skill name '{name}' may only contain letters, digits, '_' and '-'"),
            ));
        }

        let path = self.skills_dir.join(name).join(SKILL_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::Io {
                    path: format!("{name}/{SKILL_FILE}"),
                    reason: format!("skill '{name}' not found"),
                });
            }
            Err(e) => {
                return Err(ToolError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        Ok(json!({ "name": name, "content": content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pdf-report", "summarize_v2"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
            std::fs::write(dir.path().join(name).join(SKILL_FILE), format!("# {name}")).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        dir
    }

    #[test]
    fn test_skill_name_pattern() {
        assert!(is_valid_skill_name("pdf-report"));
        assert!(is_valid_skill_name("A_1"));
        assert!(!is_valid_skill_name(""));
        assert!(!is_valid_skill_name("../etc"));
        assert!(!is_valid_skill_name("a b"));
        assert!(!is_valid_skill_name("a/b"));
    }

    #[test]
    fn test_definition_lists_skills() {
        let dir = skills_dir();
        let tool = LoadSkillTool::new(dir.path());
        assert_eq!(tool.available_skills(), vec!["pdf-report", "summarize_v2"]);
        assert!(tool
            .definition()
            .function
            .description
            .contains("pdf-report, summarize_v2"));
    }

    #[tokio::test]
    async fn test_load_skill() {
        let dir = skills_dir();
        let tool = LoadSkillTool::new(dir.path());
        let ctx = ToolContext::default();

        let out = tool.execute(&json!({"name": "pdf-report"}), &ctx).await.unwrap();
        assert_eq!(out["content"], "# pdf-report");

        let err = tool.execute(&json!({"name": "empty"}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = tool.execute(&json!({"name": "../x"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
