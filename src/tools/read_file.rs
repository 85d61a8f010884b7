//! `read_file` — read a text file under the project root.
//!
//! Paths are resolved lexically against the root first (`..` may not climb
//! above it), then canonicalized so a symlink cannot point outside either.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use super::{required_str, NativeTool, ToolContext, ToolError};
use crate::inference::types::ToolDefinition;

const TOOL_NAME: &str = "read_file";

/// Content beyond this many bytes is cut and flagged as truncated.
pub const MAX_READ_BYTES: usize = 64 * 1024;

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Join `requested` onto `root` without touching the filesystem.
///
/// Fails when a `..` would leave the root, or when an absolute path does not
/// lie under it.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let outside = || ToolError::OutsideRoot {
        path: requested.to_string(),
    };

    let root = normalize(root);
    let candidate = Path::new(requested);

    let relative = if candidate.is_absolute() {
        normalize(candidate)
            .strip_prefix(&root)
            .map(Path::to_path_buf)
            .map_err(|_| outside())?
    } else {
        candidate.to_path_buf()
    };

    let mut resolved = root.clone();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(outside());
                }
                resolved.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside()),
        }
    }
    Ok(resolved)
}

/// Lexically collapse `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn truncate_at_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[async_trait]
impl NativeTool for ReadFileTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            TOOL_NAME,
            "Read a text file from the project. Paths are relative to the project root.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": {
                        "type": "string",
                        "description": "Path of the file, relative to the project root"
                    }
                },
                "required": ["filePath"]
            }),
            false,
        )
    }

    async fn execute(
        &self,
        args: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let requested = required_str(TOOL_NAME, args, "filePath")?;
        let path = resolve_in_root(&self.root, requested)?;

        let io_err = |e: std::io::Error| ToolError::Io {
            path: requested.to_string(),
            reason: e.to_string(),
        };

        // symlinks are only visible after canonicalization
        let canonical_root = tokio::fs::canonicalize(&self.root).await.map_err(io_err)?;
        let canonical = tokio::fs::canonicalize(&path).await.map_err(io_err)?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ToolError::OutsideRoot {
                path: requested.to_string(),
            });
        }

        let metadata = tokio::fs::metadata(&canonical).await.map_err(io_err)?;
        if metadata.is_dir() {
            return Err(ToolError::Io {
                path: requested.to_string(),
                reason: "is a directory".to_string(),
            });
        }

        let bytes = tokio::fs::read(&canonical).await.map_err(io_err)?;
        let text = String::from_utf8_lossy(&bytes);
        let content = truncate_at_boundary(&text, MAX_READ_BYTES);
        let truncated = content.len() < text.len();

        tracing::debug!(path = %canonical.display(), bytes = bytes.len(), truncated, "read_file");

        let relative = canonical
            .strip_prefix(&canonical_root)
            .unwrap_or(canonical.as_path())
            .to_string_lossy()
            .replace('\\', "/");

        Ok(json!({
            "path": relative,
            "content": content,
            "size": metadata.len(),
            "truncated": truncated,
        }))
    }
}
