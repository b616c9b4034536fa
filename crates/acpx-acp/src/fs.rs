//! File system handlers exposed to agents
//!
//! `fs/read_text_file` and `fs/write_text_file` run locally on behalf of
//! the agent, sandboxed to the session working directory: a path whose
//! realpath escapes the cwd fails with a well-formed ACP error before any
//! file content is touched.

use std::path::{Component, Path, PathBuf};

use acpx_core::acp::{ReadTextFileParams, ReadTextFileResult, WriteTextFileParams};
use acpx_core::jsonrpc::{codes, RpcErrorObject};
use serde_json::Value;

/// Sandboxed file access rooted at the session cwd
#[derive(Debug, Clone)]
pub struct FsHandler {
    root: PathBuf,
}

fn invalid_params(message: impl Into<String>) -> RpcErrorObject {
    RpcErrorObject {
        code: codes::INVALID_PARAMS,
        message: message.into(),
        data: None,
    }
}

fn internal_error(message: impl Into<String>) -> RpcErrorObject {
    RpcErrorObject {
        code: codes::INTERNAL_ERROR,
        message: message.into(),
        data: None,
    }
}

impl FsHandler {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        let cwd: PathBuf = cwd.into();
        let root = cwd.canonicalize().unwrap_or(cwd);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a request path and require containment in the root
    ///
    /// Existing paths are canonicalized (symlinks resolved); for paths
    /// that do not exist yet the components are folded manually so `..`
    /// cannot escape.
    fn contained(&self, path: &Path) -> Result<PathBuf, RpcErrorObject> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let resolved = match absolute.canonicalize() {
            Ok(real) => real,
            Err(_) => {
                let mut folded = PathBuf::new();
                for component in absolute.components() {
                    match component {
                        Component::ParentDir => {
                            folded.pop();
                        }
                        Component::CurDir => {}
                        other => folded.push(other),
                    }
                }
                // Canonicalize the deepest existing ancestor so symlinked
                // parents cannot smuggle the path outside the root.
                let mut existing = folded.clone();
                let mut tail = Vec::new();
                while !existing.exists() {
                    match (existing.parent(), existing.file_name()) {
                        (Some(parent), Some(name)) => {
                            tail.push(name.to_os_string());
                            existing = parent.to_path_buf();
                        }
                        _ => break,
                    }
                }
                let mut real = existing.canonicalize().unwrap_or(existing);
                for name in tail.into_iter().rev() {
                    real.push(name);
                }
                real
            }
        };

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(invalid_params(format!(
                "path {} is outside the session working directory",
                path.display()
            )))
        }
    }

    /// Handle `fs/read_text_file`
    pub async fn read_text_file(
        &self,
        params: ReadTextFileParams,
    ) -> Result<Value, RpcErrorObject> {
        let path = self.contained(&params.path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| internal_error(format!("failed to read {}: {}", path.display(), e)))?;

        let content = slice_lines(&content, params.line, params.limit);
        serde_json::to_value(ReadTextFileResult { content })
            .map_err(|e| internal_error(e.to_string()))
    }

    /// Handle `fs/write_text_file`: atomic temp-and-rename inside the root
    pub async fn write_text_file(
        &self,
        params: WriteTextFileParams,
    ) -> Result<Value, RpcErrorObject> {
        let path = self.contained(&params.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| internal_error(format!("failed to create {}: {}", parent.display(), e)))?;
        }

        let tmp = path.with_extension(format!("acpx-tmp.{}", std::process::id()));
        tokio::fs::write(&tmp, params.content.as_bytes())
            .await
            .map_err(|e| internal_error(format!("failed to write {}: {}", path.display(), e)))?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(internal_error(format!(
                "failed to replace {}: {}",
                path.display(),
                err
            )));
        }

        Ok(serde_json::json!({}))
    }
}

/// Apply the optional 1-based `line` offset and `limit` of a read
fn slice_lines(content: &str, line: Option<u64>, limit: Option<u64>) -> String {
    if line.is_none() && limit.is_none() {
        return content.to_string();
    }
    let skip = line.map(|l| l.saturating_sub(1) as usize).unwrap_or(0);
    let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    content
        .lines()
        .skip(skip)
        .take(take)
        .collect::<Vec<_>>()
        .join("\n")
}
