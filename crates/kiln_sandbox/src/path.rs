//! Project-relative path normalization.
//!
//! Both the generation state and every backend key files by the same
//! normalized form, so `./src/x.ts`, `/src/x.ts` and `src\x.ts` all refer
//! to `src/x.ts`.

use crate::error::{SandboxError, SandboxResult};

/// Normalize a project-relative file path.
///
/// Backslashes become `/`, leading `./` and `/` are stripped, empty and `.`
/// segments are dropped. Paths that are empty after normalization or that
/// contain a `..` segment are rejected.
pub fn normalize_path(path: &str) -> SandboxResult<String> {
    let unified = path.trim().replace('\\', "/");

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(SandboxError::InvalidPath {
                    path: path.to_string(),
                    reason: "parent directory segments are not allowed".to_string(),
                })
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(SandboxError::InvalidPath {
            path: path.to_string(),
            reason: "path is empty".to_string(),
        });
    }

    Ok(segments.join("/"))
}
