//! Assistant profiles: named system/user prompt pairs stored as JSON.
//!
//! A profile directory holds one `<name>.json` file per assistant:
//!
//! ```json
//! { "system_prompt": "You are a careful transcriber.", "user_prompt": "Transcribe this page." }
//! ```
//!
//! The name is the file stem; it is not stored inside the file. Names are
//! plain file stems: no path separators and no `..`, so every operation stays
//! inside the profile directory.

use crate::error::PdfAssistError;
use crate::transcriber::Prompts;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const PROFILE_EXTENSION: &str = "json";

/// A named prompt pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    #[serde(skip)]
    pub name: String,
    #[serde(flatten)]
    pub prompts: Prompts,
}

impl Assistant {
    pub fn new(name: impl Into<String>, prompts: Prompts) -> Self {
        Self {
            name: name.into(),
            prompts,
        }
    }

    /// Read a profile file. The assistant is named after the file stem.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PdfAssistError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PdfAssistError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => PdfAssistError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => invalid(path, e.to_string()),
        })?;

        let mut assistant: Assistant =
            serde_json::from_str(&raw).map_err(|e| invalid(path, e.to_string()))?;
        assistant.name = name_of(path);
        debug!("Loaded assistant '{}' from {}", assistant.name, path.display());
        Ok(assistant)
    }

    /// Load `<dir>/<name>.json`.
    pub async fn find(dir: impl AsRef<Path>, name: &str) -> Result<Self, PdfAssistError> {
        Self::load(profile_path(dir.as_ref(), name)?).await
    }

    /// Write the profile as pretty-printed JSON, creating parent directories.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PdfAssistError> {
        let path = path.as_ref();
        let write_failed = |source| PdfAssistError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PdfAssistError::Internal(format!("serialise assistant: {e}")))?;
        tokio::fs::write(path, json).await.map_err(write_failed)
    }

    /// Save as `<dir>/<self.name>.json` and return the path written.
    pub async fn save_in(&self, dir: impl AsRef<Path>) -> Result<PathBuf, PdfAssistError> {
        let path = profile_path(dir.as_ref(), &self.name)?;
        self.save(&path).await?;
        Ok(path)
    }

    /// Remove `<dir>/<name>.json`.
    pub async fn delete(dir: impl AsRef<Path>, name: &str) -> Result<(), PdfAssistError> {
        let path = profile_path(dir.as_ref(), name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => PdfAssistError::FileNotFound { path: path.clone() },
                std::io::ErrorKind::PermissionDenied => {
                    PdfAssistError::PermissionDenied { path: path.clone() }
                }
                _ => invalid(&path, e.to_string()),
            })?;
        debug!("Deleted assistant '{}'", name);
        Ok(())
    }

    /// Rename profile `from` to `to`. Fails if `to` already exists.
    pub async fn rename(
        dir: impl AsRef<Path>,
        from: &str,
        to: &str,
    ) -> Result<PathBuf, PdfAssistError> {
        let dir = dir.as_ref();
        let source = profile_path(dir, from)?;
        Self::load(&source).await?;
        if from == to {
            return Ok(source);
        }
        let target = vacant_profile_path(dir, to).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| PdfAssistError::OutputWriteFailed {
                path: target.clone(),
                source: e,
            })?;
        debug!("Renamed assistant '{}' to '{}'", from, to);
        Ok(target)
    }

    /// Copy profile `from` under the new name `to`. Fails if `to` already exists.
    pub async fn duplicate(
        dir: impl AsRef<Path>,
        from: &str,
        to: &str,
    ) -> Result<PathBuf, PdfAssistError> {
        let dir = dir.as_ref();
        let source = Self::find(dir, from).await?;
        let target = vacant_profile_path(dir, to).await?;
        Assistant::new(to, source.prompts).save(&target).await?;
        Ok(target)
    }

    /// Names of every profile in `dir`, sorted. A missing directory has none.
    pub async fn list(dir: impl AsRef<Path>) -> Result<Vec<String>, PdfAssistError> {
        let dir = dir.as_ref();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(invalid(dir, e.to_string())),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| invalid(dir, e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PROFILE_EXTENSION) {
                names.push(name_of(&path));
            }
        }
        names.sort();
        Ok(names)
    }
}

fn profile_path(dir: &Path, name: &str) -> Result<PathBuf, PdfAssistError> {
    validate_name(name)?;
    Ok(dir.join(format!("{name}.{PROFILE_EXTENSION}")))
}

/// `profile_path`, but an existing profile of that name is an error.
async fn vacant_profile_path(dir: &Path, name: &str) -> Result<PathBuf, PdfAssistError> {
    let path = profile_path(dir, name)?;
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(PdfAssistError::InvalidConfig(format!(
            "an assistant named '{name}' already exists"
        )));
    }
    Ok(path)
}

fn validate_name(name: &str) -> Result<(), PdfAssistError> {
    let reason = if name.trim().is_empty() {
        "must not be empty"
    } else if name.contains(['/', '\\', '\0']) {
        "must not contain path separators"
    } else if name.contains("..") {
        "must not contain '..'"
    } else {
        return Ok(());
    };
    Err(PdfAssistError::InvalidConfig(format!(
        "invalid assistant name '{name}': {reason}"
    )))
}

fn name_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn invalid(path: &Path, detail: String) -> PdfAssistError {
    PdfAssistError::InvalidAssistant {
        path: path.to_path_buf(),
        detail,
    }
}
