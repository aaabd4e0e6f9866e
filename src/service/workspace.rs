/// Workspace directories: naming, preparation, devcontainer template and
/// sandboxed file access
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::service::{ServiceError, ServiceResult};

/// Placeholder substituted with the project name in the template
const PROJECT_NAME_PLACEHOLDER: &str = "__PROJECT_NAME__";

/// Name used when a session has no project name
const DEFAULT_PROJECT_NAME: &str = "Android Dev Container";

const DEVCONTAINER_DIR: &str = ".devcontainer";
const DEVCONTAINER_FILE: &str = "devcontainer.json";

const DEFAULT_DEVCONTAINER_TEMPLATE: &str = r#"{
  "name": "__PROJECT_NAME__",
  "image": "android-dev-base:latest",
  "workspaceFolder": "/workspace",
  "workspaceMount": "source=${localWorkspaceFolder},target=/workspace,type=bind",
  "remoteUser": "root",
  "customizations": {
    "vscode": {
      "extensions": [
        "vscjava.vscode-java-pack",
        "mathiasfrohlich.Kotlin"
      ]
    }
  }
}
"#;

/// Lowercase, collapse runs of anything outside `[a-z0-9]` into one `-`, trim `-`
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.to_lowercase().chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// `<yyyymmdd-HHMMSS>-<slug>-<id>`, or `<yyyymmdd-HHMMSS>-<id>` without a slug
pub fn folder_name(created_at: DateTime<Utc>, project_name: &str, session_id: &str) -> String {
    let timestamp = created_at.format("%Y%m%d-%H%M%S");
    let slug = slugify(project_name);
    if slug.is_empty() {
        format!("{}-{}", timestamp, session_id)
    } else {
        format!("{}-{}-{}", timestamp, slug, session_id)
    }
}

/// Clone `repo_url` into `dir`, or create an empty `dir`.
///
/// An existing directory is reused untouched. A failed clone leaves no
/// directory behind.
pub async fn prepare_workspace(dir: &Path, repo_url: Option<&str>) -> ServiceResult<()> {
    if fs::try_exists(dir).await? {
        info!(dir = ?dir, "Reusing existing workspace directory");
        return Ok(());
    }

    let Some(url) = repo_url.filter(|url| !url.trim().is_empty()) else {
        fs::create_dir_all(dir).await?;
        info!(dir = ?dir, "Initialised empty workspace directory");
        return Ok(());
    };

    if let Some(parent) = dir.parent() {
        fs::create_dir_all(parent).await?;
    }

    info!(repo_url = %url, dir = ?dir, "Cloning repository");
    let output = Command::new("git")
        .arg("clone")
        .arg("--")
        .arg(url)
        .arg(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await;

    let failure = match output {
        Ok(output) if output.status.success() => {
            info!(repo_url = %url, dir = ?dir, "Repository cloned");
            return Ok(());
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                format!("git clone exited with {}", output.status)
            } else {
                stderr
            }
        }
        Err(e) => format!("failed to run git: {}", e),
    };

    if fs::try_exists(dir).await.unwrap_or(false) {
        if let Err(e) = fs::remove_dir_all(dir).await {
            warn!(dir = ?dir, error = %e, "Failed to remove partial clone");
        }
    }
    warn!(repo_url = %url, error = %failure, "Repository clone failed");
    Err(ServiceError::WorkspacePreparationFailed(format!(
        "git clone failed: {}",
        failure
    )))
}

/// Render `.devcontainer/devcontainer.json` unless it already exists.
///
/// `template` overrides the built-in template.
pub async fn apply_template(
    dir: &Path,
    project_name: &str,
    template: Option<&Path>,
) -> ServiceResult<()> {
    let target_dir = dir.join(DEVCONTAINER_DIR);
    let target = target_dir.join(DEVCONTAINER_FILE);
    if fs::try_exists(&target).await? {
        debug!(path = ?target, "devcontainer.json already present, skipping template");
        return Ok(());
    }

    let source = match template {
        Some(path) => fs::read_to_string(path).await.map_err(|e| {
            ServiceError::WorkspacePreparationFailed(format!(
                "cannot read devcontainer template {}: {}",
                path.display(),
                e
            ))
        })?,
        None => DEFAULT_DEVCONTAINER_TEMPLATE.to_string(),
    };

    let name = if project_name.trim().is_empty() {
        DEFAULT_PROJECT_NAME
    } else {
        project_name
    };
    let rendered = source.replace(PROJECT_NAME_PLACEHOLDER, name);

    fs::create_dir_all(&target_dir).await?;
    fs::write(&target, rendered).await?;
    info!(path = ?target, "Rendered devcontainer template");
    Ok(())
}

/// Resolve a client-supplied relative path inside `root`.
///
/// Rejects absolute paths, `..` that climbs above the root and symlinks that
/// resolve outside it. The result may not exist yet.
pub async fn resolve_workspace_path(root: &Path, raw: &str) -> ServiceResult<PathBuf> {
    let base = fs::canonicalize(root).await?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(base);
    }

    let mut relative = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(ServiceError::InvalidPathEscape(raw.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ServiceError::InvalidPathEscape(raw.to_string()));
            }
        }
    }
    let candidate = base.join(&relative);

    // 从最近的已存在祖先开始解析符号链接；悬空链接算作存在，canonicalize 会拒绝它
    let mut existing = candidate.clone();
    let mut missing = Vec::new();
    while fs::symlink_metadata(&existing).await.is_err() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                missing.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => return Err(ServiceError::InvalidPathEscape(raw.to_string())),
        }
    }
    let mut resolved = fs::canonicalize(&existing).await?;
    if !resolved.starts_with(&base) {
        return Err(ServiceError::InvalidPathEscape(raw.to_string()));
    }
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// `path` relative to `root` with `/` separators, empty for the root itself
pub fn relative_display(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

/// Contents of one workspace directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryListing {
    pub path: String,
    pub parent: Option<String>,
    pub entries: Vec<DirectoryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// List a directory: directories first, then files, case-insensitive by name
pub async fn list_directory(root: &Path, raw: &str) -> ServiceResult<DirectoryListing> {
    let base = fs::canonicalize(root).await?;
    let target = resolve_workspace_path(root, raw).await?;
    if !fs::metadata(&target)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
    {
        return Err(ServiceError::NotADirectory(raw.to_string()));
    }

    let mut entries = Vec::new();
    let mut reader = fs::read_dir(&target).await?;
    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        // 跟随符号链接判断类型
        let is_dir = fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        entries.push(DirectoryEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: relative_display(&base, &path),
            kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
        });
    }
    entries.sort_by(|a, b| {
        (a.kind != EntryKind::Dir, a.name.to_lowercase())
            .cmp(&(b.kind != EntryKind::Dir, b.name.to_lowercase()))
    });

    let parent = if target == base {
        None
    } else {
        target.parent().map(|parent| relative_display(&base, parent))
    };

    Ok(DirectoryListing {
        path: relative_display(&base, &target),
        parent,
        entries,
    })
}

/// Read a workspace file as lossy UTF-8
pub async fn read_file(root: &Path, raw: &str) -> ServiceResult<FileContent> {
    let base = fs::canonicalize(root).await?;
    let target = resolve_workspace_path(root, raw).await?;
    if fs::metadata(&target).await?.is_dir() {
        return Err(ServiceError::IsADirectory(raw.to_string()));
    }
    let bytes = fs::read(&target).await?;
    Ok(FileContent {
        path: relative_display(&base, &target),
        content: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Write a workspace file, creating parent directories
pub async fn write_file(root: &Path, raw: &str, content: &str) -> ServiceResult<()> {
    let target = resolve_workspace_path(root, raw).await?;
    if fs::metadata(&target)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
    {
        return Err(ServiceError::IsADirectory(raw.to_string()));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&target, content).await?;
    debug!(path = ?target, bytes = content.len(), "Wrote workspace file");
    Ok(())
}
