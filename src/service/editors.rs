/// Local editors found on PATH that can open a workspace directory
use std::path::PathBuf;

use serde::Serialize;

/// One editor the host can open a workspace with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditorOption {
    pub identifier: String,
    pub label: String,
    /// Command prefix; the workspace directory is appended
    pub args: Vec<String>,
    pub info: Option<String>,
}

struct KnownEditor {
    identifier: &'static str,
    label: &'static str,
    program: &'static str,
    args: &'static [&'static str],
    info: Option<&'static str>,
    macos_only: bool,
}

const KNOWN_EDITORS: &[KnownEditor] = &[
    KnownEditor {
        identifier: "code",
        label: "Visual Studio Code (code)",
        program: "code",
        args: &["code"],
        info: None,
        macos_only: false,
    },
    KnownEditor {
        identifier: "code-insiders",
        label: "Visual Studio Code Insiders",
        program: "code-insiders",
        args: &["code-insiders"],
        info: None,
        macos_only: false,
    },
    KnownEditor {
        identifier: "code-server",
        label: "code-server",
        program: "code-server",
        args: &["code-server"],
        info: Some("http://127.0.0.1:8080"),
        macos_only: false,
    },
    KnownEditor {
        identifier: "macos-open-vscode",
        label: "Visual Studio Code (macOS)",
        program: "open",
        args: &["open", "-a", "Visual Studio Code"],
        info: None,
        macos_only: true,
    },
];

/// Editors available on this host, in a fixed order
pub fn detect_editor_options() -> Vec<EditorOption> {
    detect_with(cfg!(target_os = "macos"), |name| which::which(name).ok())
}

pub fn detect_with<F>(macos: bool, find: F) -> Vec<EditorOption>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    KNOWN_EDITORS
        .iter()
        .filter(|editor| macos || !editor.macos_only)
        .filter(|editor| find(editor.program).is_some())
        .map(|editor| EditorOption {
            identifier: editor.identifier.to_string(),
            label: editor.label.to_string(),
            args: editor.args.iter().map(|arg| arg.to_string()).collect(),
            info: editor.info.map(str::to_string),
        })
        .collect()
}
