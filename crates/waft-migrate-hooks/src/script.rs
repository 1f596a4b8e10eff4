use std::path::{Path, PathBuf};

/// How a hook script is executed, decided once from its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Python run inside a bootstrapped application environment.
    AppScript,
    ShellScript,
    SqlScript,
    /// A file whose first line names a script under one of the common hook
    /// roots.
    RedirectAlias,
}

impl HookKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Some(Self::AppScript),
            Some("sh") => Some(Self::ShellScript),
            Some("sql") => Some(Self::SqlScript),
            Some("link") => Some(Self::RedirectAlias),
            _ => None,
        }
    }

    pub fn comment_prefix(self) -> &'static str {
        match self {
            Self::SqlScript => "--",
            Self::AppScript | Self::ShellScript | Self::RedirectAlias => "#",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookScript {
    path: PathBuf,
    file_name: String,
    kind: Option<HookKind>,
}

impl HookScript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = HookKind::from_path(&path);
        Self {
            path,
            file_name,
            kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// `None` for extensions no interpreter handles.
    pub fn kind(&self) -> Option<HookKind> {
        self.kind
    }

    /// Identifier stored in the progress document.
    pub fn identifier(&self) -> String {
        self.path.display().to_string()
    }
}
