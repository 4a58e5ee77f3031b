use std::{borrow::Cow, path::Path};

pub fn normalise_path(path: &Path) -> Cow<'_, Path> {
    // Try to expand tilde prefix to home directory
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return Cow::Owned(home.join(stripped));
        }
        tracing::warn!("cannot determine home directory, using path as-is");
    }
    Cow::Borrowed(path)
}

/// Canonical spelling of a source path used as a breakpoint key
pub fn normalize_path_and_casing(path: &str) -> String {
    normalize_for_platform(path, cfg!(windows))
}

fn normalize_for_platform(path: &str, windows: bool) -> String {
    if windows {
        path.replace('/', "\\").to_lowercase()
    } else {
        path.replace('\\', "/")
    }
}
