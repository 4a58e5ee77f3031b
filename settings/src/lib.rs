//! Settings for locating the interpreter
//!
//! Settings live in a JSON file which may contain comments, e.g.
//!
//! ```text
//! {
//!     // absolute, relative to this file, or starting with `~`
//!     "interpreterPath": "~/bin/interpreter",
//!     "testFiles": "tests/**/*.bbc"
//! }
//! ```
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::Deserialize;

/// Environment variable overriding the settings file location
pub const SETTINGS_ENV_VAR: &str = "INTERPRETER_DAP_SETTINGS";

const APPLICATION_DIR: &str = "interpreter-dap";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(alias = "path", alias = "cmdPath")]
    pub interpreter_path: Option<PathBuf>,
    pub test_files: Option<String>,
}

/// Source of the interpreter location
///
/// Resolution is synchronous; fetching or updating the interpreter binary is
/// someone else's job.
pub trait SettingsProvider: Send + Sync {
    /// The interpreter executable, if one is configured
    fn resolve_interpreter_path(&self) -> Option<PathBuf>;

    /// Where the user has to go to fix the configuration
    fn go_to_settings(&self) -> PathBuf;
}

pub fn load(mut r: impl std::io::Read) -> eyre::Result<Settings> {
    let mut contents = String::new();
    r.read_to_string(&mut contents)
        .wrap_err("reading settings contents")?;
    from_str(&contents)
}

pub fn from_str(contents: &str) -> eyre::Result<Settings> {
    let value = jsonc_parser::parse_to_serde_value(contents, &Default::default())
        .wrap_err("parsing jsonc settings")?;
    let Some(value) = value else {
        return Ok(Settings::default());
    };
    let settings = serde_json::from_value(value).wrap_err("deserializing settings")?;
    Ok(settings)
}

pub fn load_from_path(path: impl AsRef<Path>) -> eyre::Result<Settings> {
    let path = path.as_ref();
    let f = std::fs::File::open(path)
        .wrap_err_with(|| format!("opening settings file {}", path.display()))?;
    load(f).wrap_err("loading settings from given path")
}

/// `<config dir>/interpreter-dap/settings.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APPLICATION_DIR).join(SETTINGS_FILE))
}

/// Pick the settings file: an explicit path wins, then the environment, then the default
pub fn settings_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var_os(SETTINGS_ENV_VAR).map(PathBuf::from))
        .or_else(default_path)
}

/// Settings read from a file on disk
///
/// The file is re-read on every resolution so edits take effect without a
/// restart.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> eyre::Result<Settings> {
        load_from_path(&self.path)
    }

    fn resolve_relative(&self, configured: &Path) -> PathBuf {
        if let Ok(rest) = configured.strip_prefix("~") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        if configured.is_absolute() {
            return configured.to_path_buf();
        }
        match self.path.parent() {
            Some(dir) => dir.join(configured),
            None => configured.to_path_buf(),
        }
    }
}

impl SettingsProvider for FileSettings {
    fn resolve_interpreter_path(&self) -> Option<PathBuf> {
        let settings = match self.load() {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "could not read settings");
                return None;
            }
        };
        let configured = settings.interpreter_path?;
        let resolved = self.resolve_relative(&configured);
        tracing::debug!(path = %resolved.display(), "resolved interpreter path");
        Some(resolved)
    }

    fn go_to_settings(&self) -> PathBuf {
        self.path.clone()
    }
}
