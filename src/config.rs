//! Cadence configuration.
//!
//! User settings live in `~/.cadence.toml`. Internal state (backoff
//! bookkeeping) lives in `~/.cadence/internal.toml` so that rewriting it
//! never touches the user's file. Both are plain TOML, read and written
//! through [`ConfigStore`].
//!
//! `CADENCE_HOME` relocates the home directory used for every default path.

mod store;

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer};

#[cfg(test)]
pub use store::MemoryStore;
pub use store::{ConfigStore, TomlStore};

/// Errors that can occur while loading or writing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    HomeDir,

    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.wakatime.com/api/v1";

/// Default number of queued heartbeats synced per invocation.
pub const DEFAULT_SYNC_MAX: usize = 1000;

/// Cadence configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
}

/// The `[settings]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub debug: bool,
    pub log_file: Option<PathBuf>,

    /// Request timeout in seconds.
    pub timeout: Option<u64>,

    /// Regex patterns for entities that must never be sent.
    #[serde(deserialize_with = "patterns")]
    pub exclude: Vec<String>,
    /// Regex patterns that override `exclude`.
    #[serde(deserialize_with = "patterns")]
    pub include: Vec<String>,
    pub include_only_with_project_file: bool,
    pub exclude_unknown_project: bool,

    #[serde(deserialize_with = "patterns")]
    pub hide_file_names: Vec<String>,
    #[serde(deserialize_with = "patterns")]
    pub hide_project_names: Vec<String>,
    #[serde(deserialize_with = "patterns")]
    pub hide_branch_names: Vec<String>,
    pub hide_project_folder: bool,

    /// Whether heartbeats may be persisted locally when sending fails.
    pub offline: bool,
    pub offline_queue_file: Option<PathBuf>,
    pub sync_max: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            debug: false,
            log_file: None,
            timeout: None,
            exclude: Vec::new(),
            include: Vec::new(),
            include_only_with_project_file: false,
            exclude_unknown_project: false,
            hide_file_names: Vec::new(),
            hide_project_names: Vec::new(),
            hide_branch_names: Vec::new(),
            hide_project_folder: false,
            offline: true,
            offline_queue_file: None,
            sync_max: DEFAULT_SYNC_MAX,
        }
    }
}

/// A pattern list as written in TOML.
#[derive(Deserialize)]
#[serde(untagged)]
enum PatternList {
    Flag(bool),
    Lines(String),
    List(Vec<String>),
}

/// Accepts an array, a newline-separated string, or a boolean where `true`
/// matches everything and `false` nothing.
fn patterns<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let list = match PatternList::deserialize(deserializer)? {
        PatternList::Flag(true) => vec![".*".to_string()],
        PatternList::Flag(false) => Vec::new(),
        PatternList::Lines(s) => match s.trim() {
            "true" => vec![".*".to_string()],
            "false" => Vec::new(),
            _ => s.lines().map(str::trim).map(String::from).collect(),
        },
        PatternList::List(v) => v,
    };
    Ok(list.into_iter().filter(|p| !p.trim().is_empty()).collect())
}

impl Settings {
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(DEFAULT_API_URL)
    }

    pub fn offline_disabled(&self) -> bool {
        !self.offline
    }
}

impl Config {
    /// Load config from `path`.
    ///
    /// A missing file is the default configuration, not an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("config file not present at {}", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved locations of every file Cadence touches.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config: PathBuf,
    pub internal_config: PathBuf,
    pub offline_queue: PathBuf,
    pub log_file: PathBuf,
}

impl Paths {
    /// Default paths under the Cadence home directory.
    pub fn resolve() -> Result<Self, ConfigError> {
        let home = home_dir().ok_or(ConfigError::HomeDir)?;
        Ok(Self::under(&home))
    }

    /// Default paths relative to `home`.
    pub fn under(home: &Path) -> Self {
        let data = home.join(".cadence");
        Self {
            config: home.join(".cadence.toml"),
            internal_config: data.join("internal.toml"),
            offline_queue: data.join("offline.sqlite"),
            log_file: data.join("cadence.log"),
        }
    }
}

/// The Cadence home directory: `CADENCE_HOME`, or the user's home.
pub fn home_dir() -> Option<PathBuf> {
    if let Ok(home) = env::var("CADENCE_HOME")
        && !home.is_empty()
    {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir()
}

/// Everything a command needs: loaded settings and resolved paths.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub plugin: Option<String>,
}

impl Context {
    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// The offline queue file, honoring the `offline_queue_file` setting.
    pub fn queue_path(&self) -> PathBuf {
        self.settings()
            .offline_queue_file
            .clone()
            .unwrap_or_else(|| self.paths.offline_queue.clone())
    }
}
