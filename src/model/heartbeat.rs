//! Heartbeat: one observed unit of editor activity.

use std::{env, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What a heartbeat's entity refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    /// A path on disk, or a remote address such as `ssh://host/path`.
    #[default]
    File,

    /// An application name.
    App,

    /// A domain name.
    Domain,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::File => "file",
            Self::App => "app",
            Self::Domain => "domain",
        };
        f.write_str(s)
    }
}

/// The kind of activity a heartbeat records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    #[default]
    Coding,
    Building,
    Debugging,
    CodeReviewing,
    Learning,
    Meeting,
    Planning,
    Researching,
    RunningTests,
    WritingDocs,
    WritingTests,
}

/// One recorded unit of developer activity.
///
/// `entity` and `time` are always present. Everything else is optional and
/// may be filled in, overwritten, or redacted by pipeline stages.
///
/// Fields marked `#[serde(skip)]` are directives for the pipeline only.
/// They never reach the wire payload or the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub entity: String,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(default)]
    pub category: Category,

    /// Unix time in seconds with fractional precision.
    pub time: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_write: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursorpos: Option<u32>,

    /// Total lines in the file, filled in by the file stats stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    pub user_agent: String,

    /// Local copy of a remote entity, used for stats instead of `entity`.
    #[serde(skip)]
    pub local_file: Option<PathBuf>,

    /// Project name to use when detection finds nothing.
    #[serde(skip)]
    pub project_alternate: Option<String>,

    /// Root folder of the detected project.
    #[serde(skip)]
    pub project_path: Option<PathBuf>,
}

impl Heartbeat {
    /// Creates a heartbeat with only the mandatory fields set.
    pub fn new(entity: impl Into<String>, entity_type: EntityType, time: f64) -> Self {
        Self {
            entity: entity.into(),
            entity_type,
            category: Category::default(),
            time,
            is_write: None,
            lineno: None,
            cursorpos: None,
            lines: None,
            language: None,
            project: None,
            branch: None,
            user_agent: user_agent(None),
            local_file: None,
            project_alternate: None,
            project_path: None,
        }
    }

    /// Stable identity used to deduplicate queued heartbeats.
    pub fn id(&self) -> String {
        let key = format!(
            "{:.6}-{}-{}-{}-{}-{}",
            self.time,
            self.entity_type,
            self.entity,
            self.project.as_deref().unwrap_or_default(),
            self.branch.as_deref().unwrap_or_default(),
            self.is_write.unwrap_or(false),
        );
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    /// The path to read from disk for this heartbeat, if it is a file.
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.entity_type != EntityType::File {
            return None;
        }
        Some(
            self.local_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(&self.entity)),
        )
    }
}

/// Builds the user agent sent with every heartbeat.
///
/// Plugins identify themselves as `<editor>/<version> <plugin>/<version>`.
pub fn user_agent(plugin: Option<&str>) -> String {
    let plugin = plugin.filter(|p| !p.is_empty()).unwrap_or("Unknown/0");
    format!(
        "cadence/{} ({}-{}) {plugin}",
        env!("CARGO_PKG_VERSION"),
        env::consts::OS,
        env::consts::ARCH,
    )
}
