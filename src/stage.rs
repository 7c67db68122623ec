//! Enrichment stages.
//!
//! [`enrichment`] returns the stages every batch goes through before it is
//! handed to a sender, in the order they must run:
//!
//! 1. [`Formatting`] normalizes paths.
//! 2. [`Filtering`] drops excluded and missing entities.
//! 3. [`ProjectDetection`] fills in project and branch.
//! 4. [`ProjectFilter`] drops heartbeats without a project, if configured.
//! 5. [`FileStats`] counts lines.
//! 6. [`Sanitization`] redacts. Nothing after it sees raw values.

mod filestats;
mod filter;
mod format;
mod project;
mod sanitize;

use std::path::PathBuf;

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::Settings;
use crate::model::{EntityType, Heartbeat};
use crate::pipeline::Stage;

pub use filestats::FileStats;
pub use filter::{Filtering, ProjectFilter};
pub use format::Formatting;
pub use project::ProjectDetection;
pub use sanitize::Sanitization;

/// The enrichment stages for `settings`, in execution order.
pub fn enrichment<'a>(settings: &Settings) -> Vec<Box<dyn Stage + 'a>> {
    vec![
        Box::new(Formatting),
        Box::new(Filtering::new(settings)),
        Box::new(ProjectDetection),
        Box::new(ProjectFilter::new(settings.exclude_unknown_project)),
        Box::new(FileStats),
        Box::new(Sanitization::new(settings)),
    ]
}

/// Compiles case-insensitive patterns. Invalid ones are skipped with a warning.
fn compile_patterns(setting: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| {
            match RegexBuilder::new(p.trim()).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("ignoring invalid {setting} pattern {p:?}: {e}");
                    None
                }
            }
        })
        .collect()
}

fn matches_any(patterns: &[Regex], text: &str) -> bool {
    patterns.iter().any(|re| re.is_match(text))
}

/// Whether the entity is a remote address rather than a local path.
fn is_remote(entity: &str) -> bool {
    entity.starts_with("ssh://") || entity.starts_with("sftp://")
}

/// The local file backing a heartbeat, if there is one to look at.
fn local_path(h: &Heartbeat) -> Option<PathBuf> {
    if h.entity_type != EntityType::File {
        return None;
    }
    if h.local_file.is_none() && is_remote(&h.entity) {
        return None;
    }
    h.file_path()
}
