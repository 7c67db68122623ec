//! Project and branch detection.
//!
//! Sources, first match wins for each field:
//!
//! 1. values already on the heartbeat (`--project`, extra heartbeat fields),
//! 2. a `.cadence-project` file in the entity's directory or any parent:
//!    line 1 is the project name, line 2 the branch,
//! 3. the nearest enclosing git repository: its folder name and checked-out
//!    branch,
//! 4. the alternate project (`--alternate-project`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::model::{Heartbeat, HeartbeatResult};
use crate::pipeline::{Next, Result, Stage};

use super::local_path;

/// Name of the file that pins a folder to a project.
pub const PROJECT_FILE: &str = ".cadence-project";

/// Fills in `project`, `branch`, and the project root directive.
pub struct ProjectDetection;

impl Stage for ProjectDetection {
    fn process(&self, mut heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        for h in &mut heartbeats {
            if let Some(path) = local_path(h) {
                detect(h, &path);
            }
            if h.project.as_deref().is_none_or(str::is_empty) {
                h.project = h.project_alternate.clone();
            }
        }
        next.run(heartbeats)
    }
}

fn detect(h: &mut Heartbeat, path: &Path) {
    if let Some(file) = find_project_file(path) {
        let root = file.parent().map(Path::to_path_buf);
        let contents = fs::read_to_string(&file).unwrap_or_else(|e| {
            warn!("failed to read {}: {e}", file.display());
            String::new()
        });
        let mut lines = contents.lines().map(str::trim);
        let name = lines
            .next()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .or_else(|| folder_name(root.as_deref()));
        let branch = lines.next().filter(|l| !l.is_empty()).map(String::from);

        debug!("found project file {}", file.display());
        fill(h, name, branch, root);
        return;
    }

    if let Some(root) = find_git_root(path) {
        let branch = git_branch(&root);
        fill(h, folder_name(Some(&root)), branch, Some(root));
    }
}

fn fill(h: &mut Heartbeat, project: Option<String>, branch: Option<String>, root: Option<PathBuf>) {
    if h.project.as_deref().is_none_or(str::is_empty) {
        h.project = project;
    }
    if h.branch.is_none() {
        h.branch = branch;
    }
    h.project_path = root;
}

fn folder_name(dir: Option<&Path>) -> Option<String> {
    dir?.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Finds [`PROJECT_FILE`] next to `path` or in any ancestor directory.
pub(super) fn find_project_file(path: &Path) -> Option<PathBuf> {
    path.parent()?
        .ancestors()
        .map(|dir| dir.join(PROJECT_FILE))
        .find(|candidate| candidate.is_file())
}

fn find_git_root(path: &Path) -> Option<PathBuf> {
    path.parent()?
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Reads the checked-out branch from `.git/HEAD`. Detached heads have none.
fn git_branch(root: &Path) -> Option<String> {
    let head = fs::read_to_string(root.join(".git").join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(String::from)
}
