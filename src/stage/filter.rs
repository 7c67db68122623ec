//! Dropping heartbeats that must not be sent.

use regex::Regex;
use tracing::debug;

use crate::config::Settings;
use crate::model::{Heartbeat, HeartbeatResult};
use crate::pipeline::{Next, Result, Stage};

use super::{compile_patterns, local_path, matches_any, project::find_project_file};

/// Drops excluded entities and local files that do not exist.
///
/// `include` patterns override `exclude`. If nothing is left the chain
/// stops here with an empty result list.
pub struct Filtering {
    exclude: Vec<Regex>,
    include: Vec<Regex>,
    include_only_with_project_file: bool,
}

impl Filtering {
    pub fn new(settings: &Settings) -> Self {
        Self {
            exclude: compile_patterns("exclude", &settings.exclude),
            include: compile_patterns("include", &settings.include),
            include_only_with_project_file: settings.include_only_with_project_file,
        }
    }

    fn skip_reason(&self, h: &Heartbeat) -> Option<&'static str> {
        if h.entity.trim().is_empty() {
            return Some("empty entity");
        }
        if !matches_any(&self.include, &h.entity) && matches_any(&self.exclude, &h.entity) {
            return Some("matches exclude pattern");
        }
        if let Some(path) = local_path(h) {
            if !path.is_file() {
                return Some("file does not exist");
            }
            if self.include_only_with_project_file && find_project_file(&path).is_none() {
                return Some("no project file found");
            }
        }
        None
    }
}

impl Stage for Filtering {
    fn process(&self, heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        let kept = retain_logged(heartbeats, |h| self.skip_reason(h));
        if kept.is_empty() {
            debug!("no heartbeats left after filtering, abort heartbeat handling");
            return Ok(Vec::new());
        }
        next.run(kept)
    }
}

/// Drops heartbeats without a project when `exclude_unknown_project` is set.
pub struct ProjectFilter {
    exclude_unknown: bool,
}

impl ProjectFilter {
    pub fn new(exclude_unknown: bool) -> Self {
        Self { exclude_unknown }
    }
}

impl Stage for ProjectFilter {
    fn process(&self, heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        if !self.exclude_unknown {
            return next.run(heartbeats);
        }
        let kept = retain_logged(heartbeats, |h| {
            h.project
                .as_deref()
                .is_none_or(|p| p.trim().is_empty())
                .then_some("unknown project")
        });
        if kept.is_empty() {
            debug!("no heartbeats left after project filtering");
            return Ok(Vec::new());
        }
        next.run(kept)
    }
}

fn retain_logged(
    heartbeats: Vec<Heartbeat>,
    skip: impl Fn(&Heartbeat) -> Option<&'static str>,
) -> Vec<Heartbeat> {
    heartbeats
        .into_iter()
        .filter(|h| match skip(h) {
            Some(reason) => {
                debug!("skipping heartbeat for {:?}: {reason}", h.entity);
                false
            }
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::fs;

    use tempfile::TempDir;

    use crate::model::EntityType;
    use crate::pipeline::Pipeline;
    use crate::stage::project::PROJECT_FILE;

    fn file(dir: &TempDir, name: &str) -> Heartbeat {
        let path = dir.path().join(name);
        fs::write(&path, "x\n").unwrap();
        Heartbeat::new(path.to_string_lossy(), EntityType::File, 1.0)
    }

    /// Runs `stage` and returns the entities that reached the sender.
    fn survivors(stage: impl Stage + 'static, batch: Vec<Heartbeat>) -> (Vec<String>, usize) {
        let sent = Cell::new(0);
        let entities = std::cell::RefCell::new(Vec::new());
        let pipeline = Pipeline::new(|hh: Vec<Heartbeat>| -> Result<Vec<HeartbeatResult>> {
            sent.set(sent.get() + 1);
            entities
                .borrow_mut()
                .extend(hh.iter().map(|h| h.entity.clone()));
            Ok(hh.iter().map(|_| HeartbeatResult::accepted()).collect())
        })
        .with(stage);
        pipeline.handle(batch).unwrap();
        drop(pipeline);
        (entities.into_inner(), sent.get())
    }

    fn settings(exclude: &[&str], include: &[&str]) -> Settings {
        Settings {
            exclude: exclude.iter().map(ToString::to_string).collect(),
            include: include.iter().map(ToString::to_string).collect(),
            ..Settings::default()
        }
    }

    #[test]
    fn exclude_drops_and_include_wins() {
        let dir = TempDir::new().unwrap();
        let keep = file(&dir, "keep.rs");
        let drop_me = file(&dir, "notes.md");
        let rescued = file(&dir, "README.md");
        let filter = Filtering::new(&settings(&["\\.MD$"], &["readme"]));

        let (entities, _) = survivors(filter, vec![keep.clone(), drop_me, rescued.clone()]);

        assert_eq!(entities, [keep.entity, rescued.entity]);
    }

    #[test]
    fn missing_local_files_are_dropped() {
        let dir = TempDir::new().unwrap();
        let present = file(&dir, "present.rs");
        let missing = Heartbeat::new(
            dir.path().join("gone.rs").to_string_lossy(),
            EntityType::File,
            1.0,
        );
        let app = Heartbeat::new("Slack", EntityType::App, 1.0);
        let remote = Heartbeat::new("ssh://host/etc/hosts", EntityType::File, 1.0);

        let (entities, _) = survivors(
            Filtering::new(&Settings::default()),
            vec![present.clone(), missing, app, remote],
        );

        assert_eq!(entities, [present.entity.as_str(), "Slack", "ssh://host/etc/hosts"]);
    }

    #[test]
    fn empty_remainder_stops_chain() {
        let dir = TempDir::new().unwrap();
        let filter = Filtering::new(&settings(&[".*"], &[]));

        let (entities, sends) = survivors(filter, vec![file(&dir, "a.rs"), file(&dir, "b.rs")]);

        assert!(entities.is_empty());
        assert_eq!(sends, 0);
    }

    #[test]
    fn include_only_with_project_file() {
        let dir = TempDir::new().unwrap();
        let with = dir.path().join("with");
        fs::create_dir_all(with.join("nested")).unwrap();
        fs::write(with.join(PROJECT_FILE), "").unwrap();
        let inside = with.join("nested").join("lib.rs");
        fs::write(&inside, "").unwrap();
        let outside = file(&dir, "loose.rs");

        let filter = Filtering::new(&Settings {
            include_only_with_project_file: true,
            ..Settings::default()
        });
        let (entities, _) = survivors(
            filter,
            vec![
                Heartbeat::new(inside.to_string_lossy(), EntityType::File, 1.0),
                outside,
            ],
        );

        assert_eq!(entities, [inside.to_string_lossy()]);
    }

    #[test]
    fn unknown_projects_dropped_only_when_configured() {
        let mut known = Heartbeat::new("Slack", EntityType::App, 1.0);
        known.project = Some("chat".into());
        let unknown = Heartbeat::new("Figma", EntityType::App, 1.0);

        let (entities, _) = survivors(ProjectFilter::new(false), vec![known.clone(), unknown.clone()]);
        assert_eq!(entities.len(), 2);

        let (entities, _) = survivors(ProjectFilter::new(true), vec![known, unknown]);
        assert_eq!(entities, ["Slack"]);
    }
}
