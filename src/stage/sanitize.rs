//! Redaction. Runs last, so the sender only ever sees sanitized values.

use std::path::Path;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::Settings;
use crate::model::{EntityType, Heartbeat, HeartbeatResult};
use crate::pipeline::{Next, Result, Stage};

use super::{compile_patterns, is_remote, matches_any};

/// Hides file names, project names, branch names, and project folders.
///
/// Patterns are matched against the full entity; project and branch
/// patterns also match the project or branch name itself.
pub struct Sanitization {
    hide_file_names: Vec<Regex>,
    hide_project_names: Vec<Regex>,
    hide_branch_names: Vec<Regex>,
    hide_project_folder: bool,
}

impl Sanitization {
    pub fn new(settings: &Settings) -> Self {
        Self {
            hide_file_names: compile_patterns("hide_file_names", &settings.hide_file_names),
            hide_project_names: compile_patterns("hide_project_names", &settings.hide_project_names),
            hide_branch_names: compile_patterns("hide_branch_names", &settings.hide_branch_names),
            hide_project_folder: settings.hide_project_folder,
        }
    }

    fn sanitize(&self, mut h: Heartbeat) -> Heartbeat {
        let hide_file =
            h.entity_type == EntityType::File && matches_any(&self.hide_file_names, &h.entity);
        let hide_project = h.project.as_deref().is_some_and(|p| {
            matches_any(&self.hide_project_names, &h.entity)
                || matches_any(&self.hide_project_names, p)
        });
        let hide_branch = h.branch.as_deref().is_some_and(|b| {
            matches_any(&self.hide_branch_names, &h.entity)
                || matches_any(&self.hide_branch_names, b)
        });

        if self.hide_project_folder && !is_remote(&h.entity) {
            relativize(&mut h);
        }
        if hide_project {
            h.project = h.project.as_deref().map(obfuscate);
            h.branch = None;
        }
        if hide_branch {
            h.branch = None;
        }
        if hide_file {
            h.entity = hidden_name(&h.entity);
            h.lineno = None;
            h.cursorpos = None;
            h.lines = None;
            h.branch = None;
            h.local_file = None;
            h.project_path = None;
        }
        h
    }
}

impl Stage for Sanitization {
    fn process(&self, heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        let sanitized = heartbeats.into_iter().map(|h| self.sanitize(h)).collect();
        next.run(sanitized)
    }
}

/// `HIDDEN.<ext>`, or `HIDDEN` when there is no extension.
fn hidden_name(entity: &str) -> String {
    match Path::new(entity).extension() {
        Some(ext) => format!("HIDDEN.{}", ext.to_string_lossy()),
        None => "HIDDEN".to_string(),
    }
}

/// A stable stand-in for a project name.
fn obfuscate(project: &str) -> String {
    let digest = hex::encode(Sha256::digest(project.as_bytes()));
    format!("project-{}", &digest[..12])
}

/// Makes the entity relative to the detected project root.
fn relativize(h: &mut Heartbeat) {
    let Some(root) = h.project_path.as_deref() else {
        return;
    };
    if let Ok(rel) = Path::new(&h.entity).strip_prefix(root) {
        h.entity = rel.to_string_lossy().into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    fn sanitizer(configure: impl FnOnce(&mut Settings)) -> Sanitization {
        let mut settings = Settings::default();
        configure(&mut settings);
        Sanitization::new(&settings)
    }

    fn detailed(entity: &str) -> Heartbeat {
        let mut h = Heartbeat::new(entity, EntityType::File, 1.0);
        h.lineno = Some(10);
        h.cursorpos = Some(200);
        h.lines = Some(300);
        h.project = Some("payroll".into());
        h.branch = Some("hotfix/salaries".into());
        h.project_path = Some(PathBuf::from("/work/payroll"));
        h
    }

    #[test]
    fn hidden_file_loses_identifying_fields() {
        let s = sanitizer(|c| c.hide_file_names = vec!["/work/".into()]);

        let h = s.sanitize(detailed("/work/payroll/src/tax.py"));

        assert_eq!(h.entity, "HIDDEN.py");
        assert_eq!((h.lineno, h.cursorpos, h.lines), (None, None, None));
        assert_eq!(h.branch, None);
        assert_eq!(h.project.as_deref(), Some("payroll"));
    }

    #[test]
    fn hidden_project_is_obfuscated_consistently() {
        let s = sanitizer(|c| c.hide_project_names = vec!["^payroll$".into()]);

        let a = s.sanitize(detailed("/work/payroll/a.py"));
        let b = s.sanitize(detailed("/work/payroll/b.py"));

        let name = a.project.clone().unwrap();
        assert!(name.starts_with("project-"));
        assert_ne!(name, "payroll");
        assert_eq!(a.project, b.project);
        assert_eq!(a.branch, None);
        assert_eq!(a.entity, "/work/payroll/a.py");
    }

    #[test]
    fn hidden_branch_is_cleared() {
        let s = sanitizer(|c| c.hide_branch_names = vec!["^hotfix/".into()]);

        let h = s.sanitize(detailed("/work/payroll/a.py"));

        assert_eq!(h.branch, None);
        assert_eq!(h.project.as_deref(), Some("payroll"));
    }

    #[test]
    fn project_folder_is_stripped() {
        let s = sanitizer(|c| c.hide_project_folder = true);

        let h = s.sanitize(detailed("/work/payroll/src/tax.py"));

        assert_eq!(PathBuf::from(h.entity), PathBuf::from("src").join("tax.py"));
    }

    #[test]
    fn nothing_configured_changes_nothing() {
        let s = sanitizer(|_| {});
        let h = detailed("/work/payroll/src/tax.py");

        assert_eq!(s.sanitize(h.clone()), h);
    }

    #[test]
    fn hidden_name_without_extension() {
        assert_eq!(hidden_name("/etc/hosts"), "HIDDEN");
        assert_eq!(hidden_name("Makefile.am"), "HIDDEN.am");
    }
}
