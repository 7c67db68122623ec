//! Path normalization.

use std::path::{self, Path, PathBuf};

use crate::model::{EntityType, Heartbeat, HeartbeatResult};
use crate::pipeline::{Next, Result, Stage};

use super::is_remote;

/// Makes local file paths absolute, expanding a leading `~`.
pub struct Formatting;

impl Stage for Formatting {
    fn process(&self, mut heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        for h in &mut heartbeats {
            if h.entity_type != EntityType::File {
                continue;
            }
            if let Some(local) = h.local_file.as_deref() {
                h.local_file = Some(normalize(local));
            }
            if !is_remote(&h.entity) {
                h.entity = normalize(Path::new(&h.entity))
                    .to_string_lossy()
                    .into_owned();
            }
        }
        next.run(heartbeats)
    }
}

fn normalize(p: &Path) -> PathBuf {
    let expanded = match (p.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => p.to_path_buf(),
    };
    path::absolute(&expanded).unwrap_or(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::env;

    use crate::pipeline::Pipeline;

    fn format(h: Heartbeat) -> Heartbeat {
        let seen = RefCell::new(Vec::new());
        let pipeline = Pipeline::new(|hh: Vec<Heartbeat>| -> Result<Vec<HeartbeatResult>> {
            seen.borrow_mut().extend(hh.iter().cloned());
            Ok(hh.iter().map(|_| HeartbeatResult::accepted()).collect())
        })
        .with(Formatting);

        pipeline.handle(vec![h]).unwrap();
        drop(pipeline);
        seen.into_inner().remove(0)
    }

    #[test]
    fn relative_paths_become_absolute() {
        let h = format(Heartbeat::new("src/main.rs", EntityType::File, 1.0));

        assert!(Path::new(&h.entity).is_absolute());
        assert_eq!(
            PathBuf::from(&h.entity),
            env::current_dir().unwrap().join("src").join("main.rs")
        );
    }

    #[test]
    fn remote_and_non_file_entities_are_untouched() {
        let remote = format(Heartbeat::new("ssh://host/src/main.rs", EntityType::File, 1.0));
        assert_eq!(remote.entity, "ssh://host/src/main.rs");

        let app = format(Heartbeat::new("Slack", EntityType::App, 1.0));
        assert_eq!(app.entity, "Slack");
    }

    #[test]
    fn local_file_is_normalized_too() {
        let mut h = Heartbeat::new("ssh://host/src/main.rs", EntityType::File, 1.0);
        h.local_file = Some(PathBuf::from("cache/main.rs"));

        let h = format(h);

        assert!(h.local_file.unwrap().is_absolute());
    }
}
