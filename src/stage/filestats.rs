//! Line counts.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::Path,
};

use tracing::{debug, warn};

use crate::model::{Heartbeat, HeartbeatResult};
use crate::pipeline::{Next, Result, Stage};

use super::local_path;

/// Files larger than this are not counted.
pub const MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

const BUFFER_SIZE: usize = 32 * 1024;

/// Sets `lines` for local files, unless it was already given.
pub struct FileStats;

impl Stage for FileStats {
    fn process(&self, mut heartbeats: Vec<Heartbeat>, next: Next<'_>) -> Result<Vec<HeartbeatResult>> {
        for h in &mut heartbeats {
            if h.lines.is_some() {
                continue;
            }
            let Some(path) = local_path(h) else {
                continue;
            };

            let size = match fs::metadata(&path) {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("failed to retrieve file stats of {}: {e}", path.display());
                    continue;
                }
            };
            if size > MAX_FILE_SIZE {
                debug!(
                    "{} exceeds max file size of {MAX_FILE_SIZE} bytes, lines won't be counted",
                    path.display()
                );
                continue;
            }

            match count_lines(&path) {
                Ok(n) => h.lines = Some(u32::try_from(n).unwrap_or(u32::MAX)),
                Err(e) => warn!("failed to count lines in {}: {e}", path.display()),
            }
        }
        next.run(heartbeats)
    }
}

/// Counts `\n` bytes.
fn count_lines(path: &Path) -> io::Result<usize> {
    let mut file = File::open(path)?;
    let mut buf = vec![0_u8; BUFFER_SIZE];
    let mut count = 0;
    loop {
        match file.read(&mut buf) {
            Ok(0) => return Ok(count),
            Ok(n) => count += buf[..n].iter().filter(|&&b| b == b'\n').count(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;

    use tempfile::TempDir;

    use crate::model::EntityType;
    use crate::pipeline::Pipeline;

    fn stats(batch: Vec<Heartbeat>) -> Vec<Option<u32>> {
        let seen = RefCell::new(Vec::new());
        let pipeline = Pipeline::new(|hh: Vec<Heartbeat>| -> Result<Vec<HeartbeatResult>> {
            seen.borrow_mut().extend(hh.iter().map(|h| h.lines));
            Ok(hh.iter().map(|_| HeartbeatResult::accepted()).collect())
        })
        .with(FileStats);
        pipeline.handle(batch).unwrap();
        drop(pipeline);
        seen.into_inner()
    }

    fn file_with(dir: &TempDir, name: &str, contents: &[u8]) -> Heartbeat {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        Heartbeat::new(path.to_string_lossy(), EntityType::File, 1.0)
    }

    #[test]
    fn counts_newlines_across_buffer_boundaries() {
        let dir = TempDir::new().unwrap();
        let line = "x".repeat(99) + "\n";
        let contents = line.repeat(1000);
        assert!(contents.len() > BUFFER_SIZE);

        let lines = stats(vec![
            file_with(&dir, "big.txt", contents.as_bytes()),
            file_with(&dir, "no_trailing.txt", b"one\ntwo"),
            file_with(&dir, "empty.txt", b""),
        ]);

        assert_eq!(lines, [Some(1000), Some(1), Some(0)]);
    }

    #[test]
    fn skips_oversized_missing_and_overridden() {
        let dir = TempDir::new().unwrap();
        let big = file_with(&dir, "huge.bin", &vec![b'\n'; 2 * 1024 * 1024 + 1]);
        let missing = Heartbeat::new(
            dir.path().join("gone.rs").to_string_lossy(),
            EntityType::File,
            1.0,
        );
        let mut overridden = file_with(&dir, "given.rs", b"a\nb\n");
        overridden.lines = Some(42);

        let lines = stats(vec![big, missing, overridden]);

        assert_eq!(lines, [None, None, Some(42)]);
    }

    #[test]
    fn local_file_is_counted_for_remote_entity() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("mirror.rs");
        fs::write(&local, "a\nb\nc\n").unwrap();
        let mut h = Heartbeat::new("sftp://host/src/mirror.rs", EntityType::File, 1.0);
        h.local_file = Some(local);

        assert_eq!(stats(vec![h]), [Some(3)]);
    }
}
