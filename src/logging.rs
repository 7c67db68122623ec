//! Log output.
//!
//! Every log line goes through a [`LogSink`]: a `MakeWriter` that forwards
//! to the log file (or stdout) and, while a [`Capture`] is active, also
//! copies each line into memory so failed commands can ship their logs.

use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing_subscriber::{EnvFilter, fmt::MakeWriter};

struct SinkState {
    dest: Box<dyn Write + Send>,
    capture: Option<Vec<u8>>,
}

/// Shared log destination with an optional in-memory tee.
#[derive(Clone)]
pub struct LogSink {
    state: Arc<Mutex<SinkState>>,
}

impl LogSink {
    pub fn new(dest: impl Write + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                dest: Box::new(dest),
                capture: None,
            })),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Appends to the file at `path`, creating it and its parent directory.
    pub fn file(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Starts copying log output into memory until the guard is finished
    /// or dropped. Nested captures hand their lines to the outer one.
    pub fn capture(&self) -> Capture {
        let previous = lock(&self.state).capture.replace(Vec::new());
        Capture {
            sink: self.clone(),
            previous: Some(previous),
        }
    }
}

fn lock(state: &Mutex<SinkState>) -> MutexGuard<'_, SinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scoped log capture. The previous capture state is restored on drop.
pub struct Capture {
    sink: LogSink,
    // `None` once restored.
    previous: Option<Option<Vec<u8>>>,
}

impl Capture {
    /// Stops capturing and returns everything logged in the meantime.
    pub fn finish(mut self) -> String {
        String::from_utf8_lossy(&self.restore()).into_owned()
    }

    fn restore(&mut self) -> Vec<u8> {
        let Some(previous) = self.previous.take() else {
            return Vec::new();
        };
        let mut state = lock(&self.sink.state);
        let captured = std::mem::replace(&mut state.capture, previous).unwrap_or_default();
        if let Some(outer) = state.capture.as_mut() {
            outer.extend_from_slice(&captured);
        }
        captured
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Writer handed out per event by [`LogSink`].
pub struct LogWriter {
    state: Arc<Mutex<SinkState>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if let Some(capture) = state.capture.as_mut() {
            capture.extend_from_slice(buf);
        }
        state.dest.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.state).dest.flush()
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            state: Arc::clone(&self.state),
        }
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the level.
pub fn init(verbose: bool, sink: LogSink) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(sink)
        .try_init()
    {
        eprintln!("failed to initialize logging: {e}");
    }
}
