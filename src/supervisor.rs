//! Command supervision.
//!
//! Every top-level command runs through [`Supervisor::run`], which:
//!
//! 1. captures the log stream for the duration of the call,
//! 2. converts panics into [`exitcode::ERR_GENERIC`],
//! 3. uploads diagnostics for failed commands unless policy suppresses it,
//! 4. returns the exit code the process should terminate with.
//!
//! There is no retry here. Retrying sends is the backoff gate's job.

use std::{
    any::Any,
    backtrace::Backtrace,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, error, warn};

use crate::diagnostic::{Diagnostics, DiagnosticsSink};
use crate::exitcode;
use crate::logging::LogSink;

/// A command's failure: the exit code plus what went wrong.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CommandError {
    pub code: i32,
    pub message: String,
}

impl CommandError {
    pub fn new(code: i32, message: impl fmt::Display) -> Self {
        Self {
            code,
            message: message.to_string(),
        }
    }
}

/// `Ok(code)` is a normal return, possibly with a non-zero code.
/// `Err` is a failure that may warrant diagnostics.
pub type CommandResult = Result<i32, CommandError>;

/// A finished command attempt.
#[derive(Debug)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub error: Option<String>,
    pub logs: String,
    /// Present only when the command panicked.
    pub stack: Option<String>,
}

impl CommandOutcome {
    /// Whether diagnostics should be uploaded for this outcome.
    pub fn should_upload(&self, verbose: bool) -> bool {
        if self.stack.is_some() {
            return !verbose;
        }
        if self.error.is_some() {
            return !(self.exit_code == exitcode::ERR_AUTH && verbose);
        }
        false
    }
}

/// Runs commands with panic recovery, log capture, and diagnostics.
pub struct Supervisor<'a> {
    verbose: bool,
    logs: LogSink,
    diagnostics: &'a dyn DiagnosticsSink,
}

impl<'a> Supervisor<'a> {
    pub fn new(verbose: bool, logs: LogSink, diagnostics: &'a dyn DiagnosticsSink) -> Self {
        Self {
            verbose,
            logs,
            diagnostics,
        }
    }

    /// Runs `command` and returns the exit code to terminate with.
    pub fn run(&self, command: impl FnOnce() -> CommandResult) -> i32 {
        let outcome = self.execute(command);
        let code = outcome.exit_code;
        self.report(outcome);
        code
    }

    /// Runs `primary`, then `resync` only if `primary` succeeded.
    pub fn run_with_offline_sync(
        &self,
        primary: impl FnOnce() -> CommandResult,
        resync: impl FnOnce() -> CommandResult,
    ) -> i32 {
        let code = self.run(primary);
        if code != exitcode::SUCCESS {
            return code;
        }
        self.run(resync)
    }

    fn execute(&self, command: impl FnOnce() -> CommandResult) -> CommandOutcome {
        let capture = self.logs.capture();

        let report: Arc<Mutex<Option<String>>> = Arc::default();
        let hook_report = Arc::clone(&report);
        let previous_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture();
            error!("panicked: {info}");
            *hook_report.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(format!("{info}\n{stack}"));
        }));

        let result = panic::catch_unwind(AssertUnwindSafe(command));
        panic::set_hook(previous_hook);

        match result {
            Ok(Ok(exit_code)) => CommandOutcome {
                exit_code,
                error: None,
                logs: capture.finish(),
                stack: None,
            },
            Ok(Err(err)) => {
                error!("failed to run command: {err}");
                CommandOutcome {
                    exit_code: err.code,
                    error: Some(err.message),
                    logs: capture.finish(),
                    stack: None,
                }
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                // Another hook may have been installed concurrently.
                let stack = report
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .unwrap_or_else(|| format!("{message}\n{}", Backtrace::force_capture()));
                CommandOutcome {
                    exit_code: exitcode::ERR_GENERIC,
                    error: Some(message),
                    logs: capture.finish(),
                    stack: Some(stack),
                }
            }
        }
    }

    fn report(&self, outcome: CommandOutcome) {
        if !outcome.should_upload(self.verbose) {
            return;
        }
        let diagnostics = Diagnostics {
            logs: outcome.logs,
            stack: outcome.stack,
        };
        match self.diagnostics.upload(&diagnostics) {
            Ok(()) => debug!("sent diagnostics"),
            Err(e) => warn!("failed to send diagnostics: {e}"),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}
