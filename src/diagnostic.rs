//! Diagnostics uploaded when a command fails.

use std::time::Duration;

use crate::api::{ApiClient, ApiError};
use crate::config::Settings;
use crate::model::user_agent;

/// Upper bound on an upload, whatever the configured request timeout.
const UPLOAD_TIMEOUT_SECS: u64 = 5;

/// What a failed command leaves behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Log output captured while the command ran.
    pub logs: String,
    /// Present only when the command panicked.
    pub stack: Option<String>,
}

/// Destination for diagnostics. Uploads are best effort.
pub trait DiagnosticsSink {
    fn upload(&self, diagnostics: &Diagnostics) -> Result<(), ApiError>;
}

/// Uploads diagnostics to the API's plugin error endpoint.
///
/// The client is built per upload so a broken configuration surfaces as an
/// upload error rather than preventing the command from running.
pub struct ApiDiagnostics {
    settings: Settings,
    plugin: Option<String>,
}

impl ApiDiagnostics {
    pub fn new(settings: Settings, plugin: Option<String>) -> Self {
        Self { settings, plugin }
    }
}

impl DiagnosticsSink for ApiDiagnostics {
    fn upload(&self, diagnostics: &Diagnostics) -> Result<(), ApiError> {
        let timeout = self
            .settings
            .timeout
            .map_or(UPLOAD_TIMEOUT_SECS, |t| t.min(UPLOAD_TIMEOUT_SECS));
        let client = ApiClient::without_auth(&self.settings, user_agent(self.plugin.as_deref()))?
            .with_timeout(Duration::from_secs(timeout));
        client.send_diagnostics(self.plugin.as_deref(), diagnostics)
    }
}
