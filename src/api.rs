//! Blocking client for the ingestion API.
//!
//! Heartbeats go to `<api_url>/users/current/heartbeats.bulk` as a JSON
//! array; the response carries one `[body, status]` pair per heartbeat.
//! Diagnostics go to `<api_url>/plugins/errors` without authentication.

use std::{env, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::diagnostic::Diagnostics;
use crate::model::{Heartbeat, HeartbeatResult, ResultStatus};
use crate::pipeline::{self, Sender};

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors returned by the ingestion API or the transport beneath it.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid api url {0:?}")]
    InvalidUrl(String),
}

/// A configured API client.
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    user_agent: String,
}

impl ApiClient {
    /// Creates an authenticated client. The API key must be present and valid.
    pub fn new(settings: &Settings, user_agent: String) -> Result<Self, ApiError> {
        let key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ApiError::Auth("api key not found".into()))?;
        validate_api_key(key)?;
        Self::build(settings, Some(key.to_string()), user_agent)
    }

    /// Creates a client for endpoints that need no credentials.
    pub fn without_auth(settings: &Settings, user_agent: String) -> Result<Self, ApiError> {
        Self::build(settings, None, user_agent)
    }

    fn build(
        settings: &Settings,
        api_key: Option<String>,
        user_agent: String,
    ) -> Result<Self, ApiError> {
        let base_url = settings.api_url().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ApiError::InvalidUrl(base_url));
        }

        let timeout = Duration::from_secs(settings.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();

        Ok(Self {
            agent,
            base_url,
            api_key,
            user_agent,
        })
    }

    /// Replaces the request timeout taken from settings.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::AgentBuilder::new().timeout(timeout).build();
        self
    }

    /// Submits a batch and returns one result per heartbeat, in order.
    pub fn send_heartbeats(&self, heartbeats: &[Heartbeat]) -> Result<Vec<HeartbeatResult>, ApiError> {
        let url = format!("{}/users/current/heartbeats.bulk", self.base_url);
        debug!("sending {} heartbeat(s) to api at {url}", heartbeats.len());

        let mut request = self.agent.post(&url).set("User-Agent", &self.user_agent);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Basic {}", STANDARD.encode(key)));
        }

        let response = request.send_json(heartbeats).map_err(map_error)?;
        let bulk: BulkResponse = response
            .into_json()
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if bulk.responses.len() != heartbeats.len() {
            return Err(ApiError::Decode(format!(
                "expected {} results, got {}",
                heartbeats.len(),
                bulk.responses.len()
            )));
        }

        Ok(bulk
            .responses
            .into_iter()
            .map(|(body, code)| HeartbeatResult {
                status: ResultStatus::from_http(code),
                message: error_message(&body),
            })
            .collect())
    }

    /// Uploads captured logs and stack trace on behalf of `plugin`.
    pub fn send_diagnostics(
        &self,
        plugin: Option<&str>,
        diagnostics: &Diagnostics,
    ) -> Result<(), ApiError> {
        let url = format!("{}/plugins/errors", self.base_url);
        let payload = DiagnosticsPayload {
            architecture: env::consts::ARCH,
            platform: env::consts::OS,
            cli_version: env!("CARGO_PKG_VERSION"),
            plugin,
            logs: &diagnostics.logs,
            stacktrace: diagnostics.stack.as_deref().unwrap_or_default(),
        };

        self.agent
            .post(&url)
            .set("User-Agent", &self.user_agent)
            .send_json(&payload)
            .map_err(map_error)?;
        Ok(())
    }
}

impl Sender for ApiClient {
    fn send(&self, heartbeats: Vec<Heartbeat>) -> pipeline::Result<Vec<HeartbeatResult>> {
        Ok(self.send_heartbeats(&heartbeats)?)
    }
}

#[derive(Deserialize)]
struct BulkResponse {
    responses: Vec<(serde_json::Value, u16)>,
}

#[derive(Serialize)]
struct DiagnosticsPayload<'a> {
    architecture: &'static str,
    platform: &'static str,
    cli_version: &'static str,
    plugin: Option<&'a str>,
    logs: &'a str,
    stacktrace: &'a str,
}

/// API keys are UUIDs, optionally prefixed with `waka_`.
fn validate_api_key(key: &str) -> Result<(), ApiError> {
    let raw = key.strip_prefix("waka_").unwrap_or(key);
    Uuid::parse_str(raw)
        .map(|_| ())
        .map_err(|_| ApiError::Auth("invalid api key format".into()))
}

fn map_error(err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            match code {
                401 | 403 => ApiError::Auth(format!("status {code}: {body}")),
                400 => ApiError::BadRequest(body),
                _ => ApiError::Status { code, body },
            }
        }
        ureq::Error::Transport(t) => ApiError::Transport(t.to_string()),
    }
}

fn error_message(body: &serde_json::Value) -> Option<String> {
    if let Some(msg) = body.get("error").and_then(serde_json::Value::as_str) {
        return Some(msg.to_string());
    }
    body.get("errors").map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;
    use std::thread::{self, JoinHandle};

    use crate::model::EntityType;

    const KEY: &str = "00000000-0000-4000-8000-000000000000";

    struct Received {
        url: String,
        body: String,
        auth: Option<String>,
    }

    /// Serves exactly one request with a canned response.
    fn serve(status: u16, response: &str) -> (String, JoinHandle<Received>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let response = response.to_string();

        let handle = thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            let auth = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Authorization"))
                .map(|h| h.value.as_str().to_string());
            let url = request.url().to_string();
            request
                .respond(tiny_http::Response::from_string(response).with_status_code(status))
                .unwrap();
            Received { url, body, auth }
        });

        (format!("http://127.0.0.1:{port}/api/v1/"), handle)
    }

    fn settings(url: &str) -> Settings {
        Settings {
            api_key: Some(KEY.into()),
            api_url: Some(url.into()),
            ..Settings::default()
        }
    }

    fn batch() -> Vec<Heartbeat> {
        vec![
            Heartbeat::new("/src/a.rs", EntityType::File, 1.0),
            Heartbeat::new("/src/b.rs", EntityType::File, 2.0),
        ]
    }

    #[test]
    fn rejects_missing_or_malformed_key() {
        let mut s = settings("https://example.com");
        s.api_key = None;
        assert!(matches!(
            ApiClient::new(&s, "ua".into()),
            Err(ApiError::Auth(_))
        ));

        s.api_key = Some("not-a-key".into());
        assert!(matches!(
            ApiClient::new(&s, "ua".into()),
            Err(ApiError::Auth(_))
        ));

        s.api_key = Some(format!("waka_{KEY}"));
        assert!(ApiClient::new(&s, "ua".into()).is_ok());
    }

    #[test]
    fn rejects_non_http_url() {
        let s = settings("ftp://example.com");
        assert!(matches!(
            ApiClient::new(&s, "ua".into()),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn sends_batch_and_maps_results() {
        let (url, server) = serve(
            202,
            r#"{"responses": [[{"data": {}}, 201], [{"error": "too old"}, 400]]}"#,
        );
        let client = ApiClient::new(&settings(&url), "cadence-test".into()).unwrap();

        let results = client.send_heartbeats(&batch()).unwrap();
        let received = server.join().unwrap();

        assert_eq!(received.url, "/api/v1/users/current/heartbeats.bulk");
        assert_eq!(
            received.auth,
            Some(format!("Basic {}", STANDARD.encode(KEY)))
        );
        assert!(received.body.contains("/src/b.rs"));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ResultStatus::Accepted);
        assert_eq!(results[1].status, ResultStatus::Rejected);
        assert_eq!(results[1].message.as_deref(), Some("too old"));
    }

    #[test]
    fn mismatched_result_count_fails_batch() {
        let (url, server) = serve(202, r#"{"responses": [[{}, 201]]}"#);
        let client = ApiClient::new(&settings(&url), "ua".into()).unwrap();

        let err = client.send_heartbeats(&batch()).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn unauthorized_is_auth_error() {
        let (url, server) = serve(401, "{}");
        let client = ApiClient::new(&settings(&url), "ua".into()).unwrap();

        let err = client.send(batch()).unwrap_err();
        server.join().unwrap();

        assert!(err.is_auth());
    }

    #[test]
    fn server_error_is_status_error() {
        let (url, server) = serve(503, "down");
        let client = ApiClient::new(&settings(&url), "ua".into()).unwrap();

        let err = client.send_heartbeats(&batch()).unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ApiError::Status { code: 503, .. }));
    }

    #[test]
    fn diagnostics_are_sent_without_auth() {
        let (url, server) = serve(201, "{}");
        let client = ApiClient::without_auth(&settings(&url), "ua".into()).unwrap();

        client
            .send_diagnostics(
                Some("vim-cadence/1.0"),
                &Diagnostics {
                    logs: "line one\n".into(),
                    stack: Some("frame 0".into()),
                },
            )
            .unwrap();
        let received = server.join().unwrap();

        assert_eq!(received.url, "/api/v1/plugins/errors");
        assert_eq!(received.auth, None);
        assert!(received.body.contains("frame 0"));
        assert!(received.body.contains("vim-cadence/1.0"));
    }
}
