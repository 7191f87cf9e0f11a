use std::thread;

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    datetime::DateTime,
    error::{Error, Result, ResultExt},
};

use super::{
    config::API_VERSION_PREFIX,
    http::{HttpParams, HttpResult, is_server_error},
    psicash::PsiCash,
};

const AUTH_HEADER: &str = "X-PsiCash-Auth";
const METADATA_HEADER: &str = "X-PsiCash-Metadata";
const REQUEST_METADATA_VERSION: i64 = 1;

/// A logical API request, independent of attempt.
#[derive(Debug, Clone)]
pub(super) struct ApiRequest<'a> {
    pub method: &'static str,
    /// Path below the API version prefix, e.g. `/refresh-state`.
    pub path: &'a str,
    pub include_auth_tokens: bool,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
}

impl<'a> ApiRequest<'a> {
    pub fn new(method: &'static str, path: &'a str) -> Self {
        Self {
            method,
            path,
            include_auth_tokens: false,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn authenticated(mut self) -> Self {
        self.include_auth_tokens = true;
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    pub fn json_body(mut self, body: &Value) -> Self {
        self.body = Some(body.to_string());
        self
    }
}

enum LastFailure {
    Transport(String),
    Server(HttpResult),
}

impl PsiCash {
    /// Stored request metadata plus the protocol fields. `attempt` is
    /// included only for retries.
    pub(super) fn request_metadata(&self, attempt: u32) -> Result<Value> {
        let mut metadata = self.user_data.request_metadata()?;
        metadata.insert("v".to_string(), Value::from(REQUEST_METADATA_VERSION));
        metadata.insert("user_agent".to_string(), Value::from(self.config.user_agent.clone()));
        if attempt > 1 {
            metadata.insert("attempt".to_string(), Value::from(attempt));
        }
        Ok(Value::Object(metadata))
    }

    fn build_request_params(&self, request: &ApiRequest<'_>, attempt: u32) -> Result<HttpParams> {
        let mut params = HttpParams {
            scheme: self.endpoint.scheme.clone(),
            hostname: self.endpoint.hostname.clone(),
            port: self.endpoint.port,
            method: request.method.to_string(),
            path: format!("{API_VERSION_PREFIX}{}", request.path),
            query: request.query.clone(),
            body: request.body.clone().unwrap_or_default(),
            ..HttpParams::default()
        };

        params
            .headers
            .insert("User-Agent".to_string(), self.config.user_agent.clone());
        if request.include_auth_tokens {
            let ids: Vec<String> = self
                .user_data
                .auth_tokens()?
                .into_values()
                .map(|t| t.id)
                .collect();
            params.headers.insert(AUTH_HEADER.to_string(), ids.join(","));
        }
        if request.body.is_some() {
            params
                .headers
                .insert("Content-Type".to_string(), "application/json".to_string());
        }

        let metadata = self.request_metadata(attempt)?;
        params
            .headers
            .insert(METADATA_HEADER.to_string(), metadata.to_string());
        Ok(params)
    }

    fn update_server_time_diff(&self, result: &HttpResult) {
        let Some(date) = result.header("Date") else {
            return;
        };
        let Some(server_now) = DateTime::from_rfc7231(date) else {
            warn!(date, "unparseable Date header");
            return;
        };
        if let Err(err) = self.user_data.set_server_time_diff(server_now) {
            warn!(%err, "failed to store server time diff");
        } else {
            debug!(%server_now, "server time diff updated");
        }
    }

    /// Sends `request`, retrying transport hiccups and 5xx responses.
    ///
    /// Returns the first response below 500, or the last 5xx response when
    /// attempts run out. Recoverable transport failures on every attempt give
    /// a non-critical error; any other transport failure is critical at once.
    pub(super) fn make_http_request_with_retry(&self, request: &ApiRequest<'_>) -> Result<HttpResult> {
        let Some(requester) = self.requester.as_deref() else {
            return Err(Error::critical("HTTP requester must be set before requests are made"));
        };

        let max_attempts = self.config.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let pause = self.config.retry_backoff * (attempt - 1);
                warn!(path = request.path, attempt, ?pause, "retrying request");
                thread::sleep(pause);
            }

            let params = self
                .build_request_params(request, attempt)
                .context("failed to build request")?;
            debug!(method = request.method, path = %params.path, attempt, "sending request");
            let result = requester.make_request(&params);

            if result.code < 0 && result.error.is_empty() {
                return Err(Error::critical(format!(
                    "HTTP result code {} is negative but carries no error message",
                    result.code
                )));
            }

            self.update_server_time_diff(&result);

            if result.code < 0 {
                if result.code == HttpResult::RECOVERABLE_ERROR {
                    last = Some(LastFailure::Transport(result.error));
                    continue;
                }
                return Err(Error::critical(format!(
                    "request failed with unrecoverable transport error: {}",
                    result.error
                )));
            }

            if is_server_error(result.code) {
                last = Some(LastFailure::Server(result));
                continue;
            }

            return Ok(result);
        }

        match last {
            Some(LastFailure::Server(result)) => Ok(result),
            Some(LastFailure::Transport(message)) => Err(Error::noncritical(format!(
                "request failed after {max_attempts} attempts: {message}"
            ))),
            None => Err(Error::critical("no request attempts were made")),
        }
    }
}
