#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use psicash::{
    datetime::DateTime,
    engine::{HttpParams, HttpResult, PsiCash, PsiCashConfig},
};

pub const USER_AGENT: &str = "test-agent";

/// Replays scripted responses in order and records every request.
#[derive(Default)]
pub struct Stub {
    responses: Mutex<VecDeque<HttpResult>>,
    requests: Mutex<Vec<HttpParams>>,
}

impl Stub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: HttpResult) {
        self.responses.lock().push_back(result);
    }

    pub fn ok(&self, body: Value) {
        self.push(HttpResult::new(200, body.to_string()));
    }

    pub fn requests(&self) -> Vec<HttpParams> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn respond(&self, params: &HttpParams) -> HttpResult {
        self.requests.lock().push(params.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            HttpResult::transport_error(HttpResult::CRITICAL_ERROR, "no scripted response")
        })
    }
}

pub fn config(dir: &TempDir) -> PsiCashConfig {
    PsiCashConfig {
        user_agent: USER_AGENT.to_string(),
        file_store_root: dir.path().to_path_buf(),
        test: true,
        retry_backoff: Duration::from_millis(2),
        ..PsiCashConfig::default()
    }
}

pub fn client(dir: &TempDir, stub: &Arc<Stub>) -> PsiCash {
    let stub = Arc::clone(stub);
    PsiCash::init(config(dir))
        .expect("init")
        .with_requester(move |params: &HttpParams| stub.respond(params))
}

/// A client already holding tracker tokens `e1`, `s1`, `i1`.
pub fn tracker_client(dir: &TempDir, stub: &Arc<Stub>) -> PsiCash {
    let psicash = client(dir, stub);
    psicash
        .migrate_tracker_tokens(
            &[("earner", "e1"), ("spender", "s1"), ("indicator", "i1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
        .expect("tracker tokens");
    psicash
}

pub fn tracker_tokens(suffix: &str) -> Value {
    json!({
        "earner": format!("e{suffix}"),
        "spender": format!("s{suffix}"),
        "indicator": format!("i{suffix}"),
    })
}

pub fn all_valid(ids: &[&str]) -> Value {
    Value::Object(ids.iter().map(|id| (id.to_string(), json!(true))).collect())
}

pub fn encoded_authorization(id: &str, expires: DateTime) -> String {
    let envelope = json!({
        "Authorization": {
            "ID": id,
            "AccessType": "speed-boost-test",
            "Expires": expires.to_iso8601(),
        },
        "Signature": "c2ln",
    });
    STANDARD.encode(envelope.to_string())
}

pub fn purchase_json(id: &str, created: DateTime, expires: DateTime, authorization: Option<&str>) -> Value {
    let mut p = json!({
        "TransactionID": id,
        "Class": "speed-boost",
        "Distinguisher": "1hr",
        "Created": created.to_iso8601(),
        "TransactionResponse": {
            "Type": "expiring-purchase",
            "Values": {"Expires": expires.to_iso8601()},
        },
    });
    if let Some(auth) = authorization {
        p["Authorization"] = json!(auth);
    }
    p
}

pub fn metadata(params: &HttpParams) -> Value {
    let raw = params
        .headers
        .get("X-PsiCash-Metadata")
        .expect("metadata header");
    serde_json::from_str(raw).expect("metadata json")
}

pub fn auth_header(params: &HttpParams) -> Option<&str> {
    params.headers.get("X-PsiCash-Auth").map(String::as_str)
}
