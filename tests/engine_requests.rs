mod common;

use serde_json::json;
use tempfile::TempDir;

use common::{Stub, all_valid, auth_header, client, metadata, tracker_client};
use psicash::{
    datetime::{DateTime, Duration},
    engine::{HttpResult, PsiCash, PsiCashConfig},
    types::Status,
};

fn refresh_ok() -> serde_json::Value {
    json!({
        "TokensValid": all_valid(&["e1", "s1", "i1"]),
        "IsAccount": false,
        "Balance": 10,
    })
}

#[test]
fn init_requires_user_agent_and_root() {
    let tmp = TempDir::new().expect("tmp");
    let no_agent = PsiCashConfig {
        user_agent: String::new(),
        ..common::config(&tmp)
    };
    assert!(PsiCash::init(no_agent).expect_err("agent").is_critical());

    let no_root = PsiCashConfig {
        file_store_root: Default::default(),
        ..common::config(&tmp)
    };
    assert!(PsiCash::init(no_root).expect_err("root").is_critical());
}

#[test]
fn force_reset_discards_stored_data() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let first = tracker_client(&tmp, &stub);
    let instance = first.user_data().instance_id().expect("id");
    drop(first);

    let reset = PsiCash::init(PsiCashConfig {
        force_reset: true,
        ..common::config(&tmp)
    })
    .expect("init");
    assert!(!reset.has_tokens().expect("has_tokens"));
    assert_ne!(reset.user_data().instance_id().expect("id"), instance);
}

#[test]
fn request_without_requester_is_critical() {
    let tmp = TempDir::new().expect("tmp");
    let psicash = PsiCash::init(common::config(&tmp)).expect("init");
    let err = psicash.refresh_state(&[], false).expect_err("no requester");
    assert!(err.is_critical());
}

#[test]
fn request_carries_headers_and_query() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    psicash
        .set_request_metadata_item("client_region", "CA")
        .expect("meta");
    stub.ok(refresh_ok());

    psicash.refresh_state(&["speed-boost"], false).expect("refresh");

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.method, "GET");
    assert_eq!(req.scheme, "https");
    assert_eq!(req.hostname, "dev-api.psi.cash");
    assert_eq!(req.port, 443);
    assert_eq!(req.path, "/v1/refresh-state");
    assert_eq!(req.query_value("class"), Some("speed-boost"));
    assert_eq!(req.query_value("tokenTypes"), Some("earner,indicator,spender"));
    assert_eq!(req.query_value("lastTransactionID"), None);
    assert_eq!(auth_header(req), Some("e1,i1,s1"));
    assert_eq!(req.headers.get("User-Agent").map(String::as_str), Some(common::USER_AGENT));

    let meta = metadata(req);
    assert_eq!(meta["v"], json!(1));
    assert_eq!(meta["user_agent"], json!(common::USER_AGENT));
    assert_eq!(meta["client_region"], json!("CA"));
    assert!(meta.get("attempt").is_none());
}

#[test]
fn recoverable_failures_are_retried() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    stub.push(HttpResult::transport_error(HttpResult::RECOVERABLE_ERROR, "timeout"));
    stub.push(HttpResult::transport_error(HttpResult::RECOVERABLE_ERROR, "refused"));
    stub.ok(refresh_ok());

    let res = psicash.refresh_state(&[], false).expect("refresh");
    assert_eq!(res.status, Status::Success);
    assert_eq!(psicash.balance().expect("balance"), 10);

    let requests = stub.requests();
    assert_eq!(requests.len(), 3);
    assert!(metadata(&requests[0]).get("attempt").is_none());
    assert_eq!(metadata(&requests[1])["attempt"], json!(2));
    assert_eq!(metadata(&requests[2])["attempt"], json!(3));
}

#[test]
fn persistent_server_errors_exhaust_attempts() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    for _ in 0..3 {
        stub.push(HttpResult::new(503, ""));
    }

    let res = psicash.refresh_state(&[], false).expect("refresh");
    assert_eq!(res.status, Status::ServerError);
    assert_eq!(stub.request_count(), 3);
    assert!(psicash.has_tokens().expect("has_tokens"));
}

#[test]
fn persistent_recoverable_failures_are_noncritical() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    for _ in 0..3 {
        stub.push(HttpResult::transport_error(HttpResult::RECOVERABLE_ERROR, "offline"));
    }

    let err = psicash.refresh_state(&[], false).expect_err("offline");
    assert!(!err.is_critical());
    assert_eq!(stub.request_count(), 3);
}

#[test]
fn critical_transport_failure_is_not_retried() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    stub.push(HttpResult::transport_error(HttpResult::CRITICAL_ERROR, "bad TLS"));

    let err = psicash.refresh_state(&[], false).expect_err("tls");
    assert!(err.is_critical());
    assert!(err.to_string().contains("bad TLS"), "{err}");
    assert_eq!(stub.request_count(), 1);
}

#[test]
fn negative_code_without_message_is_critical() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    stub.push(HttpResult::new(HttpResult::RECOVERABLE_ERROR, ""));

    assert!(psicash.refresh_state(&[], false).expect_err("no message").is_critical());
    assert_eq!(stub.request_count(), 1);
}

#[test]
fn date_header_updates_server_time_diff() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    let server_now = DateTime::now().add(Duration::hours(2));
    stub.push(HttpResult::new(200, refresh_ok().to_string()).with_header("date", server_now.to_rfc7231()));

    psicash.refresh_state(&[], false).expect("refresh");

    let diff = psicash.user_data().server_time_diff().expect("diff");
    assert!((diff - Duration::hours(2)).num_seconds().abs() <= 2, "{diff}");
}

#[test]
fn unexpected_status_is_critical() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    stub.push(HttpResult::new(418, ""));
    assert!(psicash.refresh_state(&[], false).expect_err("teapot").is_critical());
}

#[test]
fn fresh_client_sends_no_auth_header_for_tracker() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = client(&tmp, &stub);
    stub.ok(common::tracker_tokens("1"));
    stub.ok(refresh_ok());

    psicash.refresh_state(&[], false).expect("refresh");
    let requests = stub.requests();
    assert_eq!(requests[0].path, "/v1/tracker");
    assert_eq!(auth_header(&requests[0]), None);
    assert_eq!(auth_header(&requests[1]), Some("e1,i1,s1"));
}
