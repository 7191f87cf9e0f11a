mod common;

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use serde_json::{Value, json};
use tempfile::TempDir;
use url::{Url, form_urlencoded};

use common::{Stub, client, tracker_client};
use psicash::{
    datetime::{DateTime, Duration},
    engine::UserSiteUrlType,
    purchase::Purchase,
};

fn purchase(id: &str, expiry: DateTime) -> Purchase {
    Purchase {
        id: id.to_string(),
        transaction_class: "speed-boost".to_string(),
        distinguisher: "1hr".to_string(),
        server_time_created: expiry.sub(Duration::hours(1)),
        server_time_expiry: Some(expiry),
        local_time_expiry: None,
        authorization: None,
    }
}

fn decode_payload(encoded: &str) -> Value {
    let query = format!("p={encoded}");
    let (_, raw) = form_urlencoded::parse(query.as_bytes())
        .next()
        .expect("pair");
    let json = STANDARD_NO_PAD.decode(raw.as_bytes()).expect("base64");
    serde_json::from_slice(&json).expect("payload json")
}

#[test]
fn landing_page_gets_fragment_payload() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);

    let modified = psicash
        .modify_landing_page("https://example.com/page?a=b")
        .expect("modify");
    let url = Url::parse(&modified).expect("url");
    assert_eq!(url.query(), Some("a=b"));
    let fragment = url.fragment().expect("fragment");
    let encoded = fragment.strip_prefix("!psicash=").expect("prefix");

    let payload = decode_payload(encoded);
    assert_eq!(payload["v"], json!(1));
    assert_eq!(payload["tokens"], json!("e1"));
    assert_eq!(payload["metadata"]["user_agent"], json!(common::USER_AGENT));
    assert_eq!(payload["dev"], json!(1));
}

#[test]
fn existing_fragment_moves_payload_to_query() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);

    let modified = psicash
        .modify_landing_page("https://example.com/#section")
        .expect("modify");
    let url = Url::parse(&modified).expect("url");
    assert_eq!(url.fragment(), Some("section"));
    let (name, _) = url.query_pairs().next().expect("query");
    assert_eq!(name, "psicash");
}

#[test]
fn landing_page_without_tokens_has_null_token() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = client(&tmp, &stub);

    let modified = psicash
        .modify_landing_page("https://example.com/")
        .expect("modify");
    let url = Url::parse(&modified).expect("url");
    let encoded = url
        .fragment()
        .and_then(|f| f.strip_prefix("!psicash="))
        .expect("payload");
    assert_eq!(decode_payload(encoded)["tokens"], Value::Null);
}

#[test]
fn invalid_url_is_noncritical() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    assert!(!psicash.modify_landing_page("not a url").expect_err("bad url").is_critical());
}

#[test]
fn buy_url_needs_earner_token() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();

    let fresh = client(&tmp, &stub);
    assert!(!fresh.buy_psi_url().expect_err("no token").is_critical());

    let psicash = tracker_client(&tmp, &stub);
    let url = psicash.buy_psi_url().expect("buy url");
    assert!(url.starts_with("https://buy.psi.cash/?psicash="), "{url}");
}

#[test]
fn user_site_url_carries_locale_and_webview() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    psicash.set_locale("de").expect("locale");

    let url = Url::parse(
        &psicash
            .user_site_url(UserSiteUrlType::AccountSignup, true)
            .expect("site url"),
    )
    .expect("url");
    assert_eq!(url.host_str(), Some("dev-my.psi.cash"));
    assert_eq!(url.path(), "/signup");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(pairs.contains(&("utm_source".to_string(), common::USER_AGENT.to_string())));
    assert!(pairs.contains(&("locale".to_string(), "de".to_string())));
    assert!(pairs.contains(&("webview".to_string(), "true".to_string())));
    assert!(pairs.iter().any(|(k, _)| k == "psicash"));

    let forgot = psicash
        .user_site_url(UserSiteUrlType::ForgotAccount, false)
        .expect("forgot");
    assert!(!forgot.contains("webview"));
}

#[test]
fn rewarded_activity_data_encodes_earner_token() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();

    let fresh = client(&tmp, &stub);
    assert!(!fresh.rewarded_activity_data().expect_err("no token").is_critical());

    let psicash = tracker_client(&tmp, &stub);
    let data = psicash.rewarded_activity_data().expect("data");
    let payload: Value =
        serde_json::from_slice(&STANDARD.decode(data).expect("base64")).expect("json");
    assert_eq!(payload["tokens"], json!("e1"));
    assert_eq!(payload["v"], json!(1));
}

#[test]
fn expire_purchases_removes_only_expired() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    let now = DateTime::now();
    let ud = psicash.user_data();
    ud.add_purchase(&purchase("old", now.sub(Duration::minutes(5)))).expect("add");
    ud.add_purchase(&purchase("new", now.add(Duration::hours(1)))).expect("add");

    assert_eq!(
        psicash.next_expiring_purchase().expect("next").map(|p| p.id),
        Some("old".to_string())
    );
    assert_eq!(psicash.active_purchases().expect("active").len(), 1);

    let expired = psicash.expire_purchases().expect("expire");
    assert_eq!(expired.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["old"]);
    assert_eq!(psicash.purchases().expect("purchases").len(), 1);
    assert!(psicash.expire_purchases().expect("expire").is_empty());
}

#[test]
fn remove_purchases_ignores_unknown_ids() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    let later = DateTime::now().add(Duration::hours(1));
    psicash.user_data().add_purchase(&purchase("a", later)).expect("add");

    let removed = psicash
        .remove_purchases(&["a".to_string(), "missing".to_string()])
        .expect("remove");
    assert_eq!(removed.len(), 1);
    assert!(psicash.remove_purchases(&[]).expect("empty").is_empty());
    assert!(psicash.purchases().expect("purchases").is_empty());
}

#[test]
fn reset_user_keeps_instance() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    let instance = psicash.user_data().instance_id().expect("id");
    psicash.user_data().set_balance(9).expect("balance");

    psicash.reset_user().expect("reset");
    assert!(!psicash.has_tokens().expect("has_tokens"));
    assert!(!psicash.is_account().expect("is_account"));
    assert_eq!(psicash.balance().expect("balance"), 0);
    assert_eq!(psicash.user_data().instance_id().expect("id"), instance);
}

#[test]
fn migrated_tracker_tokens_replace_identity() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    psicash.user_data().set_balance(3).expect("balance");

    let tokens = [("earner", "me"), ("spender", "ms"), ("indicator", "mi")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    psicash.migrate_tracker_tokens(&tokens).expect("migrate");

    let stored = psicash.user_data().auth_tokens().expect("tokens");
    assert_eq!(stored["spender"].id, "ms");
    assert!(!psicash.is_account().expect("is_account"));
    assert_eq!(psicash.balance().expect("balance"), 0);
}

#[test]
fn diagnostic_info_omits_tokens() {
    let tmp = TempDir::new().expect("tmp");
    let stub = Stub::new();
    let psicash = tracker_client(&tmp, &stub);
    psicash
        .user_data()
        .add_purchase(&purchase("p", DateTime::now().add(Duration::hours(1))))
        .expect("add");

    let full = psicash.diagnostic_info(false).expect("diag");
    assert_eq!(full["test"], json!(true));
    assert_eq!(full["balance"], json!(0));
    assert_eq!(full["purchases"][0]["class"], json!("speed-boost"));
    assert!(full.get("purchasePrices").is_some());
    let text = full.to_string();
    for id in ["e1", "s1", "i1"] {
        assert!(!text.contains(&format!("\"{id}\"")), "{text}");
    }

    let lite = psicash.diagnostic_info(true).expect("lite");
    assert!(lite.get("purchasePrices").is_none());
}
