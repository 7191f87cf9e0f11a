use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    datetime::DateTime,
    error::{Error, Result},
    purchase::{AuthTokens, Authorization, Purchase, PurchasePrice},
};

pub const EXPIRING_PURCHASE_TYPE: &str = "expiring-purchase";

#[derive(Debug, Deserialize)]
pub struct RefreshStateBody {
    #[serde(rename = "TokensValid", default)]
    pub tokens_valid: HashMap<String, bool>,
    #[serde(rename = "IsAccount", default)]
    pub is_account: Option<bool>,
    #[serde(rename = "AccountUsername", default)]
    pub account_username: Option<String>,
    #[serde(rename = "Balance", default)]
    pub balance: Option<i64>,
    #[serde(rename = "PurchasePrices", default)]
    pub purchase_prices: Option<Vec<PurchasePrice>>,
    #[serde(rename = "Purchases", default)]
    pub purchases: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(rename = "Tokens")]
    pub tokens: AuthTokens,
    #[serde(rename = "TrackerMerged", default)]
    pub tracker_merged: Option<bool>,
    #[serde(rename = "TrackerMergesRemaining", default)]
    pub tracker_merges_remaining: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PurchaseBody {
    #[serde(rename = "TransactionID")]
    id: String,
    #[serde(rename = "Class")]
    transaction_class: String,
    #[serde(rename = "Distinguisher")]
    distinguisher: String,
    #[serde(rename = "Created")]
    created: DateTime,
    #[serde(rename = "Authorization", default)]
    authorization: Option<String>,
    #[serde(rename = "TransactionResponse", default)]
    transaction_response: Option<TransactionResponse>,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Values", default)]
    values: Value,
}

pub fn parse_body<T: for<'de> Deserialize<'de>>(what: &str, body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Err(Error::critical(format!("{what} response has no body")));
    }
    serde_json::from_str(body)
        .map_err(|e| Error::critical(format!("failed to parse {what} response: {e}")))
}

/// Builds a [`Purchase`] from a server transaction object. When
/// `expected_type` is given, the transaction's type must match it.
pub fn purchase_from_json(value: &Value, expected_type: Option<&str>) -> Result<Purchase> {
    let body = PurchaseBody::deserialize(value)
        .map_err(|e| Error::critical(format!("malformed purchase: {e}")))?;

    let kind = body.transaction_response.as_ref().map(|r| r.kind.as_str());
    if let Some(expected) = expected_type {
        if kind != Some(expected) {
            return Err(Error::critical(format!(
                "purchase {} has type {kind:?}, expected {expected:?}",
                body.id
            )));
        }
    }

    let expires = body
        .transaction_response
        .as_ref()
        .and_then(|r| r.values.get("Expires"))
        .and_then(Value::as_str);
    let server_time_expiry = match expires {
        Some(raw) => Some(DateTime::from_iso8601(raw).ok_or_else(|| {
            Error::critical(format!("purchase {} has bad expiry {raw:?}", body.id))
        })?),
        None => None,
    };
    if kind == Some(EXPIRING_PURCHASE_TYPE) && server_time_expiry.is_none() {
        return Err(Error::critical(format!(
            "expiring purchase {} has no expiry",
            body.id
        )));
    }

    let authorization = match body.authorization.as_deref() {
        Some(encoded) if !encoded.trim().is_empty() => Some(Authorization::decode(encoded).map_err(|e| {
            e.wrap(format!("failed to decode authorization of purchase {}", body.id))
        })?),
        _ => None,
    };

    Ok(Purchase {
        id: body.id,
        transaction_class: body.transaction_class,
        distinguisher: body.distinguisher,
        server_time_created: body.created,
        server_time_expiry,
        local_time_expiry: None,
        authorization,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn transaction(kind: &str, values: Value) -> Value {
        json!({
            "TransactionID": "tx1",
            "Class": "speed-boost",
            "Distinguisher": "1hr",
            "Created": "2030-01-01T00:00:00.000Z",
            "TransactionResponse": {"Type": kind, "Values": values},
        })
    }

    #[test]
    fn expiring_purchase_parses_expiry() {
        let p = purchase_from_json(
            &transaction(EXPIRING_PURCHASE_TYPE, json!({"Expires": "2030-01-01T01:00:00.000Z"})),
            Some(EXPIRING_PURCHASE_TYPE),
        )
        .expect("purchase");
        assert_eq!(p.id, "tx1");
        assert_eq!(p.server_time_expiry, DateTime::from_iso8601("2030-01-01T01:00:00Z"));
        assert!(p.authorization.is_none());
    }

    #[test]
    fn expiring_purchase_requires_expiry_and_type() {
        let missing = purchase_from_json(&transaction(EXPIRING_PURCHASE_TYPE, json!({})), None);
        assert!(missing.expect_err("no expiry").is_critical());

        let wrong = purchase_from_json(
            &transaction("other", json!({})),
            Some(EXPIRING_PURCHASE_TYPE),
        );
        assert!(wrong.expect_err("wrong type").is_critical());
    }
}
