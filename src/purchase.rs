//! Purchase, authorization, price and token records.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    datetime::DateTime,
    error::{Error, Result},
    types::{TokenType, TransactionId},
};

/// Price of one purchasable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchasePrice {
    /// Transaction class, e.g. `speed-boost`.
    #[serde(rename = "class", alias = "Class")]
    pub transaction_class: String,
    /// Item within the class, e.g. `1hr`.
    #[serde(alias = "Distinguisher")]
    pub distinguisher: String,
    /// Price in the smallest balance unit.
    #[serde(alias = "Price")]
    pub price: i64,
}

/// Server-signed grant embedded in a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Authorization identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// What the authorization grants access to.
    #[serde(rename = "AccessType")]
    pub access_type: String,
    /// Server time at which the grant lapses.
    #[serde(rename = "Expires")]
    pub expires: DateTime,
    /// The base64 form as received, for handing on to other components.
    #[serde(rename = "Encoded", default)]
    pub encoded: String,
}

#[derive(Deserialize)]
struct SignedAuthorization {
    #[serde(rename = "Authorization")]
    authorization: Authorization,
}

impl Authorization {
    /// Decodes a base64 signed authorization envelope.
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::critical(format!("authorization is not valid base64: {e}")))?;
        let signed: SignedAuthorization = serde_json::from_slice(&raw)
            .map_err(|e| Error::critical(format!("authorization is not valid JSON: {e}")))?;
        Ok(Self {
            encoded: encoded.trim().to_string(),
            ..signed.authorization
        })
    }
}

/// A completed purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Server-assigned transaction id. Unique among stored purchases.
    pub id: TransactionId,
    /// Transaction class.
    #[serde(rename = "class")]
    pub transaction_class: String,
    /// Item within the class.
    pub distinguisher: String,
    /// Server time of creation. Purchases are kept in this order.
    #[serde(rename = "serverTimeCreated", default)]
    pub server_time_created: DateTime,
    /// Server time of expiry, for expiring purchases.
    #[serde(rename = "serverTimeExpiry", default, skip_serializing_if = "Option::is_none")]
    pub server_time_expiry: Option<DateTime>,
    /// `server_time_expiry` converted to local time using the stored clock
    /// skew. Never stored; filled in on every read.
    #[serde(skip)]
    pub local_time_expiry: Option<DateTime>,
    /// Grant attached to the purchase, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

impl Purchase {
    /// True when the purchase has a local expiry that is before `now`.
    pub fn is_expired_at(&self, now: DateTime) -> bool {
        self.local_time_expiry.is_some_and(|t| t < now)
    }

    /// [`Purchase::is_expired_at`] against the current time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(DateTime::now())
    }
}

/// One auth token as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenInfo {
    /// Opaque token value sent in the auth header.
    #[serde(rename = "ID")]
    pub id: String,
    /// Server time at which the token stops working. Tracker tokens have none.
    #[serde(rename = "Expiry")]
    pub server_time_expiry: Option<DateTime>,
}

impl TokenInfo {
    /// A token without expiry.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            server_time_expiry: None,
        }
    }
}

// Older stores and the tracker endpoint use a bare string per token type.
impl<'de> Deserialize<'de> for TokenInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Full {
                #[serde(rename = "ID")]
                id: String,
                #[serde(rename = "Expiry", default)]
                expiry: Option<DateTime>,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bare(id) => Self::new(id),
            Repr::Full { id, expiry } => Self {
                id,
                server_time_expiry: expiry,
            },
        })
    }
}

/// Tokens keyed by token type.
pub type AuthTokens = BTreeMap<TokenType, TokenInfo>;
