//! Shared primitive IDs, token-type names and request outcome codes.

use serde::{Deserialize, Serialize};

/// Server-assigned transaction identifier.
pub type TransactionId = String;
/// Token type name, e.g. [`EARNER_TOKEN_TYPE`].
pub type TokenType = String;

/// Token used to earn balance (landing pages, rewarded activities).
pub const EARNER_TOKEN_TYPE: &str = "earner";
/// Token used to spend balance on purchases.
pub const SPENDER_TOKEN_TYPE: &str = "spender";
/// Token used to query balance and state.
pub const INDICATOR_TOKEN_TYPE: &str = "indicator";
/// Token held only by accounts.
pub const ACCOUNT_TOKEN_TYPE: &str = "account";
/// Token used to invalidate an account session.
pub const LOGOUT_TOKEN_TYPE: &str = "logout";

/// The token types that together make a usable identity.
pub const MINIMUM_TOKEN_TYPES: [&str; 3] =
    [EARNER_TOKEN_TYPE, SPENDER_TOKEN_TYPE, INDICATOR_TOKEN_TYPE];

/// Transaction class for speed-boost purchases.
pub const SPEED_BOOST_CLASS: &str = "speed-boost";

/// Business outcome of a protocol request.
///
/// These are expected, handleable branches of normal operation. Failures of
/// the transport or of local state are reported through
/// [`crate::error::Error`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The request succeeded.
    Success,
    /// A purchase of this class is already active; the existing one stands.
    ExistingTransaction,
    /// Not enough balance for the requested purchase.
    InsufficientBalance,
    /// The expected price no longer matches the server's price.
    TransactionAmountMismatch,
    /// The class/distinguisher pair is unknown to the server.
    TransactionTypeNotFound,
    /// The server rejected our tokens.
    InvalidTokens,
    /// Username or password were rejected.
    InvalidCredentials,
    /// The server considered the request malformed.
    BadRequest,
    /// The server failed after all retries.
    ServerError,
}

impl Status {
    /// Stable name for diagnostics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::ExistingTransaction => "ExistingTransaction",
            Self::InsufficientBalance => "InsufficientBalance",
            Self::TransactionAmountMismatch => "TransactionAmountMismatch",
            Self::TransactionTypeNotFound => "TransactionTypeNotFound",
            Self::InvalidTokens => "InvalidTokens",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::BadRequest => "BadRequest",
            Self::ServerError => "ServerError",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
