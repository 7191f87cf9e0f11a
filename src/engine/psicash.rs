use std::collections::BTreeMap;

use hashbrown::HashSet;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    datetime::DateTime,
    error::{Error, Result, ResultExt},
    purchase::{AuthTokens, Authorization, Purchase, PurchasePrice, TokenInfo},
    types::{Status, TokenType, TransactionId},
    userdata::UserData,
};

use super::{
    config::{PsiCashConfig, ServerEndpoint},
    http::HttpRequester,
};

/// Result of [`PsiCash::refresh_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshStateResponse {
    pub status: Status,
    /// An authorization that was active before the call no longer is; the
    /// network session it was applied to must be rebuilt.
    pub reconnect_required: bool,
}

/// Result of [`PsiCash::new_expiring_purchase`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpiringPurchaseResponse {
    pub status: Status,
    /// The stored purchase, when `status` is [`Status::Success`].
    pub purchase: Option<Purchase>,
}

/// Result of [`PsiCash::account_login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLoginResponse {
    pub status: Status,
    /// `Some(true)` when this login used up the last allowed tracker merge.
    pub last_tracker_merge: Option<bool>,
}

/// Result of [`PsiCash::account_logout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLogoutResponse {
    pub reconnect_required: bool,
}

/// Client for the PsiCash transaction server.
///
/// Owns the user data for one storage root. All state lives in the
/// datastore; a `PsiCash` may be shared between threads by reference.
pub struct PsiCash {
    pub(super) config: PsiCashConfig,
    pub(super) endpoint: ServerEndpoint,
    pub(super) user_data: UserData,
    pub(super) requester: Option<Box<dyn HttpRequester>>,
}

impl std::fmt::Debug for PsiCash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsiCash")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("has_requester", &self.requester.is_some())
            .finish()
    }
}

impl PsiCash {
    /// Loads (or creates) the datastore under `config.file_store_root`.
    pub fn init(config: PsiCashConfig) -> Result<Self> {
        if config.user_agent.is_empty() {
            return Err(Error::critical("user agent is required"));
        }
        if config.file_store_root.as_os_str().is_empty() {
            return Err(Error::critical("file store root is required"));
        }

        let user_data = UserData::new();
        if config.force_reset {
            info!(root = %config.file_store_root.display(), "force-resetting user data");
            user_data
                .clear(&config.file_store_root, config.test)
                .context("failed to force-reset user data")?;
        }
        user_data
            .init(&config.file_store_root, config.test)
            .context("failed to initialize user data")?;

        Ok(Self {
            endpoint: config.endpoint(),
            config,
            user_data,
            requester: None,
        })
    }

    /// Sets the function that performs HTTP requests.
    pub fn with_requester(mut self, requester: impl HttpRequester + 'static) -> Self {
        self.set_http_requester(requester);
        self
    }

    pub fn set_http_requester(&mut self, requester: impl HttpRequester + 'static) {
        self.requester = Some(Box::new(requester));
    }

    pub fn config(&self) -> &PsiCashConfig {
        &self.config
    }

    /// The repository backing this client.
    pub fn user_data(&self) -> &UserData {
        &self.user_data
    }

    /// Adds `key` to the metadata sent with every request.
    pub fn set_request_metadata_item(&self, key: &str, value: &str) -> Result<()> {
        self.user_data
            .set_request_metadata_item(key, Value::from(value))
            .context("failed to set request metadata item")
    }

    pub fn set_locale(&self, locale: &str) -> Result<()> {
        self.user_data.set_locale(locale).context("failed to set locale")
    }

    pub fn has_tokens(&self) -> Result<bool> {
        self.user_data.has_tokens()
    }

    pub fn valid_token_types(&self) -> Result<Vec<TokenType>> {
        self.user_data.valid_token_types()
    }

    /// True for logged-in and logged-out accounts alike.
    pub fn is_account(&self) -> Result<bool> {
        Ok(self.user_data.is_account()? || self.user_data.is_logged_out_account()?)
    }

    /// The username, while logged in to an account.
    pub fn account_username(&self) -> Result<Option<String>> {
        if !self.user_data.is_account()? || !self.user_data.has_tokens()? {
            return Ok(None);
        }
        let username = self.user_data.account_username()?;
        Ok((!username.is_empty()).then_some(username))
    }

    pub fn balance(&self) -> Result<i64> {
        self.user_data.balance()
    }

    pub fn purchase_prices(&self) -> Result<Vec<PurchasePrice>> {
        self.user_data.purchase_prices()
    }

    pub fn purchases(&self) -> Result<Vec<Purchase>> {
        self.user_data.purchases()
    }

    /// Purchases that have not expired.
    pub fn active_purchases(&self) -> Result<Vec<Purchase>> {
        let now = DateTime::now();
        Ok(self
            .purchases()?
            .into_iter()
            .filter(|p| !p.is_expired_at(now))
            .collect())
    }

    /// Authorizations of all purchases, or only of unexpired ones.
    pub fn authorizations(&self, active_only: bool) -> Result<Vec<Authorization>> {
        let purchases = if active_only {
            self.active_purchases()?
        } else {
            self.purchases()?
        };
        Ok(purchases.into_iter().filter_map(|p| p.authorization).collect())
    }

    pub fn purchases_by_authorization_id(&self, ids: &[String]) -> Result<Vec<Purchase>> {
        Ok(self
            .purchases()?
            .into_iter()
            .filter(|p| p.authorization.as_ref().is_some_and(|a| ids.contains(&a.id)))
            .collect())
    }

    /// The purchase with the earliest local expiry, expired or not.
    pub fn next_expiring_purchase(&self) -> Result<Option<Purchase>> {
        Ok(self
            .purchases()?
            .into_iter()
            .filter(|p| p.local_time_expiry.is_some())
            .min_by_key(|p| p.local_time_expiry))
    }

    /// Removes expired purchases and returns them.
    pub fn expire_purchases(&self) -> Result<Vec<Purchase>> {
        let now = DateTime::now();
        let expired: Vec<TransactionId> = self
            .purchases()?
            .into_iter()
            .filter(|p| p.is_expired_at(now))
            .map(|p| p.id)
            .collect();
        self.remove_purchases(&expired)
    }

    /// Removes the purchases with the given ids and returns them. Unknown ids
    /// are ignored.
    pub fn remove_purchases(&self, ids: &[TransactionId]) -> Result<Vec<Purchase>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.user_data
            .remove_purchases(ids)
            .context("failed to remove purchases")
    }

    /// Forgets the current user, keeping the instance ID.
    pub fn reset_user(&self) -> Result<()> {
        self.user_data
            .delete_user_data(false)
            .context("failed to reset user")
    }

    /// Replaces the current identity with tracker tokens obtained elsewhere.
    pub fn migrate_tracker_tokens(&self, tokens: &BTreeMap<TokenType, String>) -> Result<()> {
        let auth_tokens: AuthTokens = tokens
            .iter()
            .map(|(kind, id)| (kind.clone(), TokenInfo::new(id.clone())))
            .collect();

        let tx = self.user_data.transaction()?;
        self.user_data.delete_user_data(false)?;
        self.user_data.set_auth_tokens(&auth_tokens, false, "")?;
        self.user_data.set_balance(0)?;
        tx.commit().context("failed to migrate tracker tokens")
    }

    /// State summary for support diagnostics. Contains no tokens.
    pub fn diagnostic_info(&self, lite: bool) -> Result<Value> {
        let purchases: Vec<Value> = self
            .purchases()?
            .into_iter()
            .map(|p| json!({"class": p.transaction_class, "distinguisher": p.distinguisher}))
            .collect();

        let mut info = json!({
            "test": self.config.test,
            "validTokenTypes": self.valid_token_types()?,
            "isAccount": self.user_data.is_account()?,
            "isLoggedOutAccount": self.user_data.is_logged_out_account()?,
            "balance": self.balance()?,
            "serverTimeDiff": self.user_data.server_time_diff()?.num_milliseconds(),
            "purchases": purchases,
        });
        if !lite {
            info["purchasePrices"] = serde_json::to_value(self.purchase_prices()?)?;
        }
        Ok(info)
    }

    pub(super) fn active_authorization_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .authorizations(true)?
            .into_iter()
            .map(|a| a.id)
            .collect())
    }

    /// Current time on the server's clock, as far as we know it.
    pub(super) fn server_now(&self) -> Result<DateTime> {
        Ok(DateTime::now().add(self.user_data.server_time_diff()?))
    }
}
