use tracing::{debug, error, info};

use crate::{
    datetime::DateTime,
    error::{Error, Result, ResultExt},
    purchase::AuthTokens,
    types::{MINIMUM_TOKEN_TYPES, Status},
};

use super::{
    http::{METHOD_GET, METHOD_POST, is_server_error},
    psicash::{PsiCash, RefreshStateResponse},
    request::ApiRequest,
    wire::{RefreshStateBody, parse_body, purchase_from_json},
};

impl PsiCash {
    /// Brings local state in line with the server.
    ///
    /// With no tokens and no account, a tracker is created first. With
    /// `local_only`, nothing is sent: tokens past their expiry are dropped and
    /// an account holding them becomes logged out.
    pub fn refresh_state(&self, purchase_classes: &[&str], local_only: bool) -> Result<RefreshStateResponse> {
        let active_before = self.active_authorization_ids()?;

        if local_only {
            let demoted = self.drop_expired_tokens()?;
            return Ok(RefreshStateResponse {
                status: Status::Success,
                reconnect_required: demoted && !active_before.is_empty(),
            });
        }

        let status = self
            .refresh_state_remote(purchase_classes, true)
            .context("refresh state failed")?;

        let active_after = self.active_authorization_ids()?;
        Ok(RefreshStateResponse {
            status,
            reconnect_required: active_before.iter().any(|id| !active_after.contains(id)),
        })
    }

    fn drop_expired_tokens(&self) -> Result<bool> {
        let tokens = self.user_data.auth_tokens()?;
        let now = DateTime::now();
        let diff = self.user_data.server_time_diff()?;
        let expired = tokens
            .values()
            .filter_map(|t| t.server_time_expiry)
            .any(|expiry| expiry.sub(diff) < now);
        if !expired {
            return Ok(false);
        }

        let is_account = self.user_data.is_account()?;
        info!(is_account, "auth tokens expired; clearing local identity");
        if is_account {
            self.user_data
                .delete_user_data(true)
                .context("failed to log out expired account")?;
        } else {
            self.user_data
                .clear_auth_tokens()
                .context("failed to clear expired tracker tokens")?;
        }
        Ok(true)
    }

    fn refresh_state_remote(&self, purchase_classes: &[&str], allow_recursion: bool) -> Result<Status> {
        if !self.user_data.has_tokens()? {
            if self.is_account()? {
                // A logged-out account needs a login, not a tracker.
                return Ok(Status::Success);
            }
            if !allow_recursion {
                error!("no tokens after obtaining a new tracker");
                return Err(Error::critical("failed to obtain valid tracker tokens"));
            }

            let status = self.new_tracker().context("new tracker failed")?;
            if status != Status::Success {
                return Ok(status);
            }
            return self.refresh_state_remote(purchase_classes, false);
        }

        let mut request = ApiRequest::new(METHOD_GET, "/refresh-state").authenticated();
        for class in purchase_classes {
            request = request.query("class", *class);
        }
        let last_transaction_id = self.user_data.last_transaction_id()?;
        if !last_transaction_id.is_empty() {
            request = request.query("lastTransactionID", last_transaction_id);
        }
        request = request.query("tokenTypes", self.user_data.valid_token_types()?.join(","));

        let result = self.make_http_request_with_retry(&request)?;

        match result.code {
            200 => {}
            401 => {
                let is_account = self.user_data.is_account()?;
                self.user_data.delete_user_data(is_account)?;
                return Ok(Status::InvalidTokens);
            }
            code if is_server_error(code) => return Ok(Status::ServerError),
            code => {
                return Err(Error::critical(format!(
                    "refresh-state returned unexpected status {code}"
                )));
            }
        }

        let body: RefreshStateBody = parse_body("refresh-state", &result.body)?;

        let tx = self.user_data.transaction()?;
        self.user_data.cull_auth_tokens(&body.tokens_valid)?;

        if body.tokens_valid.values().any(|valid| *valid) {
            if let Some(is_account) = body.is_account {
                if self.user_data.is_account()? && !is_account {
                    error!("server reports a known account as a tracker");
                    return Err(Error::critical("account cannot become a tracker"));
                }
                self.user_data.set_is_account(is_account)?;
            }
        }

        let is_account = self.user_data.is_account()?;
        if is_account {
            if let Some(username) = body.account_username.as_deref() {
                self.user_data.set_account_username(username)?;
            }
        }
        if let Some(balance) = body.balance {
            self.user_data.set_balance(balance)?;
        }
        if !purchase_classes.is_empty() {
            if let Some(prices) = body.purchase_prices.as_deref() {
                self.user_data.set_purchase_prices(prices)?;
            }
        }
        for raw in body.purchases.as_deref().unwrap_or_default() {
            let purchase = purchase_from_json(raw, None)?;
            if self.user_data.add_purchase(&purchase)? {
                debug!(id = %purchase.id, class = %purchase.transaction_class, "stored new purchase");
            }
        }

        let has_tokens = self.user_data.has_tokens()?;
        if is_account && !has_tokens {
            info!("account tokens no longer valid; logging out");
            self.user_data.delete_user_data(true)?;
        }
        tx.commit().context("failed to store refreshed state")?;

        if is_account || has_tokens {
            return Ok(Status::Success);
        }
        if !allow_recursion {
            error!("new tracker tokens rejected by the server");
            return Err(Error::critical("tracker tokens invalid immediately after creation"));
        }
        info!("tracker tokens invalidated; obtaining a new tracker");
        self.refresh_state_remote(purchase_classes, true)
    }

    /// Obtains tracker tokens and a zero balance.
    pub(super) fn new_tracker(&self) -> Result<Status> {
        let request = ApiRequest::new(METHOD_POST, "/tracker")
            .query("instanceID", self.user_data.instance_id()?);
        let result = self.make_http_request_with_retry(&request)?;

        match result.code {
            200 => {}
            code if is_server_error(code) => return Ok(Status::ServerError),
            code => {
                return Err(Error::critical(format!(
                    "tracker request returned unexpected status {code}"
                )));
            }
        }

        let tokens: AuthTokens = parse_body("tracker", &result.body)?;
        if let Some(missing) = MINIMUM_TOKEN_TYPES.iter().find(|t| !tokens.contains_key(**t)) {
            return Err(Error::critical(format!("tracker response lacks {missing} token")));
        }

        let tx = self.user_data.transaction()?;
        self.user_data.set_auth_tokens(&tokens, false, "")?;
        self.user_data.set_balance(0)?;
        tx.commit().context("failed to store tracker tokens")?;
        Ok(Status::Success)
    }
}
