use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result, ResultExt},
    types::{MINIMUM_TOKEN_TYPES, Status},
};

use super::{
    http::{METHOD_POST, is_server_error},
    psicash::{AccountLoginResponse, AccountLogoutResponse, PsiCash},
    request::ApiRequest,
    wire::{LoginBody, parse_body},
};

impl PsiCash {
    /// Logs in to an account. Tracker tokens currently held are offered to
    /// the server so the tracker balance can be merged into the account.
    pub fn account_login(&self, username: &str, password: &str) -> Result<AccountLoginResponse> {
        let old_tokens = if !self.is_account()? && self.user_data.has_tokens()? {
            let ids: BTreeMap<String, String> = self
                .user_data
                .auth_tokens()?
                .into_iter()
                .map(|(kind, token)| (kind, token.id))
                .collect();
            serde_json::to_value(ids)?
        } else {
            Value::Null
        };

        let body = json!({
            "username": username,
            "password": password,
            "instanceID": self.user_data.instance_id()?,
            "oldTokens": old_tokens,
        });
        let request = ApiRequest::new(METHOD_POST, "/login").json_body(&body);
        let result = self
            .make_http_request_with_retry(&request)
            .context("login request failed")?;

        let status = match result.code {
            200 => Status::Success,
            401 => Status::InvalidCredentials,
            400 => Status::BadRequest,
            code if is_server_error(code) => Status::ServerError,
            code => {
                return Err(Error::critical(format!(
                    "login request returned unexpected status {code}"
                )));
            }
        };
        if status != Status::Success {
            return Ok(AccountLoginResponse {
                status,
                last_tracker_merge: None,
            });
        }

        let login: LoginBody = parse_body("login", &result.body)?;
        if let Some(missing) = MINIMUM_TOKEN_TYPES
            .iter()
            .find(|t| !login.tokens.contains_key(**t))
        {
            return Err(Error::critical(format!("login response lacks {missing} token")));
        }

        let tx = self.user_data.transaction()?;
        self.user_data.delete_user_data(false)?;
        self.user_data.set_auth_tokens(&login.tokens, true, username)?;
        tx.commit().context("failed to store account tokens")?;

        let last_tracker_merge = login
            .tracker_merged
            .map(|merged| merged && login.tracker_merges_remaining == Some(0));
        Ok(AccountLoginResponse {
            status,
            last_tracker_merge,
        })
    }

    /// Logs out of the account. The server is told on a best-effort basis;
    /// local state is cleared regardless.
    pub fn account_logout(&self) -> Result<AccountLogoutResponse> {
        if !self.user_data.has_tokens()? {
            return Err(Error::noncritical("user has no tokens to log out"));
        }
        if !self.user_data.is_account()? {
            return Err(Error::noncritical("user is not an account"));
        }

        let had_active_authorizations = !self.active_authorization_ids()?.is_empty();

        let request = ApiRequest::new(METHOD_POST, "/logout").authenticated();
        match self.make_http_request_with_retry(&request) {
            Ok(result) if result.code == 200 => debug!("server logout succeeded"),
            Ok(result) => warn!(code = result.code, "server logout failed; logging out locally"),
            Err(err) => warn!(%err, "server logout failed; logging out locally"),
        }

        self.user_data
            .delete_user_data(true)
            .context("failed to clear account data")?;
        Ok(AccountLogoutResponse {
            reconnect_required: had_active_authorizations,
        })
    }
}
