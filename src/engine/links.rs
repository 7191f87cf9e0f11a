use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use serde_json::{Value, json};
use url::{Url, form_urlencoded};

use crate::{
    error::{Error, Result},
    types::EARNER_TOKEN_TYPE,
};

use super::{config::BUY_PSI_URL, psicash::PsiCash};

const PAYLOAD_PARAM: &str = "psicash";
const PAYLOAD_VERSION: i64 = 1;

/// Pages of the account website.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSiteUrlType {
    AccountSignup,
    AccountManagement,
    ForgotAccount,
}

impl UserSiteUrlType {
    fn path(self) -> &'static str {
        match self {
            Self::AccountSignup => "/signup",
            Self::AccountManagement => "/",
            Self::ForgotAccount => "/forgot",
        }
    }
}

impl PsiCash {
    fn earner_token(&self) -> Result<Option<String>> {
        Ok(self
            .user_data
            .auth_tokens()?
            .remove(EARNER_TOKEN_TYPE)
            .map(|t| t.id))
    }

    fn link_payload(&self) -> Result<Value> {
        let mut payload = json!({
            "v": PAYLOAD_VERSION,
            "tokens": self.earner_token()?,
            "metadata": self.request_metadata(0)?,
        });
        if self.config.test {
            payload["dev"] = json!(1);
            payload["debug"] = json!(1);
        }
        Ok(payload)
    }

    /// Adds the earner token and request metadata to `url`.
    ///
    /// The payload goes into the fragment as `#!psicash=...` when the URL has
    /// no fragment and `query_param_only` is false; otherwise it is appended
    /// as the `psicash` query item.
    pub fn add_earner_token_to_url(&self, url: &str, query_param_only: bool) -> Result<String> {
        let mut url = Url::parse(url)
            .map_err(|e| Error::noncritical(format!("invalid URL {url:?}: {e}")))?;

        let payload = STANDARD_NO_PAD.encode(self.link_payload()?.to_string());
        let encoded: String = form_urlencoded::byte_serialize(payload.as_bytes()).collect();

        let has_fragment = url.fragment().is_some_and(|f| !f.is_empty());
        if !query_param_only && !has_fragment {
            url.set_fragment(Some(&format!("!{PAYLOAD_PARAM}={encoded}")));
        } else {
            append_query(&mut url, PAYLOAD_PARAM, &encoded);
        }
        Ok(url.to_string())
    }

    /// `url` with the earner token added, for opening a landing page.
    pub fn modify_landing_page(&self, url: &str) -> Result<String> {
        self.add_earner_token_to_url(url, false)
    }

    /// Link to the page for buying balance. Requires an earner token.
    pub fn buy_psi_url(&self) -> Result<String> {
        if self.earner_token()?.is_none() {
            return Err(Error::noncritical("an earner token is required to buy PsiCash"));
        }
        self.add_earner_token_to_url(BUY_PSI_URL, true)
    }

    /// Link to a page of the account website.
    pub fn user_site_url(&self, kind: UserSiteUrlType, webview: bool) -> Result<String> {
        let base = format!("{}{}", self.config.account_site(), kind.path());
        let mut url = Url::parse(&base)
            .map_err(|e| Error::critical(format!("invalid account site URL {base:?}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("utm_source", &self.config.user_agent);
            let locale = self.user_data.locale()?;
            if !locale.is_empty() {
                query.append_pair("locale", &locale);
            }
            if webview {
                query.append_pair("webview", "true");
            }
        }
        self.add_earner_token_to_url(url.as_str(), true)
    }

    /// Base64 payload identifying the user to a rewarded-activity provider.
    pub fn rewarded_activity_data(&self) -> Result<String> {
        let Some(earner) = self.earner_token()? else {
            return Err(Error::noncritical(
                "an earner token is required for rewarded activity data",
            ));
        };
        let payload = json!({
            "v": PAYLOAD_VERSION,
            "tokens": earner,
            "metadata": self.request_metadata(0)?,
        });
        Ok(STANDARD.encode(payload.to_string()))
    }
}

fn append_query(url: &mut Url, name: &str, encoded_value: &str) {
    let query = match url.query() {
        Some(q) if !q.is_empty() => format!("{q}&{name}={encoded_value}"),
        _ => format!("{name}={encoded_value}"),
    };
    url.set_query(Some(&query));
}
