use std::{path::PathBuf, time::Duration};

pub const API_VERSION_PREFIX: &str = "/v1";
pub const BUY_PSI_URL: &str = "https://buy.psi.cash/";
const PROD_HOSTNAME: &str = "api.psi.cash";
const DEV_HOSTNAME: &str = "dev-api.psi.cash";
const PROD_ACCOUNT_SITE: &str = "https://my.psi.cash";
const DEV_ACCOUNT_SITE: &str = "https://dev-my.psi.cash";

/// Where API requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn prod() -> Self {
        Self {
            scheme: "https".to_string(),
            hostname: PROD_HOSTNAME.to_string(),
            port: 443,
        }
    }

    pub fn dev() -> Self {
        Self {
            hostname: DEV_HOSTNAME.to_string(),
            ..Self::prod()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PsiCashConfig {
    /// Sent as `User-Agent` and in request metadata. Required.
    pub user_agent: String,
    /// Existing directory holding the datastore file. Required.
    pub file_store_root: PathBuf,
    /// Discard stored user data before loading.
    pub force_reset: bool,
    /// Talk to the dev server and keep a separate `.dev` datastore.
    pub test: bool,
    /// Overrides the endpoint implied by `test`.
    pub server: Option<ServerEndpoint>,
    pub max_attempts: u32,
    /// The sleep before retry `n` is `n` times this.
    pub retry_backoff: Duration,
}

impl Default for PsiCashConfig {
    fn default() -> Self {
        Self {
            user_agent: String::new(),
            file_store_root: PathBuf::new(),
            force_reset: false,
            test: false,
            server: None,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl PsiCashConfig {
    pub fn endpoint(&self) -> ServerEndpoint {
        match &self.server {
            Some(server) => server.clone(),
            None if self.test => ServerEndpoint::dev(),
            None => ServerEndpoint::prod(),
        }
    }

    pub fn account_site(&self) -> &'static str {
        if self.test { DEV_ACCOUNT_SITE } else { PROD_ACCOUNT_SITE }
    }
}
