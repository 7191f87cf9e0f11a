//! Server protocol: request building, retries and the state-changing flows.

/// Account login and logout.
pub mod account;
/// Client configuration and server endpoints.
pub mod config;
/// HTTP collaborator contract.
pub mod http;
/// Landing-page, buy and account-site links.
pub mod links;
/// The client type, its accessors and local operations.
pub mod psicash;
/// Tracker creation and state refresh.
pub mod refresh;
/// Request construction and retry.
mod request;
/// Purchases.
pub mod transaction;
/// Server response bodies.
pub mod wire;

pub use config::{PsiCashConfig, ServerEndpoint};
pub use http::{HttpParams, HttpRequester, HttpResult};
pub use links::UserSiteUrlType;
pub use psicash::{
    AccountLoginResponse, AccountLogoutResponse, NewExpiringPurchaseResponse, PsiCash,
    RefreshStateResponse,
};
