use serde_json::Value;
use tracing::info;

use crate::{
    error::{Error, Result, ResultExt},
    types::Status,
};

use super::{
    http::{METHOD_POST, is_server_error},
    psicash::{NewExpiringPurchaseResponse, PsiCash},
    request::ApiRequest,
    wire::{EXPIRING_PURCHASE_TYPE, parse_body, purchase_from_json},
};

impl PsiCash {
    /// Buys `distinguisher` of `transaction_class`, expecting it to cost
    /// `expected_price`.
    ///
    /// The server reports the resulting balance for most outcomes, so the
    /// stored balance is updated even when the purchase is refused.
    pub fn new_expiring_purchase(
        &self,
        transaction_class: &str,
        distinguisher: &str,
        expected_price: i64,
    ) -> Result<NewExpiringPurchaseResponse> {
        let request = ApiRequest::new(METHOD_POST, "/transaction")
            .authenticated()
            .query("class", transaction_class)
            .query("distinguisher", distinguisher)
            .query("expectedAmount", (-expected_price).to_string());

        let result = self
            .make_http_request_with_retry(&request)
            .context("purchase request failed")?;

        let status = match result.code {
            200 => Status::Success,
            429 => Status::ExistingTransaction,
            402 => Status::InsufficientBalance,
            409 => Status::TransactionAmountMismatch,
            404 => Status::TransactionTypeNotFound,
            401 => Status::InvalidTokens,
            code if is_server_error(code) => Status::ServerError,
            code => {
                return Err(Error::critical(format!(
                    "transaction request returned unexpected status {code}"
                )));
            }
        };

        let reports_balance = matches!(result.code, 200 | 402 | 409 | 429);
        if !reports_balance || (status != Status::Success && result.body.trim().is_empty()) {
            return Ok(NewExpiringPurchaseResponse {
                status,
                purchase: None,
            });
        }

        let mut body: Value = parse_body("transaction", &result.body)?;

        let tx = self.user_data.transaction()?;
        if let Some(balance) = body.get("Balance") {
            let balance = balance
                .as_i64()
                .ok_or_else(|| Error::critical(format!("transaction Balance is not an integer: {balance}")))?;
            self.user_data.set_balance(balance)?;
        }

        let mut purchase = None;
        if status == Status::Success {
            let server_now = self.server_now()?;
            let Some(fields) = body.as_object_mut() else {
                return Err(Error::critical("transaction response is not an object"));
            };
            fields
                .entry("Class")
                .or_insert_with(|| Value::from(transaction_class));
            fields
                .entry("Distinguisher")
                .or_insert_with(|| Value::from(distinguisher));
            fields
                .entry("Created")
                .or_insert_with(|| Value::from(server_now.to_iso8601()));

            let mut p = purchase_from_json(&body, Some(EXPIRING_PURCHASE_TYPE))?;
            self.user_data.add_purchase(&p)?;
            self.user_data.update_purchase_local_time_expiry(&mut p)?;
            info!(id = %p.id, class = %p.transaction_class, distinguisher = %p.distinguisher, "purchase made");
            purchase = Some(p);
        }
        tx.commit().context("failed to store purchase result")?;

        Ok(NewExpiringPurchaseResponse { status, purchase })
    }
}
