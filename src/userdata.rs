//! Typed repository over the datastore.
//!
//! This is the only place that knows the document layout. Getters substitute
//! a default when a field is absent; a value of the wrong type is a critical
//! error.

use std::{marker::PhantomData, path::Path};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{error, warn};

use crate::{
    core::{
        datastore::{Datastore, GetError},
        path,
    },
    datetime::{DateTime, Duration},
    error::{Error, Result, ResultExt},
    purchase::{AuthTokens, Purchase, PurchasePrice},
    types::{MINIMUM_TOKEN_TYPES, TokenType, TransactionId},
};

/// Schema version written to `/v`.
pub const DATASTORE_VERSION: i64 = 2;

const VERSION: &str = "/v";
const INSTANCE_ID: &str = "/instance/instanceID";
const IS_LOGGED_OUT_ACCOUNT: &str = "/instance/isLoggedOutAccount";
const LOCALE: &str = "/instance/locale";
const USER: &str = "/user";
const SERVER_TIME_DIFF: &str = "/user/serverTimeDiff";
const AUTH_TOKENS: &str = "/user/authTokens";
const IS_ACCOUNT: &str = "/user/isAccount";
const ACCOUNT_USERNAME: &str = "/user/accountUsername";
const BALANCE: &str = "/user/balance";
const PURCHASE_PRICES: &str = "/user/purchasePrices";
const PURCHASES: &str = "/user/purchases";
const LAST_TRANSACTION_ID: &str = "/user/lastTransactionID";
const REQUEST_METADATA: &str = "/user/requestMetadata";

/// Datastore file suffix for dev or prod data.
pub fn datastore_suffix(dev: bool) -> &'static str {
    if dev { ".dev" } else { ".prod" }
}

fn fresh_document() -> Value {
    let id = hex::encode(rand::random::<[u8; 16]>());
    json!({
        "v": DATASTORE_VERSION,
        "user": {},
        "instance": { "instanceID": format!("instanceid_{id}") },
    })
}

/// Scoped datastore transaction.
///
/// Dropping the handle without calling [`Transaction::commit`] rolls back
/// everything written through the repository since it was opened. Nested
/// handles on the same thread join the outer transaction; only the outermost
/// handle decides.
///
/// The datastore belongs to the opening thread until the transaction ends,
/// so the handle cannot be sent elsewhere:
///
/// ```compile_fail
/// use psicash::userdata::UserData;
///
/// let dir = tempfile::tempdir().expect("tmp");
/// let ud = UserData::new();
/// ud.init(dir.path(), true).expect("init");
/// let tx = ud.transaction().expect("tx");
/// std::thread::scope(|s| {
///     s.spawn(move || tx.commit());
/// });
/// ```
#[must_use = "dropping a transaction rolls it back"]
pub struct Transaction<'a> {
    datastore: &'a Datastore,
    open: bool,
    _owner_thread: PhantomData<*const ()>,
}

impl<'a> Transaction<'a> {
    fn begin(datastore: &'a Datastore) -> Result<Self> {
        datastore.begin_transaction().context("failed to begin transaction")?;
        Ok(Self {
            datastore,
            open: true,
            _owner_thread: PhantomData,
        })
    }

    /// Ends the transaction, writing the result if this is the outermost one.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.datastore
            .end_transaction(true)
            .context("failed to commit transaction")
    }

    /// Ends the transaction, discarding its changes if this is the outermost one.
    pub fn rollback(mut self) -> Result<()> {
        self.open = false;
        self.datastore
            .end_transaction(false)
            .context("failed to roll back transaction")
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        warn!("transaction dropped without commit; rolling back");
        if let Err(err) = self.datastore.end_transaction(false) {
            error!(%err, "rollback of dropped transaction failed");
        }
    }
}

/// Client state persisted across runs.
#[derive(Debug, Default)]
pub struct UserData {
    datastore: Datastore,
    stashed_metadata: Mutex<Map<String, Value>>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the datastore under `root`, migrating or stamping the schema
    /// version as needed.
    pub fn init(&self, root: &Path, dev: bool) -> Result<()> {
        self.datastore
            .init(root, datastore_suffix(dev))
            .context("failed to initialize user data")?;

        match self.datastore.get::<i64>(VERSION) {
            Ok(DATASTORE_VERSION) => Ok(()),
            Ok(1) => self.migrate_v1(),
            Ok(other) => Err(Error::critical(format!("unexpected datastore version {other}"))),
            Err(GetError::NotFound(_)) if self.has_legacy_fields()? => self.migrate_v1(),
            Err(GetError::NotFound(_)) => self
                .datastore
                .reset(fresh_document())
                .context("failed to stamp fresh datastore"),
            Err(err) => Err(Error::from(err).wrap("failed to read datastore version")),
        }
    }

    fn has_legacy_fields(&self) -> Result<bool> {
        let doc = self.datastore.document()?;
        Ok(doc.as_object().is_some_and(|map| !map.is_empty()))
    }

    // v1 kept all user fields at the document root.
    fn migrate_v1(&self) -> Result<()> {
        let mut old = self.datastore.document()?;
        if let Some(map) = old.as_object_mut() {
            map.remove("v");
        }
        let mut doc = fresh_document();
        doc["user"] = old;
        self.datastore.reset(doc).context("failed to migrate v1 datastore")
    }

    /// Replaces the datastore under `root` with a fresh document, including
    /// a new instance ID.
    pub fn clear(&self, root: &Path, dev: bool) -> Result<()> {
        self.datastore
            .reset_at(root, datastore_suffix(dev), fresh_document())
            .context("failed to clear user data")
    }

    /// Opens a (possibly nested) transaction.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(&self.datastore)
    }

    /// The underlying store.
    pub fn datastore(&self) -> &Datastore {
        &self.datastore
    }

    fn get_or_default<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        match self.datastore.get(path) {
            Ok(v) => Ok(v),
            Err(GetError::NotFound(_)) => Ok(T::default()),
            Err(err) => Err(Error::from(err).wrap(format!("failed to read {path}"))),
        }
    }

    pub fn instance_id(&self) -> Result<String> {
        self.get_or_default(INSTANCE_ID)
    }

    pub fn is_logged_out_account(&self) -> Result<bool> {
        self.get_or_default(IS_LOGGED_OUT_ACCOUNT)
    }

    pub fn set_is_logged_out_account(&self, v: bool) -> Result<()> {
        self.datastore.set(IS_LOGGED_OUT_ACCOUNT, v, true)
    }

    pub fn locale(&self) -> Result<String> {
        self.get_or_default(LOCALE)
    }

    pub fn set_locale(&self, v: &str) -> Result<()> {
        self.datastore.set(LOCALE, v, true)
    }

    /// Server time minus local time.
    pub fn server_time_diff(&self) -> Result<Duration> {
        let ms: i64 = self.get_or_default(SERVER_TIME_DIFF)?;
        Ok(Duration::milliseconds(ms))
    }

    /// Records the skew between `server_now` and the local clock.
    pub fn set_server_time_diff(&self, server_now: DateTime) -> Result<()> {
        let diff = server_now.diff(&DateTime::now());
        self.datastore
            .set(SERVER_TIME_DIFF, diff.num_milliseconds(), true)
    }

    /// Converts a server timestamp to the local clock.
    pub fn server_time_to_local(&self, server_time: DateTime) -> Result<DateTime> {
        Ok(server_time.sub(self.server_time_diff()?))
    }

    pub fn auth_tokens(&self) -> Result<AuthTokens> {
        self.get_or_default(AUTH_TOKENS)
    }

    /// Token types currently held.
    pub fn valid_token_types(&self) -> Result<Vec<TokenType>> {
        Ok(self.auth_tokens()?.into_keys().collect())
    }

    /// Whether the held tokens form a usable identity.
    pub fn has_tokens(&self) -> Result<bool> {
        let tokens = self.auth_tokens()?;
        Ok(MINIMUM_TOKEN_TYPES.iter().all(|t| tokens.contains_key(*t)))
    }

    /// Stores a new identity. Request metadata stashed by
    /// [`UserData::delete_user_data`] is restored with it.
    pub fn set_auth_tokens(&self, tokens: &AuthTokens, is_account: bool, username: &str) -> Result<()> {
        let tx = self.transaction()?;
        self.datastore.set(AUTH_TOKENS, tokens, true)?;
        self.datastore.set(IS_ACCOUNT, is_account, true)?;
        self.datastore.set(ACCOUNT_USERNAME, username, true)?;
        self.datastore.set(IS_LOGGED_OUT_ACCOUNT, false, true)?;
        let metadata = self.request_metadata()?;
        self.datastore.set(REQUEST_METADATA, &metadata, true)?;
        tx.commit().context("failed to store auth tokens")?;

        self.stashed_metadata.lock().clear();
        Ok(())
    }

    /// Keeps only held tokens that `valid` lists as valid. Keys of `valid`
    /// are token values, not token types.
    pub fn cull_auth_tokens(&self, valid: &HashMap<String, bool>) -> Result<()> {
        let mut tokens = self.auth_tokens()?;
        let before = tokens.len();
        tokens.retain(|_, t| valid.get(&t.id).copied().unwrap_or(false));
        if tokens.len() == before {
            return Ok(());
        }
        self.datastore.set(AUTH_TOKENS, &tokens, true)
    }

    /// Forgets the held tokens and nothing else.
    pub fn clear_auth_tokens(&self) -> Result<()> {
        self.datastore.set(AUTH_TOKENS, AuthTokens::new(), true)
    }

    pub fn is_account(&self) -> Result<bool> {
        self.get_or_default(IS_ACCOUNT)
    }

    pub fn set_is_account(&self, v: bool) -> Result<()> {
        self.datastore.set(IS_ACCOUNT, v, true)
    }

    pub fn account_username(&self) -> Result<String> {
        self.get_or_default(ACCOUNT_USERNAME)
    }

    pub fn set_account_username(&self, v: &str) -> Result<()> {
        self.datastore.set(ACCOUNT_USERNAME, v, true)
    }

    pub fn balance(&self) -> Result<i64> {
        self.get_or_default(BALANCE)
    }

    pub fn set_balance(&self, v: i64) -> Result<()> {
        self.datastore.set(BALANCE, v, true)
    }

    pub fn purchase_prices(&self) -> Result<Vec<PurchasePrice>> {
        self.get_or_default(PURCHASE_PRICES)
    }

    pub fn set_purchase_prices(&self, v: &[PurchasePrice]) -> Result<()> {
        self.datastore.set(PURCHASE_PRICES, v, true)
    }

    /// Stored purchases, oldest first, with local expiry derived from the
    /// current clock skew.
    pub fn purchases(&self) -> Result<Vec<Purchase>> {
        let mut purchases: Vec<Purchase> = self.get_or_default(PURCHASES)?;
        let diff = self.server_time_diff()?;
        for p in &mut purchases {
            apply_local_time_expiry(p, diff);
        }
        Ok(purchases)
    }

    pub fn set_purchases(&self, v: &[Purchase]) -> Result<()> {
        self.datastore.set(PURCHASES, v, true)
    }

    /// Inserts `purchase` in creation order and makes it the last
    /// transaction. A purchase whose id is already stored is ignored.
    /// Returns whether it was added.
    pub fn add_purchase(&self, purchase: &Purchase) -> Result<bool> {
        let tx = self.transaction()?;
        let mut purchases: Vec<Purchase> = self.get_or_default(PURCHASES)?;
        if purchases.iter().any(|p| p.id == purchase.id) {
            tx.commit()?;
            return Ok(false);
        }

        let pos = purchases.partition_point(|p| p.server_time_created <= purchase.server_time_created);
        purchases.insert(pos, purchase.clone());
        self.set_purchases(&purchases)?;
        self.set_last_transaction_id(&purchase.id)?;
        tx.commit().context("failed to add purchase")?;
        Ok(true)
    }

    /// Removes the purchases with the given ids and returns them.
    pub fn remove_purchases(&self, ids: &[TransactionId]) -> Result<Vec<Purchase>> {
        let tx = self.transaction()?;
        let stored: Vec<Purchase> = self.get_or_default(PURCHASES)?;
        let (mut removed, kept): (Vec<Purchase>, Vec<Purchase>) =
            stored.into_iter().partition(|p| ids.contains(&p.id));
        if !removed.is_empty() {
            self.set_purchases(&kept)?;
        }
        tx.commit().context("failed to remove purchases")?;

        let diff = self.server_time_diff()?;
        for p in &mut removed {
            apply_local_time_expiry(p, diff);
        }
        Ok(removed)
    }

    /// Sets `local_time_expiry` from `server_time_expiry` and the stored skew.
    pub fn update_purchase_local_time_expiry(&self, purchase: &mut Purchase) -> Result<()> {
        apply_local_time_expiry(purchase, self.server_time_diff()?);
        Ok(())
    }

    pub fn last_transaction_id(&self) -> Result<TransactionId> {
        self.get_or_default(LAST_TRANSACTION_ID)
    }

    pub fn set_last_transaction_id(&self, v: &str) -> Result<()> {
        self.datastore.set(LAST_TRANSACTION_ID, v, true)
    }

    /// Stored request metadata, filled in from the stash where the store has
    /// no value.
    pub fn request_metadata(&self) -> Result<Map<String, Value>> {
        let mut stored: Map<String, Value> = self.get_or_default(REQUEST_METADATA)?;
        for (k, v) in self.stashed_metadata.lock().iter() {
            stored.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Ok(stored)
    }

    pub fn set_request_metadata_item(&self, key: &str, value: Value) -> Result<()> {
        self.datastore
            .set(&path::child(REQUEST_METADATA, key), value, true)
    }

    /// Forgets the user. With `is_logged_out_account` set, the account flag
    /// and username survive so the user is known to need a login rather than
    /// becoming a tracker. Request metadata is stashed in memory until the
    /// next identity is stored.
    pub fn delete_user_data(&self, is_logged_out_account: bool) -> Result<()> {
        let tx = self.transaction()?;
        let metadata = self.request_metadata()?;
        let username = self.account_username()?;

        self.datastore.set(USER, json!({}), true)?;
        if is_logged_out_account {
            self.set_is_account(true)?;
            if !username.is_empty() {
                self.set_account_username(&username)?;
            }
        }
        self.set_is_logged_out_account(is_logged_out_account)?;
        tx.commit().context("failed to delete user data")?;

        *self.stashed_metadata.lock() = metadata;
        Ok(())
    }
}

fn apply_local_time_expiry(purchase: &mut Purchase, server_time_diff: Duration) {
    purchase.local_time_expiry = purchase
        .server_time_expiry
        .map(|t| t.sub(server_time_diff));
}
