use hashbrown::HashMap;

pub const METHOD_GET: &str = "GET";
pub const METHOD_POST: &str = "POST";

/// One HTTP attempt, as handed to the [`HttpRequester`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpParams {
    pub scheme: String,
    pub hostname: String,
    pub port: u16,
    pub method: String,
    /// Absolute path, including the API version prefix.
    pub path: String,
    pub headers: HashMap<String, String>,
    /// Query items in order; names may repeat.
    pub query: Vec<(String, String)>,
    pub body: String,
}

impl HttpParams {
    /// First query value named `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Outcome of one HTTP attempt.
///
/// A negative `code` means the request never produced a response; `error`
/// must then describe why.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResult {
    pub code: i32,
    pub body: String,
    pub headers: HashMap<String, Vec<String>>,
    pub error: String,
}

impl HttpResult {
    /// Transport failure that must not be retried.
    pub const CRITICAL_ERROR: i32 = -2;
    /// Transport failure worth retrying (timeout, connection refused).
    pub const RECOVERABLE_ERROR: i32 = -1;

    pub fn new(code: i32, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn transport_error(code: i32, error: impl Into<String>) -> Self {
        Self {
            code,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    /// First value of header `name`, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(String::as_str)
    }
}

pub fn is_server_error(code: i32) -> bool {
    (500..600).contains(&code)
}

/// Performs a single blocking HTTP request.
///
/// Timeouts, TLS and connection reuse are the implementor's business. Any
/// `Fn(&HttpParams) -> HttpResult` closure qualifies.
pub trait HttpRequester: Send + Sync {
    fn make_request(&self, params: &HttpParams) -> HttpResult;
}

impl<F> HttpRequester for F
where
    F: Fn(&HttpParams) -> HttpResult + Send + Sync,
{
    fn make_request(&self, params: &HttpParams) -> HttpResult {
        self(params)
    }
}
