//! Tail request parameters and the upstream URL they turn into.

/// Query parameter names accepted for the stream selector, in precedence
/// order: the first name with at least one non-empty value wins.
pub const SELECTOR_PARAMS: &[&str] = &["query", "selector"];

/// Joins several selectors into one LogQL expression.
const SELECTOR_JOIN: &str = " or ";

/// A resolved `/logs/tail` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailRequest {
    /// One or more LogQL stream selectors, OR-combined upstream.
    pub selectors: Vec<String>,
    pub limit: Option<String>,
    pub start: Option<String>,
    pub delay_for: Option<String>,
}

impl TailRequest {
    /// Resolve raw query pairs. Returns `None` when no selector is present.
    ///
    /// Repeated values of the winning selector name are all kept. For the
    /// optional parameters the first non-empty occurrence wins.
    pub fn from_pairs(pairs: &[(String, String)]) -> Option<Self> {
        let selectors = SELECTOR_PARAMS.iter().find_map(|name| {
            let values: Vec<String> = pairs
                .iter()
                .filter(|(k, v)| k == name && !v.trim().is_empty())
                .map(|(_, v)| v.clone())
                .collect();
            (!values.is_empty()).then_some(values)
        })?;

        let first = |name: &str| {
            pairs
                .iter()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.clone())
        };

        Some(Self {
            selectors,
            limit: first("limit"),
            start: first("start"),
            delay_for: first("delay_for"),
        })
    }

    /// The selectors as a single expression.
    pub fn combined_selector(&self) -> String {
        self.selectors.join(SELECTOR_JOIN)
    }
}

/// Build the upstream tail URL for `request` on top of `base`.
///
/// `query` always comes first, followed by `limit`, `start` and `delay_for`
/// when set. Values are percent-encoded; the separator is `&` if `base`
/// already carries a query string.
pub fn build_tail_url(base: &str, request: &TailRequest) -> String {
    let mut params: Vec<(&str, String)> = vec![("query", request.combined_selector())];
    for (name, value) in [
        ("limit", &request.limit),
        ("start", &request.start),
        ("delay_for", &request.delay_for),
    ] {
        if let Some(v) = value {
            params.push((name, v.clone()));
        }
    }

    let encoded = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let mut url = String::with_capacity(base.len() + encoded.len() + 1);
    url.push_str(base);
    match base.split_once('?') {
        Some((_, "")) => {}
        Some(_) if base.ends_with('&') => {}
        Some(_) => url.push('&'),
        None => url.push('?'),
    }
    url.push_str(&encoded);
    url
}
