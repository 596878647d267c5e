//! HTTP transaction model.
//!
//! The canonical representation of a request or response is the raw
//! HTTP/1.1 wire dump, not a pre-parsed struct — parsed views are derived
//! on demand via `crate::http`. Grounded on `models/transaction.rs`'s
//! shape (id/timing/state bookkeeping), generalized from a parsed-field
//! struct to a dump-owning one.

use crate::http;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A standalone request, independent of any transaction it may later
/// become part of — the shape phantom suggestions and flow
/// `paste_request_at` traffic in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRequest {
    pub host: String,
    pub tls: bool,
    pub dump: Vec<u8>,
}

/// State of an HTTP transaction as it moves through capture, interception
/// and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Captured,
    QueuedForRequest,
    Forwarding,
    QueuedForResponse,
    Completed,
    Dropped,
    Failed,
}

/// A single captured request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HTTPTransaction {
    pub id: Uuid,
    pub seq_number: u64,
    pub timestamp: DateTime<Utc>,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub request_dump: Vec<u8>,
    pub response_dump: Option<Vec<u8>>,
    pub state: TransactionState,
    /// Present while this transaction is parked in the interception queue.
    pub intercepted_request_id: Option<Uuid>,
    /// Whether the response leg is also subject to interception.
    pub intercept_response: bool,
    pub waiting_for_response: bool,
    /// `"gleipflow"` for transactions created by the flow engine rather
    /// than the live proxy, so they never feed the proxy history stream.
    pub came_from: Option<String>,
    pub notes: Option<String>,
    pub error: Option<String>,
}

impl HTTPTransaction {
    /// Construct a freshly captured transaction. `seq_number` is assigned
    /// by the store on `append`, not here — zero is a placeholder.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16, request_dump: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq_number: 0,
            timestamp: Utc::now(),
            scheme: scheme.into(),
            host: host.into(),
            port,
            request_dump,
            response_dump: None,
            state: TransactionState::Captured,
            intercepted_request_id: None,
            intercept_response: false,
            waiting_for_response: false,
            came_from: None,
            notes: None,
            error: None,
        }
    }

    pub fn parsed_request(&self) -> Result<http::ParsedRequest, crate::error::HttpCodecError> {
        http::parse_raw_request(&self.request_dump)
    }

    pub fn parsed_response(&self) -> Option<Result<http::ParsedResponse, crate::error::HttpCodecError>> {
        self.response_dump.as_ref().map(|d| http::parse_raw_response(d))
    }

    pub fn summary(&self) -> TransactionSummary {
        let parsed_request = self.parsed_request().ok();
        let method = parsed_request
            .as_ref()
            .map(|r| r.method.clone())
            .unwrap_or_else(|| "?".to_string());
        let path = parsed_request
            .as_ref()
            .map(|r| r.path.clone())
            .unwrap_or_default();
        let url = format!("{}://{}{}", self.scheme, self.host, path);

        let parsed_response = self.parsed_response().and_then(|r| r.ok());
        let status_code = parsed_response.as_ref().map(|r| r.status_code);
        let status = parsed_response.as_ref().map(|r| r.reason.clone());
        let response_size = parsed_response.as_ref().map(|r| r.body.len() as u64);

        TransactionSummary {
            id: self.id,
            seq_number: self.seq_number,
            timestamp: self.timestamp,
            method,
            url,
            status_code,
            status,
            response_size,
        }
    }
}

/// Derived snapshot for list views; never stored independently of the
/// transaction it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub id: Uuid,
    pub seq_number: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub status: Option<String>,
    pub response_size: Option<u64>,
}

/// Tri-state flag for `hasParams`: unset means "don't filter on this".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HasParams {
    Yes,
    No,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeOperator {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFilter {
    pub operator: SizeOperator,
    pub value: u64,
}

/// Filter clauses evaluated as a conjunction over a transaction's summary
/// (and, for `query`, its raw dumps).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub query: Option<String>,
    pub has_params: Option<HasParams>,
    /// Comma-separated status list, supporting `2xx`-style range patterns
    /// alongside exact codes (e.g. "200,404,5xx").
    pub status_codes: Option<String>,
    pub methods: Option<Vec<String>>,
    pub response_size: Option<SizeFilter>,
    pub hosts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    Id,
    Timestamp,
    Method,
    Url,
    StatusCode,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// Empty/unspecified direction normalizes to `desc`.
    pub fn normalize(dir: Option<SortDirection>) -> SortDirection {
        dir.unwrap_or(SortDirection::Desc)
    }
}

fn status_matches_pattern(status: u16, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if let Some(prefix) = pattern.strip_suffix("xx").or_else(|| pattern.strip_suffix("XX")) {
        if let Ok(leading_digit) = prefix.parse::<u16>() {
            return status / 100 == leading_digit;
        }
        return false;
    }
    pattern.parse::<u16>().map(|code| code == status).unwrap_or(false)
}

fn size_matches(size: u64, filter: &SizeFilter) -> bool {
    match filter.operator {
        SizeOperator::Lt => size < filter.value,
        SizeOperator::Lte => size <= filter.value,
        SizeOperator::Eq => size == filter.value,
        SizeOperator::Gte => size >= filter.value,
        SizeOperator::Gt => size > filter.value,
    }
}

/// Evaluate every clause of `filter` against `tx` and its summary.
pub fn matches(tx: &HTTPTransaction, summary: &TransactionSummary, filter: &TransactionFilter) -> bool {
    if let Some(query) = &filter.query {
        let query_lower = query.to_ascii_lowercase();
        if !query.is_empty() {
            let haystacks = [
                summary.method.to_ascii_lowercase(),
                summary.url.to_ascii_lowercase(),
                tx.host.to_ascii_lowercase(),
                summary.status_code.map(|c| c.to_string()).unwrap_or_default(),
                String::from_utf8_lossy(&tx.request_dump).to_ascii_lowercase(),
            ];
            if !haystacks.iter().any(|h| h.contains(&query_lower)) {
                return false;
            }
        }
    }

    if let Some(has_params) = filter.has_params {
        let parsed = tx.parsed_request().ok();
        let has_query = parsed.as_ref().map(|r| r.path.contains('?')).unwrap_or(false);
        let has_body = parsed.as_ref().map(|r| !r.body.is_empty()).unwrap_or(false);
        let present = has_query || has_body;
        let want = matches!(has_params, HasParams::Yes);
        if present != want {
            return false;
        }
    }

    if let Some(status_codes) = &filter.status_codes {
        match summary.status_code {
            Some(code) => {
                let any_match = status_codes
                    .split(',')
                    .any(|pattern| status_matches_pattern(code, pattern));
                if !any_match {
                    return false;
                }
            }
            None => return false,
        }
    }

    if let Some(methods) = &filter.methods {
        if !methods.is_empty()
            && !methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&summary.method))
        {
            return false;
        }
    }

    if let Some(size_filter) = &filter.response_size {
        match summary.response_size {
            Some(size) => {
                if !size_matches(size, size_filter) {
                    return false;
                }
            }
            None => return false,
        }
    }

    if let Some(hosts) = &filter.hosts {
        if !hosts.is_empty() && !hosts.iter().any(|h| h.eq_ignore_ascii_case(&tx.host)) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(host: &str, path: &str, status: u16, body: &[u8]) -> HTTPTransaction {
        let request_dump = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n").into_bytes();
        let mut tx = HTTPTransaction::new("https", host, 443, request_dump);
        tx.response_dump = Some(
            format!(
                "HTTP/1.1 {status} OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                String::from_utf8_lossy(body)
            )
            .into_bytes(),
        );
        tx
    }

    #[test]
    fn summary_derives_method_url_and_status() {
        let tx = sample_tx("example.test", "/api/widgets", 200, b"ok");
        let summary = tx.summary();
        assert_eq!(summary.method, "GET");
        assert_eq!(summary.url, "https://example.test/api/widgets");
        assert_eq!(summary.status_code, Some(200));
        assert_eq!(summary.response_size, Some(tx.response_dump.as_ref().unwrap().len() as u64));
    }

    #[test]
    fn status_code_filter_supports_range_patterns() {
        let tx = sample_tx("example.test", "/", 404, b"");
        let summary = tx.summary();
        let filter = TransactionFilter {
            status_codes: Some("2xx,4xx".to_string()),
            ..Default::default()
        };
        assert!(matches(&tx, &summary, &filter));

        let filter_miss = TransactionFilter {
            status_codes: Some("2xx,3xx".to_string()),
            ..Default::default()
        };
        assert!(!matches(&tx, &summary, &filter_miss));
    }

    #[test]
    fn host_filter_is_case_insensitive() {
        let tx = sample_tx("Example.test", "/", 200, b"");
        let summary = tx.summary();
        let filter = TransactionFilter {
            hosts: Some(vec!["example.test".to_string()]),
            ..Default::default()
        };
        assert!(matches(&tx, &summary, &filter));
    }

    #[test]
    fn query_filter_searches_body_and_url() {
        let tx = sample_tx("example.test", "/search?q=widgets", 200, b"");
        let summary = tx.summary();
        let filter = TransactionFilter {
            query: Some("widgets".to_string()),
            ..Default::default()
        };
        assert!(matches(&tx, &summary, &filter));
    }
}
