//! Tagged results returned by every driver operation.
//!
//! Driver calls never fail with an error. Each input target maps to one
//! [`DriverResult`] tagged with a [`ResultType`], and the batch is wrapped
//! in a [`DriverResponse`] that also records how long the call took.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Outcome of one target within a driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Ok,
    /// No record exists for the key.
    NotFound,
    /// The key is valid and intentionally has no content.
    Empty,
    BadRequest,
    RouteNotConfigured,
    /// The backing store cannot be reached.
    NotAvailable,
    Timeout,
    InternalError,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::NotFound => "not_found",
            Self::Empty => "empty",
            Self::BadRequest => "bad_request",
            Self::RouteNotConfigured => "route_not_configured",
            Self::NotAvailable => "not_available",
            Self::Timeout => "timeout",
            Self::InternalError => "internal_error",
        };
        f.write_str(s)
    }
}

/// One tagged result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverResult<T> {
    /// Configuration id of the driver that produced the result.
    pub source: String,
    /// The input key this result answers.
    pub request: String,
    pub result_type: ResultType,
    pub content: Option<T>,
    pub message: Option<String>,
}

impl<T> DriverResult<T> {
    pub fn ok(source: &str, request: impl Into<String>, content: T) -> Self {
        Self {
            source: source.to_owned(),
            request: request.into(),
            result_type: ResultType::Ok,
            content: Some(content),
            message: None,
        }
    }

    /// A result with no content, e.g. `NotFound` or `Empty`.
    pub fn of(source: &str, request: impl Into<String>, result_type: ResultType) -> Self {
        Self {
            source: source.to_owned(),
            request: request.into(),
            result_type,
            content: None,
            message: None,
        }
    }

    pub fn not_found(source: &str, request: impl Into<String>) -> Self {
        Self::of(source, request, ResultType::NotFound)
    }

    pub fn bad_request(source: &str, request: impl Into<String>) -> Self {
        Self::of(source, request, ResultType::BadRequest)
    }

    pub fn not_available(source: &str, request: impl Into<String>) -> Self {
        Self::of(source, request, ResultType::NotAvailable)
    }

    pub fn internal_error(
        source: &str,
        request: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::of(source, request, ResultType::InternalError).with_message(message)
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result_type == ResultType::Ok
    }
}

/// A batch of results plus the call duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverResponse<T> {
    pub results: Vec<DriverResult<T>>,
    pub duration: Duration,
}

impl<T> DriverResponse<T> {
    pub fn new(results: Vec<DriverResult<T>>, duration: Duration) -> Self {
        Self { results, duration }
    }

    /// Wrap results measured from `started`.
    pub fn since(results: Vec<DriverResult<T>>, started: Instant) -> Self {
        Self::new(results, started.elapsed())
    }

    /// A response holding a single content-less result.
    pub fn single(
        source: &str,
        request: impl Into<String>,
        result_type: ResultType,
        started: Instant,
    ) -> Self {
        Self::since(vec![DriverResult::of(source, request, result_type)], started)
    }

    /// True when there is at least one result and every result is `Ok`.
    pub fn is_success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(DriverResult::is_ok)
    }

    /// Contents of all `Ok` results, in request order.
    pub fn content(&self) -> Vec<&T> {
        self.results
            .iter()
            .filter(|r| r.is_ok())
            .filter_map(|r| r.content.as_ref())
            .collect()
    }

    pub fn into_content(self) -> Vec<T> {
        self.results
            .into_iter()
            .filter(|r| r.result_type == ResultType::Ok)
            .filter_map(|r| r.content)
            .collect()
    }

    /// Result type of the first result answering `request`.
    pub fn result_type_for(&self, request: &str) -> Option<ResultType> {
        self.results
            .iter()
            .find(|r| r.request == request)
            .map(|r| r.result_type)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Operation payloads
// ---------------------------------------------------------------------------

/// Whether a publish found a prior record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishKind {
    Created,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult<T> {
    pub kind: PublishKind,
    pub entity: T,
}

impl<T> PublishResult<T> {
    pub fn created(entity: T) -> Self {
        Self {
            kind: PublishKind::Created,
            entity,
        }
    }

    pub fn changed(entity: T) -> Self {
        Self {
            kind: PublishKind::Changed,
            entity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub target: String,
}

impl DeleteRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// Remove `target` only if its tracked time is at or before `timestamp`
/// (unix milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireRequest {
    pub target: String,
    pub timestamp: i64,
}

impl ExpireRequest {
    pub fn new(target: impl Into<String>, timestamp: i64) -> Self {
        Self {
            target: target.into(),
            timestamp,
        }
    }
}

/// Number of records an expire call removed for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireResult {
    pub target: String,
    pub count: u64,
}

impl ExpireResult {
    pub fn new(target: impl Into<String>, count: u64) -> Self {
        Self {
            target: target.into(),
            count,
        }
    }
}

/// A relational or pattern query hit: which input key matched which uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMatch {
    pub query: String,
    pub uuid: String,
}

impl QueryMatch {
    pub fn new(query: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            uuid: uuid.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_all_ok() {
        let started = Instant::now();
        let ok = DriverResponse::since(
            vec![DriverResult::ok("d", "a", 1), DriverResult::ok("d", "b", 2)],
            started,
        );
        assert!(ok.is_success());
        assert_eq!(ok.content(), vec![&1, &2]);

        let mixed = DriverResponse::since(
            vec![DriverResult::ok("d", "a", 1), DriverResult::not_found("d", "b")],
            started,
        );
        assert!(!mixed.is_success());
        assert_eq!(mixed.result_type_for("b"), Some(ResultType::NotFound));
        assert_eq!(mixed.into_content(), vec![1]);
    }

    #[test]
    fn empty_response_is_not_success() {
        let resp: DriverResponse<()> = DriverResponse::new(Vec::new(), Duration::ZERO);
        assert!(!resp.is_success());
    }

    #[test]
    fn result_type_serializes_snake_case() {
        let json = serde_json::to_string(&ResultType::NotAvailable).unwrap();
        assert_eq!(json, "\"not_available\"");
    }
}
