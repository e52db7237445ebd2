//! Transport to the remote entity service.
//!
//! Every operation is a JSON POST to `<base_url>/<operation>`. The
//! [`RemoteClient`] trait is the seam the driver talks through, so tests
//! can substitute an in-process service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{RemoteError, RemoteResult};

/// Sends one operation to the remote service and returns its JSON reply.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn call(&self, operation: &str, body: Value) -> RemoteResult<Value>;
}

/// HTTP implementation on `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    base: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let mut base = Url::parse(base_url)?;
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            base,
            client,
            timeout,
        })
    }

    /// The URL an operation is posted to.
    pub fn endpoint(&self, operation: &str) -> RemoteResult<Url> {
        Ok(self.base.join(operation)?)
    }

    fn classify(&self, operation: &str, url: &Url, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout {
                operation: operation.to_owned(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if err.is_connect() {
            RemoteError::Unavailable {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    #[instrument(skip(self, body))]
    async fn call(&self, operation: &str, body: Value) -> RemoteResult<Value> {
        let url = self.endpoint(operation)?;
        let response = self
            .client
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(operation, &url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::RouteNotConfigured {
                operation: operation.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                operation: operation.to_owned(),
                status: status.as_u16(),
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let reply = response
            .json::<Value>()
            .await
            .map_err(|e| self.classify(operation, &url, e))?;
        debug!(%url, status = status.as_u16(), "remote call completed");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_append_to_the_base_path() {
        let base = "http://localhost:8080/api/entities";
        let client = HttpRemoteClient::new(base, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("read").unwrap().as_str(),
            "http://localhost:8080/api/entities/read"
        );

        let client =
            HttpRemoteClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("publish").unwrap().as_str(),
            "http://localhost:8080/publish"
        );
    }

    #[test]
    fn bad_base_url_is_rejected() {
        assert!(HttpRemoteClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Port 9 (discard) on localhost is closed on test machines.
        let client = HttpRemoteClient::new("http://127.0.0.1:9/", Duration::from_secs(2)).unwrap();
        let err = client.call("read", Value::Null).await.unwrap_err();
        assert_eq!(err.result_type(), strata_core::ResultType::NotAvailable);
    }
}
