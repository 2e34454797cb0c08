//! HTTP range requests over `reqwest`.

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use tracing::trace;

use super::{NetworkTransport, TransportError};

/// Connect timeout for part URLs.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Transport issuing `Range: bytes=a-b` GET requests.
///
/// Request deadlines are enforced by the session, not the client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                TransportError::Connection(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Uses an existing client (shared connection pool, proxies, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connection(e.to_string())
    }
}

#[allow(clippy::manual_async_fn)]
impl NetworkTransport for HttpTransport {
    fn fetch_range(
        &self,
        url: &str,
        range: Range<u64>,
    ) -> impl Future<Output = Result<Bytes, TransportError>> + Send {
        let client = self.client.clone();
        let url = url.to_string();
        async move {
            let expected = range.end - range.start;
            if expected == 0 {
                return Ok(Bytes::new());
            }

            let response = client
                .get(&url)
                .header(RANGE, format!("bytes={}-{}", range.start, range.end - 1))
                .send()
                .await
                .map_err(map_reqwest_error)?;

            let status = response.status();
            let whole_body = match status {
                StatusCode::PARTIAL_CONTENT => false,
                // Server ignored the range header.
                StatusCode::OK => true,
                other => return Err(TransportError::Status(other.as_u16())),
            };

            let body = response.bytes().await.map_err(map_reqwest_error)?;
            trace!(
                url = %url,
                start = range.start,
                end = range.end,
                status = status.as_u16(),
                len = body.len(),
                "Range response"
            );

            let body = if whole_body {
                if (body.len() as u64) < range.end {
                    return Err(TransportError::ShortBody {
                        expected: range.end,
                        actual: body.len() as u64,
                    });
                }
                body.slice(range.start as usize..range.end as usize)
            } else {
                body
            };

            if body.len() as u64 != expected {
                return Err(TransportError::ShortBody {
                    expected,
                    actual: body.len() as u64,
                });
            }
            Ok(body)
        }
    }
}
