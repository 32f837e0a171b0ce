use crate::client::retry::RateLimitBudget;
use crate::client::transport::Transport;
use crate::client::types::{ClientConfig, ClientError, HttpMethod, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// HTTP client that retries transient failures and honours 429 back-pressure.
///
/// Requests are issued one at a time; the client never parallelises because
/// the remote rate limit is global to the token.
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    stats: Arc<Mutex<RequestStatistics>>,
}

/// Counters kept across every request issued by one client
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RequestStatistics {
    pub attempts: u64,
    pub succeeded: u64,
    pub rate_limited: u64,
    pub server_errors: u64,
    pub network_errors: u64,
    pub rejected: u64,
    pub retries: u64,
    pub total_backoff: Duration,
}

enum AttemptOutcome {
    Done(Result<Option<serde_json::Value>, ClientError>),
    RetryAfter(Duration),
}

impl RateLimitedClient {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            stats: Arc::new(Mutex::new(RequestStatistics::default())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn get(&self, url: Url) -> Result<Option<serde_json::Value>, ClientError> {
        self.execute(HttpRequest::new(HttpMethod::Get, url)).await
    }

    pub async fn post(
        &self,
        url: Url,
        body: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        self.execute(HttpRequest::new(HttpMethod::Post, url).with_body(body))
            .await
    }

    pub async fn put(
        &self,
        url: Url,
        body: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        self.execute(HttpRequest::new(HttpMethod::Put, url).with_body(body))
            .await
    }

    pub async fn delete(&self, url: Url) -> Result<Option<serde_json::Value>, ClientError> {
        self.execute(HttpRequest::new(HttpMethod::Delete, url)).await
    }

    /// Issue `request`, retrying until it succeeds, is rejected, or the retry budget runs out.
    ///
    /// Returns the decoded JSON body, or `None` when the response body is empty.
    pub async fn execute(
        &self,
        request: HttpRequest,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        let started = Instant::now();
        // `max_retries` bounds the total number of counted attempts
        let max_attempts = self.config.max_retries.max(1);
        let mut counted_attempts = 0u32;
        let mut attempts = 0u32;
        let mut last_status: Option<u16> = None;

        loop {
            attempts += 1;
            self.stats.lock().await.attempts += 1;

            let outcome = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    self.stats.lock().await.succeeded += 1;
                    AttemptOutcome::Done(Self::decode(&request, response))
                }
                Ok(response) if response.is_rate_limited() => {
                    last_status = Some(response.status);
                    self.stats.lock().await.rate_limited += 1;

                    if self.config.rate_limit_budget == RateLimitBudget::Counted {
                        counted_attempts += 1;
                    }

                    if !self.config.policy.allows_retry() || counted_attempts >= max_attempts {
                        AttemptOutcome::Done(Err(
                            self.exhausted(&request, last_status, attempts)
                        ))
                    } else {
                        let wait = response
                            .retry_after()
                            .unwrap_or(self.config.default_retry_after);
                        warn!(
                            "Rate limited on {} {}, waiting {:?}",
                            request.method, request.url, wait
                        );
                        AttemptOutcome::RetryAfter(wait)
                    }
                }
                Ok(response) if response.is_server_error() => {
                    last_status = Some(response.status);
                    self.stats.lock().await.server_errors += 1;
                    counted_attempts += 1;
                    self.backoff(&request, counted_attempts, max_attempts, last_status, attempts)
                }
                Ok(response) => {
                    self.stats.lock().await.rejected += 1;
                    debug!(
                        "{} {} rejected with status {}",
                        request.method, request.url, response.status
                    );
                    AttemptOutcome::Done(Err(ClientError::RequestRejected {
                        status: response.status,
                        body: response.body,
                    }))
                }
                Err(error) => {
                    self.stats.lock().await.network_errors += 1;
                    warn!("{} {} failed: {}", request.method, request.url, error);
                    counted_attempts += 1;
                    self.backoff(&request, counted_attempts, max_attempts, last_status, attempts)
                }
            };

            let delay = match outcome {
                AttemptOutcome::Done(result) => return result,
                AttemptOutcome::RetryAfter(delay) => delay,
            };

            if started.elapsed().saturating_add(delay) > self.config.max_wall_clock {
                warn!(
                    "Retry budget of {:?} exhausted for {} {}",
                    self.config.max_wall_clock, request.method, request.url
                );
                return Err(self.exhausted(&request, last_status, attempts));
            }

            {
                let mut stats = self.stats.lock().await;
                stats.retries += 1;
                stats.total_backoff += delay;
            }
            tokio::time::sleep(delay).await;
        }
    }

    fn backoff(
        &self,
        request: &HttpRequest,
        counted_attempts: u32,
        max_attempts: u32,
        last_status: Option<u16>,
        attempts: u32,
    ) -> AttemptOutcome {
        if counted_attempts >= max_attempts {
            return AttemptOutcome::Done(Err(self.exhausted(request, last_status, attempts)));
        }

        match self.config.policy.delay_for_attempt(counted_attempts) {
            Some(delay) => {
                warn!(
                    "Transient failure on {} {} (attempt {}/{}), retrying in {:?}",
                    request.method, request.url, counted_attempts, max_attempts, delay
                );
                AttemptOutcome::RetryAfter(delay)
            }
            None => AttemptOutcome::Done(Err(self.exhausted(request, last_status, attempts))),
        }
    }

    fn exhausted(
        &self,
        request: &HttpRequest,
        last_status: Option<u16>,
        attempts: u32,
    ) -> ClientError {
        ClientError::TransientRequestFailed {
            method: request.method,
            url: request.url.to_string(),
            last_status,
            attempts,
        }
    }

    fn decode(
        request: &HttpRequest,
        response: HttpResponse,
    ) -> Result<Option<serde_json::Value>, ClientError> {
        if response.body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(|e| ClientError::MalformedResponse {
                url: request.url.to_string(),
                message: e.to_string(),
            })
    }

    pub async fn statistics(&self) -> RequestStatistics {
        self.stats.lock().await.clone()
    }
}
