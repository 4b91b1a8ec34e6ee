use reqwest::{Client, Request, Response};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::AuthError;

/// Error bodies are only kept for diagnostics
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// HTTP client for the backend identity endpoints with retry logic
pub struct ExchangeHttpClient {
    /// Client without idle pooling, so every attempt dials a fresh connection
    client: Client,

    /// Maximum number of attempts, including the first
    max_attempts: u32,

    /// Base delay for exponential backoff
    base_delay: Duration,

    /// Upper bound on the sum of backoff delays for one request
    max_total_wait: Duration,
}

impl ExchangeHttpClient {
    /// Create a new HTTP client
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(format!("infisical-auth/{}", crate::constants::CLI_VERSION))
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_backoff,
            max_total_wait: config.max_total_wait,
        })
    }

    /// Execute a request with retry logic
    /// - 2xx: returned as-is
    /// - 429, 5xx, connection errors, timeouts: exponential backoff
    /// - any other status: `InvalidCredential`, never retried
    pub async fn request_with_retry(
        &self,
        request: Request,
        method: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, AuthError> {
        let url = request.url().clone();
        let deadline = Instant::now() + self.max_total_wait;
        let mut attempt: u32 = 0;

        tracing::debug!(
            method = method,
            url = %url,
            "Sending identity request"
        );

        loop {
            let req = request.try_clone().ok_or_else(|| {
                AuthError::Config("Request body is not cloneable".to_string())
            })?;

            tracing::debug!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                "Executing request attempt"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                result = self.client.execute(req) => result,
            };

            let failure = match result {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(status = %status, "Identity request successful");
                        return Ok(response);
                    }

                    if !is_retryable_status(status.as_u16()) {
                        let message = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                            message = read_error_body(response) => message,
                        };
                        tracing::warn!(
                            method = method,
                            status = status.as_u16(),
                            response_body = %message,
                            "Credential rejected by identity endpoint"
                        );
                        return Err(AuthError::InvalidCredential {
                            method: method.to_string(),
                            status: status.as_u16(),
                            message,
                        });
                    }

                    format!("server responded {}", status)
                }
                Err(e) => {
                    // Categorize the error for better debugging
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    tracing::warn!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        attempt = attempt + 1,
                        "Identity request error"
                    );

                    format!("{} (kind: {})", e, error_kind)
                }
            };

            attempt += 1;
            if attempt >= self.max_attempts {
                tracing::error!(
                    method = method,
                    url = %url,
                    total_attempts = attempt,
                    error = %failure,
                    "Identity request failed after all retries"
                );
                return Err(AuthError::TransientNetwork {
                    method: method.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }

            let delay = self.calculate_backoff_delay(attempt - 1);
            if Instant::now() + delay > deadline {
                tracing::error!(
                    method = method,
                    total_attempts = attempt,
                    "Retry budget exhausted"
                );
                return Err(AuthError::TransientNetwork {
                    method: method.to_string(),
                    attempts: attempt,
                    message: failure,
                });
            }

            tracing::warn!(
                "{}, retrying after {}ms (attempt {}/{})",
                failure,
                delay.as_millis(),
                attempt,
                self.max_attempts
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        // base_delay * 2^attempt, plus up to 10% jitter
        let delay = self.base_delay.saturating_mul(2_u32.saturating_pow(attempt));
        let jitter = delay.mul_f64(0.1 * rand::random::<f64>());
        delay + jitter
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Read at most `MAX_ERROR_BODY_BYTES` of an error response
async fn read_error_body(mut response: Response) -> String {
    let mut body = Vec::new();
    while body.len() < MAX_ERROR_BODY_BYTES {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            _ => break,
        }
    }
    body.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&body).into_owned()
}

/// Statuses worth another attempt
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}
