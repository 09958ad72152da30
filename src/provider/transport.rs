//! Resilient Transport
//!
//! Information Hiding:
//! - Retry/backoff loop hidden behind a single post call
//! - Proxy wiring hidden in construction
//! - Status-code triage internalized
//!
//! Only HTTP 503 and transport-level failures are retried; every other
//! error status terminates immediately and is surfaced with a
//! status-specific hint for the classifier.

use super::wire::GenerateContentResponse;
use super::TransportError;
use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Bounded exponential backoff. Each operation kind carries its own
/// policy; the constants are configuration, not code.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

pub struct Transport {
    client: Client,
    request_timeout: Duration,
}

impl Transport {
    /// `proxy_url`, when set, routes every request through a raw HTTP
    /// proxy. Callers must not set it when a proxy service is in use;
    /// the service replaces the provider URL instead.
    pub fn new(proxy_url: Option<&str>, request_timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(url) = proxy_url {
            builder = builder.proxy(
                reqwest::Proxy::all(url)
                    .with_context(|| format!("Invalid proxy URL '{}'", url))?,
            );
            tracing::info!("[Transport] Using HTTP proxy {}", url);
        }
        Ok(Self {
            client: builder.build().context("Failed to build HTTP client")?,
            request_timeout,
        })
    }

    /// POST the request, retrying 503s and connection failures per the
    /// policy. Control is released at every backoff sleep.
    pub async fn post_generate(
        &self,
        url: &str,
        query: &[(String, String)],
        body: &serde_json::Value,
        policy: &RetryPolicy,
    ) -> Result<GenerateContentResponse, TransportError> {
        let mut attempts: u32 = 0;
        let mut delay = policy.initial_delay;

        loop {
            match self.attempt(url, query, body).await {
                Ok((status, body_text)) => {
                    if status == StatusCode::SERVICE_UNAVAILABLE {
                        if attempts < policy.max_retries {
                            attempts += 1;
                            tracing::warn!(
                                "[Transport] Provider overloaded (503), retry {}/{} in {:?}",
                                attempts,
                                policy.max_retries,
                                delay
                            );
                            tokio::time::sleep(delay).await;
                            delay = next_delay(delay, policy);
                            continue;
                        }
                        return Err(TransportError::Overloaded {
                            attempts: attempts + 1,
                        });
                    }

                    if !status.is_success() {
                        return Err(TransportError::Status {
                            status: status.as_u16(),
                            hint: status_hint(status).to_string(),
                            body: body_text,
                        });
                    }

                    if body_text.trim().is_empty() {
                        return Err(TransportError::EmptyBody);
                    }

                    return serde_json::from_str(&body_text).map_err(TransportError::Decode);
                }
                Err(err) => {
                    if attempts < policy.max_retries {
                        attempts += 1;
                        tracing::warn!(
                            "[Transport] Request failed ({}), retry {}/{} in {:?}",
                            err,
                            attempts,
                            policy.max_retries,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        delay = next_delay(delay, policy);
                        continue;
                    }
                    return Err(TransportError::Network {
                        attempts: attempts + 1,
                        source: err,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(String, String)],
        body: &serde_json::Value,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let response = self
            .client
            .post(url)
            .query(query)
            .json(body)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }
}

fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    current.mul_f64(policy.multiplier).min(policy.max_delay)
}

fn status_hint(status: StatusCode) -> &'static str {
    match status.as_u16() {
        400 => "malformed request, check the model name and parameters",
        401 => "invalid API credential",
        403 => "access forbidden, check the API key or account status",
        429 => "rate limited, requests are too frequent",
        _ => "unexpected provider status",
    }
}
