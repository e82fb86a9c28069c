//! Client for the external Generation Service.
//!
//! One [`GenerationClient::generate`] call wraps up to three attempts
//! against the service: transient failures (5xx and transport errors) are
//! retried with linearly increasing backoff, everything else surfaces
//! immediately. Each attempt runs under its own request timeout and races a
//! caller-supplied cancellation token; whichever fires first aborts the
//! in-flight attempt and nothing is retried after an abort.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::{GenerateRequest, ServiceBody};

/// Timeout applied to each attempt against the service.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Total attempts for retryable failures (1 initial + 2 retries).
pub const MAX_ATTEMPTS: u32 = 3;

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Text returned when the service accepted the request but produced no
/// extractable text (e.g. the content filter swallowed the response).
const BLOCKED_RESPONSE_FALLBACK: &str =
    "My apologies, but I was unable to produce a response that time. Please try rephrasing your message.";

/// Raw reply from one attempt: HTTP-equivalent status plus the body text.
#[derive(Debug, Clone)]
pub struct ServiceReply {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure (connection refused, DNS, broken pipe).
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// One attempt against the Generation Service.
///
/// Implementations must stop work when the returned future is dropped; the
/// client drops it to enforce timeouts and cancellation.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn execute(&self, request: &GenerateRequest) -> Result<ServiceReply, TransportError>;
}

/// reqwest-backed transport posting to a fixed endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    async fn execute(&self, request: &GenerateRequest) -> Result<ServiceReply, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|err| TransportError {
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| TransportError {
            message: err.to_string(),
        })?;

        Ok(ServiceReply { status, body })
    }
}

/// Failures a generation call can settle with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// The service answered 429; the caller must wait or switch model.
    RateLimited,

    /// The service kept failing with 5xx after all retries.
    ServerError { status: u16 },

    /// The caller's token or the request timeout fired first.
    Aborted,

    /// The service returned a 2xx body that could not be parsed.
    InvalidResponse,

    /// Anything else: a 4xx-equivalent upstream error message, or a
    /// transport failure that survived all retries.
    Unknown { message: String },
}

impl fmt::Display for GenerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerateError::RateLimited => {
                write!(f, "API rate limit hit. Try a different model or wait a moment.")
            }
            GenerateError::ServerError { status } => {
                write!(f, "API Error: Status {status}")
            }
            GenerateError::Aborted => write!(f, "Request aborted."),
            GenerateError::InvalidResponse => {
                write!(f, "No readable content received from the API.")
            }
            GenerateError::Unknown { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for GenerateError {}

enum AttemptOutcome {
    Success(String),
    Fail {
        error: GenerateError,
        retryable: bool,
    },
}

/// Retrying, cancellable wrapper around a [`GenerationTransport`].
pub struct GenerationClient {
    transport: Arc<dyn GenerationTransport>,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn GenerationTransport>) -> Self {
        Self {
            transport,
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Override the per-attempt timeout. Intended for hosts with stricter
    /// latency budgets and for tests.
    pub fn with_timeout(transport: Arc<dyn GenerationTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Convenience constructor for the common HTTP case.
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self::new(Arc::new(HttpTransport::new(endpoint)))
    }

    /// Run one generation to completion.
    ///
    /// Resolves at most once: the first of caller cancellation, the attempt
    /// timeout, or the transport settling wins, and later signals are
    /// ignored.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> Result<String, GenerateError> {
        let mut attempt: u32 = 1;
        loop {
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::Aborted),
                _ = tokio::time::sleep(self.timeout) => {
                    tracing::debug!(model = %request.model_id, attempt, "generation attempt timed out");
                    return Err(GenerateError::Aborted);
                }
                reply = self.transport.execute(request) => reply,
            };

            let outcome = match reply {
                Ok(reply) => interpret_reply(reply),
                Err(err) => AttemptOutcome::Fail {
                    error: GenerateError::Unknown {
                        message: err.message,
                    },
                    retryable: true,
                },
            };

            let error = match outcome {
                AttemptOutcome::Success(text) => return Ok(text),
                AttemptOutcome::Fail { error, retryable } => {
                    if !retryable || attempt >= MAX_ATTEMPTS {
                        return Err(error);
                    }
                    error
                }
            };

            let backoff = RETRY_BASE_DELAY * attempt;
            tracing::debug!(
                model = %request.model_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "retrying generation after transient failure"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerateError::Aborted),
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }
}

fn interpret_reply(reply: ServiceReply) -> AttemptOutcome {
    match reply.status {
        429 => AttemptOutcome::Fail {
            error: GenerateError::RateLimited,
            retryable: false,
        },
        status if status >= 500 => AttemptOutcome::Fail {
            error: GenerateError::ServerError { status },
            retryable: true,
        },
        status if !(200..300).contains(&status) => AttemptOutcome::Fail {
            error: GenerateError::Unknown {
                message: extract_error_message(&reply.body)
                    .unwrap_or_else(|| format!("API Error: Status {status}")),
            },
            retryable: false,
        },
        _ => match serde_json::from_str::<ServiceBody>(&reply.body) {
            Ok(body) => match body.text {
                Some(text) if !text.trim().is_empty() => AttemptOutcome::Success(text),
                _ => AttemptOutcome::Success(BLOCKED_RESPONSE_FALLBACK.to_string()),
            },
            Err(_) => AttemptOutcome::Fail {
                error: GenerateError::InvalidResponse,
                retryable: false,
            },
        },
    }
}

/// Pull the service's own error message out of a failure body, if any.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
