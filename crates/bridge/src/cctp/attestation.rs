//! Circle attestation API client.
//!
//! A single [`fetch`](AttestationClient::fetch) classifies one HTTP round
//! trip into a [`PollStatus`]; [`poll`](AttestationClient::poll) repeats it
//! on a backoff schedule until the attestation is ready, the attempt budget
//! or deadline runs out, or the caller cancels.

use std::fmt;
use std::time::Duration;

use alloy::primitives::{B256, Bytes, TxHash};
use backon::{BackoffBuilder, ConstantBuilder, ExponentialBuilder};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::message::{CctpMessage, MessageError, extract_nonce};
use crate::registry::Domain;

pub const DEFAULT_ATTESTATION_API: &str = "https://iris-api.circle.com";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: usize = 240;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifies the burn whose attestation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationQuery {
    TransactionHash(TxHash),
    Nonce(B256),
}

impl AttestationQuery {
    fn query_string(&self) -> String {
        match self {
            Self::TransactionHash(tx_hash) => format!("transactionHash={tx_hash}"),
            Self::Nonce(nonce) => format!("nonce={nonce}"),
        }
    }
}

impl fmt::Display for AttestationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransactionHash(tx_hash) => write!(f, "burn tx {tx_hash}"),
            Self::Nonce(nonce) => write!(f, "nonce {nonce}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatus {
    Complete,
    PendingConfirmations,
    Other(String),
}

impl From<&str> for AttestationStatus {
    fn from(status: &str) -> Self {
        match status {
            "complete" => Self::Complete,
            "pending_confirmations" => Self::PendingConfirmations,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AttestationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::PendingConfirmations => f.write_str("pending_confirmations"),
            Self::Other(status) => f.write_str(status),
        }
    }
}

/// Attested burn message, ready to be submitted on the destination chain.
///
/// The content is untrusted; only its structure is checked locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationMessage {
    /// Unlike the `MessageSent` event payload, this carries the real nonce.
    pub message: Bytes,
    pub attestation: Bytes,
    pub status: AttestationStatus,
}

impl AttestationMessage {
    pub fn decode(&self) -> Result<CctpMessage, MessageError> {
        CctpMessage::decode(&self.message)
    }

    pub fn nonce(&self) -> Result<B256, MessageError> {
        extract_nonce(&self.message)
    }
}

/// Outcome of a single attestation lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Ready(AttestationMessage),
    /// The burn is not attested yet. `None` when the service has not
    /// indexed the transaction at all.
    Pending { status: Option<String> },
    /// The lookup itself failed (transport, HTTP error, malformed body).
    Failed { reason: String },
}

/// Delay schedule between attestation lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant {
        interval: Duration,
        jitter: bool,
    },
    Exponential {
        min_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub backoff: Backoff,
    /// Total lookups, including the first one.
    pub max_attempts: usize,
    /// Overall deadline measured from the first lookup.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Constant {
                interval: DEFAULT_POLL_INTERVAL,
                jitter: false,
            },
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_wait: None,
        }
    }
}

impl PollPolicy {
    pub const fn constant(interval: Duration, max_attempts: usize) -> Self {
        Self {
            backoff: Backoff::Constant {
                interval,
                jitter: false,
            },
            max_attempts,
            max_wait: None,
        }
    }

    #[must_use]
    pub const fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Delays between consecutive lookups; yields `max_attempts - 1` items.
    fn delays(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let retries = self.max_attempts.saturating_sub(1);

        match self.backoff {
            Backoff::Constant { interval, jitter } => {
                let builder = ConstantBuilder::default()
                    .with_delay(interval)
                    .with_max_times(retries);
                let builder = if jitter {
                    builder.with_jitter()
                } else {
                    builder
                };
                Box::new(builder.build())
            }
            Backoff::Exponential {
                min_delay,
                max_delay,
                jitter,
            } => {
                let builder = ExponentialBuilder::default()
                    .with_min_delay(min_delay)
                    .with_max_delay(max_delay)
                    .with_max_times(retries);
                let builder = if jitter {
                    builder.with_jitter()
                } else {
                    builder
                };
                Box::new(builder.build())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation not ready after {attempts} attempts (last status: {last_status})")]
    Timeout {
        attempts: usize,
        last_status: String,
    },
    #[error("attestation polling cancelled after {attempts} attempts")]
    Cancelled { attempts: usize },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MessageEntry {
    attestation: Option<String>,
    message: Option<String>,
    status: String,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<MessageEntry>,
}

/// Client for Circle's attestation ("Iris") API.
#[derive(Debug, Clone)]
pub struct AttestationClient {
    http: reqwest::Client,
    base_url: String,
}

impl AttestationClient {
    pub fn new(base_url: &Url) -> Result<Self, AttestationError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &Url, request_timeout: Duration) -> Result<Self, AttestationError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Performs one lookup. Never fails: every outcome is a [`PollStatus`].
    pub async fn fetch(&self, domain: Domain, query: AttestationQuery) -> PollStatus {
        let url = format!(
            "{}/v2/messages/{domain}?{}",
            self.base_url,
            query.query_string()
        );

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                return PollStatus::Failed {
                    reason: format!("request failed: {error}"),
                };
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return PollStatus::Pending { status: None };
        }

        if !status.is_success() {
            return PollStatus::Failed {
                reason: format!("HTTP {}", status.as_u16()),
            };
        }

        match response.json::<MessagesResponse>().await {
            Ok(body) => classify(body),
            Err(error) => PollStatus::Failed {
                reason: format!("malformed response: {error}"),
            },
        }
    }

    /// Polls until the attestation is complete.
    pub async fn poll(
        &self,
        domain: Domain,
        query: AttestationQuery,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<AttestationMessage, AttestationError> {
        info!(%domain, %query, max_attempts = policy.max_attempts, "Polling attestation API");

        let started = Instant::now();
        let mut delays = policy.delays();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let last_status = match self.fetch(domain, query).await {
                PollStatus::Ready(message) => {
                    info!(%query, attempts, "Attestation complete");
                    return Ok(message);
                }
                PollStatus::Pending { status } => {
                    let status = status.unwrap_or_else(|| "not found".to_string());
                    debug!(%query, attempts, %status, "Attestation pending");
                    status
                }
                PollStatus::Failed { reason } => {
                    warn!(%query, attempts, %reason, "Attestation lookup failed");
                    reason
                }
            };

            let Some(delay) = delays.next() else {
                return Err(AttestationError::Timeout {
                    attempts,
                    last_status,
                });
            };

            let past_deadline = policy
                .max_wait
                .is_some_and(|max_wait| started.elapsed() + delay > max_wait);

            if past_deadline {
                warn!(%query, attempts, max_wait = ?policy.max_wait, "Attestation deadline reached");
                return Err(AttestationError::Timeout {
                    attempts,
                    last_status,
                });
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    info!(%query, attempts, "Attestation polling cancelled");
                    return Err(AttestationError::Cancelled { attempts });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn classify(body: MessagesResponse) -> PollStatus {
    let Some(entry) = body.messages.into_iter().next() else {
        return PollStatus::Pending { status: None };
    };

    let status = AttestationStatus::from(entry.status.as_str());
    if status != AttestationStatus::Complete {
        return PollStatus::Pending {
            status: Some(entry.status),
        };
    }

    let (Some(message_hex), Some(attestation_hex)) = (entry.message, entry.attestation) else {
        return PollStatus::Failed {
            reason: "complete attestation is missing message or attestation".to_string(),
        };
    };

    match (
        alloy::hex::decode(&message_hex),
        alloy::hex::decode(&attestation_hex),
    ) {
        (Ok(message), Ok(attestation)) => PollStatus::Ready(AttestationMessage {
            message: Bytes::from(message),
            attestation: Bytes::from(attestation),
            status,
        }),
        (Err(error), _) | (_, Err(error)) => PollStatus::Failed {
            reason: format!("invalid hex in attestation response: {error}"),
        },
    }
}
