//! Bounded-retry delivery of one notification job.
//!
//! Each attempt is raced against a hard timeout; a timeout counts as a
//! transport failure. Between attempts the controller sleeps an
//! exponential backoff plus jitter and discards its connection so the
//! next attempt starts fresh. Success on any attempt short-circuits.
//!
//! Each recipient walks
//! `NotStarted -> Attempting(n) -> { Delivered | Attempting(n+1) | ExhaustedFailed }`;
//! the controller's own state settles on the job's terminal state,
//! `Delivered` only when every recipient walk delivered.

use crate::transport::{Connector, Message, Transport, TransportError, TransportErrorKind};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    ApprovalRequest,
    Confirmation,
    Decision,
}

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("delivery job has no recipients")]
    NoRecipients,
    #[error("retry config must allow at least one attempt")]
    ZeroAttempts,
}

/// One outbound notification. Ephemeral: constructed right before sending,
/// discarded once the outcome is reported, never persisted.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub kind: DeliveryKind,
    pub recipients: Vec<String>,
    pub payload: Message,
    /// FundRequest id, carried for log correlation only.
    pub correlation_id: String,
}

impl DeliveryJob {
    pub fn new(
        kind: DeliveryKind,
        recipients: Vec<String>,
        payload: Message,
        correlation_id: String,
    ) -> Result<Self, JobError> {
        if recipients.is_empty() {
            return Err(JobError::NoRecipients);
        }
        Ok(Self {
            kind,
            recipients,
            payload,
            correlation_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    NotStarted,
    Attempting(u32),
    Delivered,
    ExhaustedFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientStatus {
    Delivered {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        reason: TransportErrorKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientOutcome {
    pub recipient: String,
    pub status: RecipientStatus,
}

impl RecipientOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self.status, RecipientStatus::Delivered { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub kind: DeliveryKind,
    pub correlation_id: String,
    pub recipients: Vec<RecipientOutcome>,
}

impl DeliveryOutcome {
    pub fn all_delivered(&self) -> bool {
        self.recipients.iter().all(RecipientOutcome::delivered)
    }

    pub fn failures(&self) -> Vec<&RecipientOutcome> {
        self.recipients
            .iter()
            .filter(|r| !r.delivered())
            .collect()
    }
}

/// Attempt bounds for one job. Per-call-site differences are configuration
/// here, not copy-pasted retry loops.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Upper bound on the random noise added to each backoff sleep, to
    /// avoid synchronized retry storms.
    pub jitter_cap: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(45),
            jitter_cap: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.max_attempts == 0 {
            return Err(JobError::ZeroAttempts);
        }
        Ok(())
    }

    /// `2^attempt` seconds plus up to `jitter_cap` of noise. Known
    /// limitation, kept on purpose: permanent failures back off exactly
    /// like transient ones.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_secs(1u64 << attempt.min(16));
        let cap = self.jitter_cap.as_millis() as u64;
        let jitter = if cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=cap)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Executes one job against an inherently flaky transport. Owns its
/// connection exclusively; never shared across concurrent jobs.
pub struct AttemptController {
    connector: Arc<dyn Connector>,
    config: RetryConfig,
    cancel: CancellationToken,
    state: AttemptState,
}

impl AttemptController {
    /// Rejects a config that could never make an attempt.
    pub fn new(connector: Arc<dyn Connector>, config: RetryConfig) -> Result<Self, JobError> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            cancel: CancellationToken::new(),
            state: AttemptState::NotStarted,
        })
    }

    /// Hook the controller into host shutdown. A cancelled token lets the
    /// in-flight attempt finish but stops further retries.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Where the job stands: `Attempting` while a recipient walk is in
    /// flight, then the terminal state of the job as a whole. `Delivered`
    /// only when every recipient was delivered.
    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Deliver the job to every recipient in order. Per-recipient results
    /// are collected, never raised.
    pub async fn deliver(&mut self, job: &DeliveryJob) -> DeliveryOutcome {
        let mut recipients = Vec::with_capacity(job.recipients.len());
        for recipient in &job.recipients {
            let status = self
                .deliver_to(recipient, &job.payload, &job.correlation_id)
                .await;
            recipients.push(RecipientOutcome {
                recipient: recipient.clone(),
                status,
            });
        }
        self.state = if recipients.iter().all(RecipientOutcome::delivered) {
            AttemptState::Delivered
        } else {
            AttemptState::ExhaustedFailed
        };
        DeliveryOutcome {
            kind: job.kind,
            correlation_id: job.correlation_id.clone(),
            recipients,
        }
    }

    async fn deliver_to(
        &mut self,
        recipient: &str,
        payload: &Message,
        correlation_id: &str,
    ) -> RecipientStatus {
        let mut connection: Option<Box<dyn Transport>> = None;
        let mut last_kind = TransportErrorKind::Unknown;
        let mut attempts = 0;

        for attempt in 1..=self.config.max_attempts {
            self.state = AttemptState::Attempting(attempt);
            attempts = attempt;

            match self.attempt(&mut connection, recipient, payload).await {
                Ok(()) => {
                    debug!(request_id = %correlation_id, recipient = %recipient, attempt, "delivered");
                    return RecipientStatus::Delivered { attempts: attempt };
                }
                Err(err) => {
                    warn!(
                        request_id = %correlation_id,
                        recipient = %recipient,
                        attempt,
                        error = %err,
                        "delivery attempt failed"
                    );
                    last_kind = err.kind;
                    // stale connections are assumed guilty after a failure
                    connection = None;

                    if attempt == self.config.max_attempts {
                        break;
                    }
                    let delay = self.config.backoff_delay(attempt);
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            warn!(request_id = %correlation_id, recipient = %recipient, "shutdown, retries abandoned");
                            break;
                        }
                    }
                }
            }
        }

        RecipientStatus::Failed {
            attempts,
            reason: last_kind,
        }
    }

    // One attempt: (re)connect if needed, then race the send against the
    // hard timeout. A timeout is indistinguishable from a transport error
    // as far as retrying goes.
    async fn attempt(
        &self,
        connection: &mut Option<Box<dyn Transport>>,
        recipient: &str,
        payload: &Message,
    ) -> Result<(), TransportError> {
        let work = async {
            let transport = match connection {
                Some(transport) => transport,
                None => connection.insert(self.connector.connect().await?),
            };
            transport.send(recipient, payload).await
        };

        match timeout(self.config.attempt_timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "no response from relay within {:?}",
                self.config.attempt_timeout
            ))),
        }
    }
}
