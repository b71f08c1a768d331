//! Composes notification messages from a request snapshot and fans them
//! out. Every job gets its own attempt controller and its own connection,
//! so one job's retries never block or corrupt another's. Delivery failure
//! is an outcome here, never an error; only malformed jobs raise.

use crate::delivery::{
    AttemptController, DeliveryJob, DeliveryKind, DeliveryOutcome, JobError, RetryConfig,
};
use crate::request::{Currency, FundRequest, Status};
use crate::transport::{Connector, MailerConfig, Message};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("malformed delivery job")]
    MalformedJob(#[from] JobError),
}

/// Aggregate of every job a notify call produced. The caller decides how
/// to surface a partial failure; the dispatcher only reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    AllSucceeded(Vec<DeliveryOutcome>),
    PartialFailure(Vec<DeliveryOutcome>),
    AllFailed(Vec<DeliveryOutcome>),
}

impl DispatchOutcome {
    fn aggregate(outcomes: Vec<DeliveryOutcome>) -> Self {
        let delivered = outcomes
            .iter()
            .flat_map(|o| &o.recipients)
            .filter(|r| r.delivered())
            .count();
        let total = outcomes.iter().map(|o| o.recipients.len()).sum::<usize>();

        if delivered == total {
            DispatchOutcome::AllSucceeded(outcomes)
        } else if delivered == 0 {
            DispatchOutcome::AllFailed(outcomes)
        } else {
            DispatchOutcome::PartialFailure(outcomes)
        }
    }

    pub fn fully_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::AllSucceeded(_))
    }

    pub fn outcomes(&self) -> &[DeliveryOutcome] {
        match self {
            DispatchOutcome::AllSucceeded(o)
            | DispatchOutcome::PartialFailure(o)
            | DispatchOutcome::AllFailed(o) => o,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Base URL the approval link is built under, e.g. `https://funds.example.com`.
    pub approval_base_url: String,
    pub mailer: MailerConfig,
}

pub struct NotificationDispatcher {
    connector: Arc<dyn Connector>,
    retry: RetryConfig,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(
        connector: Arc<dyn Connector>,
        retry: RetryConfig,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        retry.validate()?;
        Ok(Self {
            connector,
            retry,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Hook into host shutdown: in-flight attempts finish, no new retries
    /// start.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// One job to the approver, carrying the single-use approval link.
    pub async fn notify_approval_requested(
        &self,
        request: &FundRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job = self.approval_request_job(request)?;
        let outcome = self.run_job(job).await?;
        Ok(DispatchOutcome::aggregate(vec![outcome]))
    }

    /// One job to the requester confirming intake.
    pub async fn notify_requester_confirmation(
        &self,
        request: &FundRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job = self.confirmation_job(request)?;
        let outcome = self.run_job(job).await?;
        Ok(DispatchOutcome::aggregate(vec![outcome]))
    }

    /// Approver request and requester confirmation together. The two jobs
    /// are independent and both are always attempted; neither waits on the
    /// other's retries.
    pub async fn notify_submission(
        &self,
        request: &FundRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let approver = self.approval_request_job(request)?;
        let requester = self.confirmation_job(request)?;

        let (a, b) = tokio::join!(self.run_job(approver), self.run_job(requester));
        Ok(DispatchOutcome::aggregate(vec![a?, b?]))
    }

    /// Decision to the requester, plus a best-effort receipt to the
    /// approver when an approver address is on record.
    pub async fn notify_decision(
        &self,
        request: &FundRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let requester = self.decision_job(request)?;

        let outcomes = if request.approver_email.is_empty() {
            vec![self.run_job(requester).await?]
        } else {
            let receipt = self.decision_receipt_job(request)?;
            let (a, b) = tokio::join!(self.run_job(requester), self.run_job(receipt));
            vec![a?, b?]
        };

        Ok(DispatchOutcome::aggregate(outcomes))
    }

    // Each job owns its controller, and through it its transport connection.
    async fn run_job(&self, job: DeliveryJob) -> Result<DeliveryOutcome, JobError> {
        let mut controller = AttemptController::new(self.connector.clone(), self.retry.clone())?
            .with_cancellation(self.shutdown.clone());
        let outcome = controller.deliver(&job).await;
        if outcome.all_delivered() {
            info!(request_id = %outcome.correlation_id, kind = ?outcome.kind, "notification delivered");
        } else {
            warn!(
                request_id = %outcome.correlation_id,
                kind = ?outcome.kind,
                failed = outcome.failures().len(),
                "notification incomplete"
            );
        }
        Ok(outcome)
    }

    fn approval_request_job(&self, request: &FundRequest) -> Result<DeliveryJob, JobError> {
        let link = format!(
            "{}/approve/{}",
            self.config.approval_base_url.trim_end_matches('/'),
            request.approval_token
        );
        let mut body = format!(
            "A fund request needs your decision.\n\n\
             Requested by: {}\n\
             Amount: {}\n\
             Purpose: {}\n",
            request.requester_email,
            format_amount(request.amount, request.currency),
            request.purpose,
        );
        if let Some(description) = &request.description {
            body.push_str(&format!("Details: {description}\n"));
        }
        if let Some(department) = &request.department {
            body.push_str(&format!("Department: {department}\n"));
        }
        body.push_str(&format!(
            "\nApprove or deny here (link is single use and lapses in 7 days):\n{link}\n"
        ));

        DeliveryJob::new(
            DeliveryKind::ApprovalRequest,
            vec![request.approver_email.clone()],
            Message {
                from: self.config.mailer.from_address.clone(),
                subject: format!(
                    "{}Fund request {}: {}",
                    urgency_marker(request),
                    request.id,
                    format_amount(request.amount, request.currency)
                ),
                body,
            },
            request.id.clone(),
        )
    }

    fn confirmation_job(&self, request: &FundRequest) -> Result<DeliveryJob, JobError> {
        let body = format!(
            "Your fund request was received and sent to {} for approval.\n\n\
             Amount: {}\n\
             Purpose: {}\n\
             Reference: {}\n",
            request.approver_email,
            format_amount(request.amount, request.currency),
            request.purpose,
            request.id,
        );

        DeliveryJob::new(
            DeliveryKind::Confirmation,
            vec![request.requester_email.clone()],
            Message {
                from: self.config.mailer.from_address.clone(),
                subject: format!("{}We received your fund request", urgency_marker(request)),
                body,
            },
            request.id.clone(),
        )
    }

    fn decision_job(&self, request: &FundRequest) -> Result<DeliveryJob, JobError> {
        let verdict = decision_wording(request.status);
        let mut body = format!(
            "Your fund request has been {verdict}.\n\n\
             Amount: {}\n\
             Purpose: {}\n\
             Reference: {}\n",
            format_amount(request.amount, request.currency),
            request.purpose,
            request.id,
        );
        if let Some(decided_by) = &request.decided_by {
            body.push_str(&format!("Decided by: {decided_by}\n"));
        }
        if let Some(notes) = &request.decision_notes {
            body.push_str(&format!("Notes: {notes}\n"));
        }

        DeliveryJob::new(
            DeliveryKind::Decision,
            vec![request.requester_email.clone()],
            Message {
                from: self.config.mailer.from_address.clone(),
                subject: format!("Your fund request was {verdict}"),
                body,
            },
            request.id.clone(),
        )
    }

    fn decision_receipt_job(&self, request: &FundRequest) -> Result<DeliveryJob, JobError> {
        let verdict = decision_wording(request.status);
        DeliveryJob::new(
            DeliveryKind::Decision,
            vec![request.approver_email.clone()],
            Message {
                from: self.config.mailer.from_address.clone(),
                subject: format!("Receipt: request {} {verdict}", request.id),
                body: format!(
                    "You {verdict} fund request {} ({}) from {}.\n",
                    request.id,
                    format_amount(request.amount, request.currency),
                    request.requester_email,
                ),
            },
            request.id.clone(),
        )
    }
}

fn urgency_marker(request: &FundRequest) -> &'static str {
    if request.urgent { "[URGENT] " } else { "" }
}

fn decision_wording(status: Status) -> &'static str {
    match status {
        Status::Approved => "approved",
        Status::Denied => "denied",
        Status::Pending => "left pending",
    }
}

// minor units in, human text out
fn format_amount(amount: u64, currency: Currency) -> String {
    format!("{}.{:02} {:?}", amount / 100, amount % 100, currency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{RecipientOutcome, RecipientStatus};
    use crate::transport::TransportErrorKind;

    fn outcome(kind: DeliveryKind, statuses: Vec<(&str, bool)>) -> DeliveryOutcome {
        DeliveryOutcome {
            kind,
            correlation_id: "req1test".to_string(),
            recipients: statuses
                .into_iter()
                .map(|(addr, ok)| RecipientOutcome {
                    recipient: addr.to_string(),
                    status: if ok {
                        RecipientStatus::Delivered { attempts: 1 }
                    } else {
                        RecipientStatus::Failed {
                            attempts: 3,
                            reason: TransportErrorKind::Connection,
                        }
                    },
                })
                .collect(),
        }
    }

    #[test]
    fn aggregation_covers_all_three_shapes() {
        let all_ok = DispatchOutcome::aggregate(vec![
            outcome(DeliveryKind::ApprovalRequest, vec![("a@x.com", true)]),
            outcome(DeliveryKind::Confirmation, vec![("b@x.com", true)]),
        ]);
        assert!(matches!(all_ok, DispatchOutcome::AllSucceeded(_)));
        assert!(all_ok.fully_delivered());

        let partial = DispatchOutcome::aggregate(vec![
            outcome(DeliveryKind::ApprovalRequest, vec![("a@x.com", true)]),
            outcome(DeliveryKind::Confirmation, vec![("b@x.com", false)]),
        ]);
        assert!(matches!(partial, DispatchOutcome::PartialFailure(_)));

        let none = DispatchOutcome::aggregate(vec![outcome(
            DeliveryKind::Decision,
            vec![("a@x.com", false)],
        )]);
        assert!(matches!(none, DispatchOutcome::AllFailed(_)));
        assert!(!none.fully_delivered());
    }

    #[test]
    fn amounts_render_as_major_and_minor_units() {
        assert_eq!(format_amount(20_000, Currency::GBP), "200.00 GBP");
        assert_eq!(format_amount(105, Currency::USD), "1.05 USD");
        assert_eq!(format_amount(7, Currency::EUR), "0.07 EUR");
    }
}
