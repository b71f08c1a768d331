//! Approval token state machine.
//!
//! Owns the request lifecycle: `Pending` moves to `Approved` or `Denied`
//! exactly once, arbitrated by the store's conditional write. A committed
//! decision always triggers a notification attempt, and a failed
//! notification never rolls the decision back.

use crate::dispatcher::{DispatchOutcome, NotificationDispatcher};
use crate::error::DecisionError;
use crate::request::{DecisionAction, DecisionRecord, FundRequest, Status, TimeStamp};
use crate::store::RequestStore;
use crate::token;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a committed decision. `delivery` may report failures; the
/// transition itself already happened and stands.
#[derive(Debug)]
pub struct Decision {
    pub request: FundRequest,
    pub delivery: DispatchOutcome,
}

/// Outcome of intake: the persisted request plus the fan-out result for
/// the approver and requester notifications.
#[derive(Debug)]
pub struct Submission {
    pub request: FundRequest,
    pub delivery: DispatchOutcome,
}

pub struct ApprovalStateMachine {
    store: Arc<dyn RequestStore>,
    dispatcher: NotificationDispatcher,
}

impl ApprovalStateMachine {
    /// Both collaborators are injected; the machine holds no global state.
    pub fn new(store: Arc<dyn RequestStore>, dispatcher: NotificationDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Persist a new pending request, then notify approver and requester.
    /// Both notifications are attempted regardless of each other's outcome
    /// and neither failing fails the intake.
    pub async fn submit_request(
        &self,
        request: FundRequest,
    ) -> Result<Submission, DecisionError> {
        self.store.insert(&request)?;
        info!(request_id = %request.id, approver = %request.approver_email, "request submitted");

        let delivery = self.dispatcher.notify_submission(&request).await?;
        if !delivery.fully_delivered() {
            warn!(request_id = %request.id, "request stored but intake notifications incomplete");
        }

        Ok(Submission { request, delivery })
    }

    /// Format check first, store lookup second. Malformed tokens never
    /// reach the store.
    pub fn load_by_token(&self, presented: &str) -> Result<FundRequest, DecisionError> {
        if !token::validate_format(presented) {
            return Err(DecisionError::InvalidTokenFormat);
        }
        self.store
            .get_by_token(presented)?
            .ok_or(DecisionError::TokenNotFound)
    }

    /// Expiry and already-decided are independent checks and distinct
    /// errors. An expired request is rejected even while still pending.
    pub fn validate_for_decision(
        &self,
        request: &FundRequest,
        now: DateTime<Utc>,
    ) -> Result<(), DecisionError> {
        if request.is_expired(now) {
            return Err(DecisionError::Expired);
        }
        if request.status != Status::Pending {
            return Err(DecisionError::AlreadyDecided);
        }
        Ok(())
    }

    /// Decide a request by its token.
    ///
    /// The fresh re-read and the validation narrow the race window; the
    /// store's conditional write closes it. A lost conditional write is
    /// reported as `AlreadyDecided`, same as losing at validation.
    pub async fn decide(
        &self,
        presented: &str,
        action: DecisionAction,
        decided_by: &str,
        notes: Option<String>,
    ) -> Result<Decision, DecisionError> {
        if decided_by.trim().is_empty() {
            return Err(DecisionError::MissingDecider);
        }

        // always a fresh read, never a cached snapshot
        let request = self.load_by_token(presented)?;
        let now = Utc::now();
        self.validate_for_decision(&request, now)?;

        let record = DecisionRecord {
            status: action.terminal_status(),
            decided_by: decided_by.trim().to_string(),
            decision_notes: notes,
            decided_at: TimeStamp::from(now),
        };

        if !self
            .store
            .commit_decision(&request.id, Status::Pending, &record)?
        {
            return Err(DecisionError::AlreadyDecided);
        }

        let decided = request.with_decision(&record);
        info!(
            request_id = %decided.id,
            action = ?action,
            decided_by = %record.decided_by,
            "decision committed"
        );

        // Committed. Whatever happens to the notification from here on is
        // reported, not fatal.
        let delivery = self.dispatcher.notify_decision(&decided).await?;
        if !delivery.fully_delivered() {
            warn!(request_id = %decided.id, "decision committed but notification incomplete");
        }

        Ok(Decision {
            request: decided,
            delivery,
        })
    }
}
