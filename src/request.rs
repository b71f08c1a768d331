//! Fund request record, draft builder and CBOR codec
use crate::error::RequestError;
use crate::token;
use chrono::{DateTime, Duration, TimeZone, Utc};

/// How long an approval token stays usable after the request is created.
pub const APPROVAL_WINDOW_DAYS: i64 = 7;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Currency {
    #[n(0)]
    USD,
    #[n(1)]
    GBP,
    #[n(2)]
    EUR,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Eq, PartialEq)]
pub enum Status {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Denied,
}

/// The two terminal moves out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionAction {
    Approve,
    Deny,
}

impl DecisionAction {
    pub fn terminal_status(&self) -> Status {
        match self {
            DecisionAction::Approve => Status::Approved,
            DecisionAction::Deny => Status::Denied,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decision fields written exactly once, alongside the status flip.
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub status: Status,
    pub decided_by: String,
    pub decision_notes: Option<String>,
    pub decided_at: TimeStamp<Utc>,
}

/// The subject of the workflow. Created once with `status = Pending`, then
/// mutated exactly once by a successful decision. Amounts are integer minor
/// units.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FundRequest {
    #[n(0)]
    pub id: String, // uuid7, bech32 "req" prefix
    #[n(1)]
    pub approval_token: String, // uuid7, bech32 "tok" prefix, single use
    #[n(2)]
    pub amount: u64,
    #[n(3)]
    pub currency: Currency,
    #[n(4)]
    pub purpose: String,
    #[n(5)]
    pub description: Option<String>,
    #[n(6)]
    pub requester_email: String,
    #[n(7)]
    pub approver_email: String,
    #[n(8)]
    pub department: Option<String>,
    #[n(9)]
    pub urgent: bool,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
    #[n(11)]
    pub status: Status,
    #[n(12)]
    pub decided_by: Option<String>,
    #[n(13)]
    pub decision_notes: Option<String>,
    #[n(14)]
    pub decided_at: Option<TimeStamp<Utc>>,
}

impl FundRequest {
    /// Start a new draft. Ids, token and timestamps are stamped on submit.
    pub fn draft() -> RequestDraft {
        RequestDraft::default()
    }

    /// The approval token lapses `APPROVAL_WINDOW_DAYS` after creation,
    /// independently of the status check.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at.to_datetime_utc())
            > Duration::days(APPROVAL_WINDOW_DAYS)
    }

    /// Copy of the record with the decision fields applied.
    pub fn with_decision(&self, decision: &DecisionRecord) -> FundRequest {
        let mut decided = self.clone();
        decided.status = decision.status;
        decided.decided_by = Some(decision.decided_by.clone());
        decided.decision_notes = decision.decision_notes.clone();
        decided.decided_at = Some(decision.decided_at.clone());
        decided
    }
}

// Also used for constructing drafts before anything is persisted
#[derive(Debug, Default)]
pub struct RequestDraft {
    amount: u64,
    currency: Option<Currency>,
    purpose: Option<String>,
    description: Option<String>,
    requester_email: Option<String>,
    approver_email: Option<String>,
    department: Option<String>,
    urgent: bool,
}

impl RequestDraft {
    pub fn set_amount(mut self, amount: u64) -> Self {
        self.amount = amount;
        self
    }
    pub fn set_currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }
    pub fn set_purpose(mut self, purpose: &str) -> Self {
        self.purpose = Some(purpose.to_string());
        self
    }
    pub fn set_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
    pub fn set_requester_email(mut self, email: &str) -> Self {
        self.requester_email = Some(email.to_string());
        self
    }
    pub fn set_approver_email(mut self, email: &str) -> Self {
        self.approver_email = Some(email.to_string());
        self
    }
    pub fn set_department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }
    pub fn set_urgent(mut self, urgent: bool) -> Self {
        self.urgent = urgent;
        self
    }

    /// Checks fields, then stamps identity, token, creation time and the
    /// initial `Pending` status.
    pub fn submit(self) -> Result<FundRequest, RequestError> {
        if self.amount == 0 {
            return Err(RequestError::ZeroAmount);
        }
        let Some(currency) = self.currency else {
            return Err(RequestError::MissingCurrency);
        };
        let purpose = match self.purpose {
            Some(p) if !p.trim().is_empty() => p,
            _ => return Err(RequestError::MissingPurpose),
        };
        let requester_email = match self.requester_email {
            Some(e) if plausible_email(&e) => e,
            other => return Err(RequestError::InvalidRequesterEmail(other)),
        };
        let approver_email = match self.approver_email {
            Some(e) if plausible_email(&e) => e,
            other => return Err(RequestError::InvalidApproverEmail(other)),
        };

        Ok(FundRequest {
            id: token::mint_request_id(),
            approval_token: token::mint_token(),
            amount: self.amount,
            currency,
            purpose,
            description: self.description,
            requester_email,
            approver_email,
            department: self.department,
            urgent: self.urgent,
            created_at: TimeStamp::new(),
            status: Status::Pending,
            decided_by: None,
            decision_notes: None,
            decided_at: None,
        })
    }
}

// enough of a shape check to catch swapped or empty fields; real deliverability
// is the relay's problem
fn plausible_email(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}
impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}
impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
