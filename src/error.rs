//! Error families for the approval workflow.
//!
//! Workflow conflicts (`AlreadyDecided`, `Expired`) and infrastructure
//! failures (`StoreUnavailable`) are separate variants so callers can map
//! them to different user-facing behaviour without string matching.

#[derive(thiserror::Error, Debug)]
pub enum DecisionError {
    #[error("Approval token is malformed")]
    InvalidTokenFormat,
    #[error("No request matches the presented token")]
    TokenNotFound,
    #[error("Request has already been decided")]
    AlreadyDecided,
    #[error("Approval window for this request has lapsed")]
    Expired,
    #[error("A decider name is required")]
    MissingDecider,
    #[error("Request store is unavailable")]
    StoreUnavailable(#[from] StoreError),
    #[error("Notification dispatch rejected the job")]
    Dispatch(#[from] crate::dispatcher::DispatchError),
}

#[derive(thiserror::Error, Debug)]
pub enum RequestError {
    #[error("Amount must be greater than zero")]
    ZeroAmount,
    #[error("Currency is not set")]
    MissingCurrency,
    #[error("Purpose is empty")]
    MissingPurpose,
    #[error("Requester email is missing or malformed: {0:?}")]
    InvalidRequesterEmail(Option<String>),
    #[error("Approver email is missing or malformed: {0:?}")]
    InvalidApproverEmail(Option<String>),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store backend failure")]
    Backend(#[from] sled::Error),
    #[error("failed to decode a stored record")]
    Decode(#[from] minicbor::decode::Error),
    #[error("failed to encode a record: {0}")]
    Encode(String),
}
