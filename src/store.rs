//! Durable request records.
//!
//! The store is the single source of truth for request state and the only
//! shared mutable resource in the workflow. The decision race is resolved
//! here, by a compare-and-swap on the stored record; nothing upstream
//! holds locks.

use crate::error::StoreError;
use crate::request::{DecisionRecord, FundRequest, Status};
use sled::{Batch, Db};
use std::sync::Arc;

pub trait RequestStore: Send + Sync {
    /// Persist a freshly created request and its token index.
    fn insert(&self, request: &FundRequest) -> Result<(), StoreError>;

    /// Look a request up by its approval token.
    fn get_by_token(&self, token: &str) -> Result<Option<FundRequest>, StoreError>;

    /// Conditional transition: apply the decision fields only while the
    /// stored status still matches `expected`. Returns `false` when it no
    /// longer does, signalling a lost race.
    fn commit_decision(
        &self,
        id: &str,
        expected: Status,
        decision: &DecisionRecord,
    ) -> Result<bool, StoreError>;
}

/// Records are keyed by request id, CBOR-encoded; a second key maps the
/// approval token back to the id. Both land in one batch on insert.
pub struct SledStore {
    instance: Arc<Db>,
}

impl SledStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }
}

fn encode(request: &FundRequest) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(request).map_err(|e| StoreError::Encode(e.to_string()))
}

impl RequestStore for SledStore {
    fn insert(&self, request: &FundRequest) -> Result<(), StoreError> {
        let record = encode(request)?;

        let mut batch = Batch::default();
        batch.insert(request.id.as_bytes(), record);
        batch.insert(request.approval_token.as_bytes(), request.id.as_bytes());
        self.instance.apply_batch(batch)?;

        Ok(())
    }

    fn get_by_token(&self, token: &str) -> Result<Option<FundRequest>, StoreError> {
        let Some(id) = self.instance.get(token.as_bytes())? else {
            return Ok(None);
        };
        let Some(raw) = self.instance.get(&id)? else {
            return Ok(None);
        };
        let request = minicbor::decode(&raw)?;
        Ok(Some(request))
    }

    fn commit_decision(
        &self,
        id: &str,
        expected: Status,
        decision: &DecisionRecord,
    ) -> Result<bool, StoreError> {
        loop {
            let Some(old) = self.instance.get(id.as_bytes())? else {
                return Ok(false);
            };
            let current: FundRequest = minicbor::decode(&old)?;
            if current.status != expected {
                return Ok(false);
            }

            let next = encode(&current.with_decision(decision))?;
            match self
                .instance
                .compare_and_swap(id.as_bytes(), Some(old), Some(next))?
            {
                Ok(()) => return Ok(true),
                // lost a write race; re-read and re-check the guard
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Currency, DecisionAction, FundRequest, TimeStamp};
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir, name: &str) -> SledStore {
        let db = sled::open(dir.path().join(name)).unwrap();
        SledStore::new(Arc::new(db))
    }

    fn pending_request() -> FundRequest {
        FundRequest::draft()
            .set_amount(50_000)
            .set_currency(Currency::USD)
            .set_purpose("Conference travel")
            .set_requester_email("requester@example.com")
            .set_approver_email("approver@example.com")
            .submit()
            .unwrap()
    }

    fn decision(action: DecisionAction) -> DecisionRecord {
        DecisionRecord {
            status: action.terminal_status(),
            decided_by: "Sam Lead".to_string(),
            decision_notes: None,
            decided_at: TimeStamp::new(),
        }
    }

    #[test]
    fn insert_then_lookup_by_token() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, "lookup.db");
        let request = pending_request();

        store.insert(&request).unwrap();

        let loaded = store.get_by_token(&request.approval_token).unwrap();
        assert_eq!(loaded, Some(request));
    }

    #[test]
    fn unknown_token_is_none() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, "unknown.db");

        assert_eq!(store.get_by_token("tok1qqqqqqqqqq").unwrap(), None);
    }

    #[test]
    fn commit_succeeds_only_while_pending() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, "commit.db");
        let request = pending_request();
        store.insert(&request).unwrap();

        assert!(
            store
                .commit_decision(&request.id, Status::Pending, &decision(DecisionAction::Approve))
                .unwrap()
        );

        // second transition loses the guard check
        assert!(
            !store
                .commit_decision(&request.id, Status::Pending, &decision(DecisionAction::Deny))
                .unwrap()
        );

        let stored = store.get_by_token(&request.approval_token).unwrap().unwrap();
        assert_eq!(stored.status, Status::Approved);
        assert_eq!(stored.decided_by.as_deref(), Some("Sam Lead"));
    }

    #[test]
    fn commit_on_missing_record_reports_lost_race() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir, "missing.db");

        assert!(
            !store
                .commit_decision(
                    "req1neverstored",
                    Status::Pending,
                    &decision(DecisionAction::Approve)
                )
                .unwrap()
        );
    }
}
