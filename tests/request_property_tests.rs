//! Property-based tests for request intake, token format checks and the
//! record codec.
//!
//! These cover the invariants that must hold for every input, not just the
//! handful of shapes the scenario tests use:
//!
//! 1. Any well-formed draft submits, and submits into the pending state
//! 2. Validation failures are total - bad amounts/emails never slip through
//! 3. Minted tokens always pass the fast-path format check, short or
//!    foreign-prefix strings never do
//! 4. The CBOR codec is lossless for the full record
//! 5. A decision touches only the decision fields
//!
//! Persistence and decision races are deliberately left to the scenario
//! tests - they need a real store.

use chrono::Utc;
use proptest::prelude::*;

use fund_approval::error::RequestError;
use fund_approval::request::{
    Currency, DecisionAction, DecisionRecord, FundRequest, Status, TimeStamp,
};
use fund_approval::token;

fn currency_strategy() -> impl Strategy<Value = Currency> {
    prop_oneof![
        Just(Currency::USD),
        Just(Currency::GBP),
        Just(Currency::EUR),
    ]
}

fn email_strategy() -> impl Strategy<Value = String> {
    ("[a-z][a-z0-9]{0,11}", "[a-z][a-z0-9]{0,11}")
        .prop_map(|(local, host)| format!("{local}@{host}.example.com"))
}

fn action_strategy() -> impl Strategy<Value = DecisionAction> {
    prop_oneof![Just(DecisionAction::Approve), Just(DecisionAction::Deny)]
}

proptest! {
    #[test]
    fn well_formed_drafts_always_submit_pending(
        amount in 1u64..=10_000_000_000,
        currency in currency_strategy(),
        purpose in "[A-Za-z][A-Za-z ]{0,40}",
        requester in email_strategy(),
        approver in email_strategy(),
        urgent in any::<bool>(),
    ) {
        let request = FundRequest::draft()
            .set_amount(amount)
            .set_currency(currency)
            .set_purpose(&purpose)
            .set_requester_email(&requester)
            .set_approver_email(&approver)
            .set_urgent(urgent)
            .submit()
            .unwrap();

        prop_assert_eq!(request.status, Status::Pending);
        prop_assert!(request.decided_by.is_none());
        prop_assert!(request.decided_at.is_none());
        prop_assert!(token::validate_format(&request.approval_token));
        prop_assert!(request.id.starts_with("req1"));
        prop_assert!(!request.is_expired(Utc::now()));
    }

    #[test]
    fn zero_amount_never_submits(
        currency in currency_strategy(),
        purpose in "[A-Za-z]{1,20}",
        requester in email_strategy(),
        approver in email_strategy(),
    ) {
        let err = FundRequest::draft()
            .set_amount(0)
            .set_currency(currency)
            .set_purpose(&purpose)
            .set_requester_email(&requester)
            .set_approver_email(&approver)
            .submit()
            .unwrap_err();

        prop_assert!(matches!(err, RequestError::ZeroAmount));
    }

    #[test]
    fn addresses_without_a_host_part_never_submit(
        currency in currency_strategy(),
        bad_email in "[a-z0-9]{1,20}",
        approver in email_strategy(),
    ) {
        let err = FundRequest::draft()
            .set_amount(100)
            .set_currency(currency)
            .set_purpose("supplies")
            .set_requester_email(&bad_email)
            .set_approver_email(&approver)
            .submit()
            .unwrap_err();

        prop_assert!(matches!(err, RequestError::InvalidRequesterEmail(_)));
    }

    #[test]
    fn short_strings_never_pass_the_token_check(garbage in "[a-z0-9]{0,11}") {
        prop_assert!(!token::validate_format(&garbage));
    }

    #[test]
    fn foreign_prefixes_never_pass_the_token_check(data in "[a-z0-9]{20,40}") {
        let req = format!("req1{}", data);
        let addr = format!("addr1{}", data);
        let tok = format!("tok1{}", data);
        prop_assert!(!token::validate_format(&req));
        prop_assert!(!token::validate_format(&addr));
        prop_assert!(token::validate_format(&tok));
    }

    #[test]
    fn record_codec_is_lossless(
        amount in 1u64..=10_000_000_000,
        currency in currency_strategy(),
        purpose in "[A-Za-z ]{1,40}",
        description in proptest::option::of("[A-Za-z ]{1,60}"),
        department in proptest::option::of("[A-Za-z]{1,20}"),
        requester in email_strategy(),
        approver in email_strategy(),
        urgent in any::<bool>(),
    ) {
        let mut request = FundRequest::draft()
            .set_amount(amount)
            .set_currency(currency)
            .set_purpose(&purpose)
            .set_requester_email(&requester)
            .set_approver_email(&approver)
            .set_urgent(urgent)
            .submit()
            .unwrap();
        request.description = description;
        request.department = department;

        let encoded = minicbor::to_vec(request.clone()).unwrap();
        let decoded: FundRequest = minicbor::decode(&encoded).unwrap();

        prop_assert_eq!(request, decoded);
    }

    #[test]
    fn a_decision_touches_only_the_decision_fields(
        amount in 1u64..=10_000_000_000,
        currency in currency_strategy(),
        requester in email_strategy(),
        approver in email_strategy(),
        action in action_strategy(),
        decided_by in "[A-Za-z]{1,20}",
        notes in proptest::option::of("[A-Za-z ]{1,40}"),
    ) {
        let request = FundRequest::draft()
            .set_amount(amount)
            .set_currency(currency)
            .set_purpose("supplies")
            .set_requester_email(&requester)
            .set_approver_email(&approver)
            .submit()
            .unwrap();

        let record = DecisionRecord {
            status: action.terminal_status(),
            decided_by: decided_by.clone(),
            decision_notes: notes.clone(),
            decided_at: TimeStamp::new(),
        };
        let decided = request.with_decision(&record);

        prop_assert_eq!(decided.status, action.terminal_status());
        prop_assert_ne!(decided.status, Status::Pending);
        prop_assert_eq!(decided.decided_by, Some(decided_by));
        prop_assert_eq!(decided.decision_notes, notes);
        prop_assert!(decided.decided_at.is_some());

        // everything else is untouched
        prop_assert_eq!(decided.id, request.id);
        prop_assert_eq!(decided.approval_token, request.approval_token);
        prop_assert_eq!(decided.amount, request.amount);
        prop_assert_eq!(decided.created_at, request.created_at);
    }
}
