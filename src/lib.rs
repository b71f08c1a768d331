//! Fund-request approval workflow: a single-use, time-limited approval
//! token state machine plus a resilient notification dispatcher.

pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod machine;
pub mod request;
pub mod store;
pub mod token;
pub mod transport;
