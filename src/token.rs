//! Approval token and request id generation, plus the cheap format check
//! that rejects obviously malformed tokens before any store round-trip.

use bech32::{Bech32m, Hrp};
use uuid7::uuid7;

/// Human-readable prefix for approval tokens.
pub const TOKEN_HRP: &str = "tok";
/// Human-readable prefix for request ids.
pub const REQUEST_HRP: &str = "req";

/// Shortest token we will even look up. Real tokens are a bech32m-encoded
/// uuid7 and come out far longer than this.
pub const MIN_TOKEN_LEN: usize = 12;

// construct a unique id under the given prefix and encode using bech32
fn mint(hrp: &str) -> String {
    let hrp = Hrp::parse_unchecked(hrp);
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .expect("a 16 byte payload is always within bech32 limits")
}

/// Single-use approval token. URL-safe, globally unique, never reused.
pub fn mint_token() -> String {
    mint(TOKEN_HRP)
}

pub fn mint_request_id() -> String {
    mint(REQUEST_HRP)
}

/// Fast-path token check. This is an optimisation to skip the store lookup
/// for garbage input, not a substitute for the conditional write guard.
pub fn validate_format(token: &str) -> bool {
    if token.len() < MIN_TOKEN_LEN {
        return false;
    }
    // same prefix mint_token encodes under: hrp then the bech32 separator
    let Some(data) = token
        .strip_prefix(TOKEN_HRP)
        .and_then(|rest| rest.strip_prefix('1'))
    else {
        return false;
    };
    // bech32 data part is lowercase alphanumeric only
    !data.is_empty()
        && data
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
