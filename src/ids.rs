//! Request correlation ids.
//!
//! Every request carries a ULID id from the moment the gateway parses it.
//! A caller that already has an id (an upstream proxy, a retrying client)
//! forwards it in the `x-request-id` header and the same id appears in every
//! log line and on the response; anything else gets a freshly minted one.

use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Header carrying the correlation id end to end.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for one request, unique across the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Adopt the id a client supplied, or mint a fresh one when the header
    /// is absent or not a valid ULID.
    pub fn from_header_or_new(header_value: Option<&str>) -> Self {
        header_value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_else(Self::new)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RequestId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplied_ulid_header_is_adopted() {
        let id = RequestId::new();
        let adopted = RequestId::from_header_or_new(Some(&id.to_string()));
        assert_eq!(adopted, id);
    }

    #[test]
    fn bad_or_missing_header_mints_a_fresh_id() {
        let from_garbage = RequestId::from_header_or_new(Some("not-a-ulid"));
        let from_nothing = RequestId::from_header_or_new(None);
        assert_ne!(from_garbage, from_nothing);
        // ULID canonical text form.
        assert_eq!(from_garbage.to_string().len(), 26);
    }

    #[test]
    fn display_round_trips_through_parse() {
        let id = RequestId::new();
        assert_eq!(id.to_string().parse::<RequestId>().unwrap(), id);
    }
}
