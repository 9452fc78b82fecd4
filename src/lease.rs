//! Lease record encoding
//!
//! The lease is the TXT record's `(owner, expires_at)` pair: a soft,
//! time-bounded claim of authority. The wire form is a single ASCII string
//! `owner=<role> exp=<unix_seconds>`. Parsers ignore unknown extra tokens;
//! writers issue full replaces and need not preserve them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which site currently claims authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    Primary,
    Dr,
}

impl Owner {
    /// The other site.
    pub fn peer(self) -> Owner {
        match self {
            Owner::Primary => Owner::Dr,
            Owner::Dr => Owner::Primary,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Primary => write!(f, "primary"),
            Owner::Dr => write!(f, "dr"),
        }
    }
}

impl FromStr for Owner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Owner::Primary),
            "dr" => Ok(Owner::Dr),
            other => Err(Error::LeaseParseError(format!("unknown owner {other:?}"))),
        }
    }
}

/// Parsed lease state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub owner: Owner,
    /// Absolute expiry, Unix-epoch seconds.
    pub expires_at: u64,
}

impl Lease {
    pub fn new(owner: Owner, expires_at: u64) -> Self {
        Self { owner, expires_at }
    }

    /// Parse the TXT wire form. The string must contain exactly one
    /// `owner=` token and exactly one `exp=` token; any other tokens are
    /// ignored. Anything else is malformed and treated as an absent lease
    /// by the caller.
    pub fn parse(txt: &str) -> Result<Lease> {
        let mut owner: Option<Owner> = None;
        let mut expires_at: Option<u64> = None;

        for token in txt.split_whitespace() {
            if let Some(value) = token.strip_prefix("owner=") {
                if owner.is_some() {
                    return Err(Error::LeaseParseError(format!(
                        "duplicate owner token in {txt:?}"
                    )));
                }
                owner = Some(value.parse()?);
            } else if let Some(value) = token.strip_prefix("exp=") {
                if expires_at.is_some() {
                    return Err(Error::LeaseParseError(format!(
                        "duplicate exp token in {txt:?}"
                    )));
                }
                expires_at = Some(value.parse().map_err(|_| {
                    Error::LeaseParseError(format!("exp is not an integer in {txt:?}"))
                })?);
            }
        }

        match (owner, expires_at) {
            (Some(owner), Some(expires_at)) => Ok(Lease { owner, expires_at }),
            _ => Err(Error::LeaseParseError(format!(
                "missing owner or exp token in {txt:?}"
            ))),
        }
    }

    /// Wire form written back to DNS.
    pub fn to_txt(&self) -> String {
        format!("owner={} exp={}", self.owner, self.expires_at)
    }

    /// Expired at (or before) `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }

    /// Seconds of validity left at `now`.
    pub fn remaining(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_txt() {
        let lease = Lease::parse("owner=primary exp=1700000000").unwrap();
        assert_eq!(lease.owner, Owner::Primary);
        assert_eq!(lease.expires_at, 1_700_000_000);
    }

    #[test]
    fn parses_dr_owner() {
        let lease = Lease::parse("owner=dr exp=42").unwrap();
        assert_eq!(lease.owner, Owner::Dr);
        assert_eq!(lease.expires_at, 42);
    }

    #[test]
    fn ignores_unknown_tokens() {
        let lease = Lease::parse("v=1 owner=dr exp=99 site=fra").unwrap();
        assert_eq!(lease.owner, Owner::Dr);
        assert_eq!(lease.expires_at, 99);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Lease::parse("garbage").is_err());
        assert!(Lease::parse("").is_err());
    }

    #[test]
    fn rejects_missing_tokens() {
        assert!(Lease::parse("owner=primary").is_err());
        assert!(Lease::parse("exp=1700000000").is_err());
    }

    #[test]
    fn rejects_duplicate_tokens() {
        assert!(Lease::parse("owner=primary owner=dr exp=1").is_err());
        assert!(Lease::parse("owner=primary exp=1 exp=2").is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Lease::parse("owner=standby exp=1").is_err());
        assert!(Lease::parse("owner=primary exp=soon").is_err());
    }

    #[test]
    fn txt_round_trips() {
        let lease = Lease::new(Owner::Dr, 1_700_000_123);
        assert_eq!(lease.to_txt(), "owner=dr exp=1700000123");
        assert_eq!(Lease::parse(&lease.to_txt()).unwrap(), lease);
    }

    #[test]
    fn expiry_is_inclusive() {
        let lease = Lease::new(Owner::Primary, 100);
        assert!(!lease.is_expired(99));
        assert!(lease.is_expired(100));
        assert!(lease.is_expired(101));
        assert_eq!(lease.remaining(40), 60);
        assert_eq!(lease.remaining(200), 0);
    }
}
