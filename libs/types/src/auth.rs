//! Provenance labels for parsed orders

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthFlagError;

/// How much the transport trusted the payload an order was parsed from.
///
/// The label is attached at parse time and carried with the order through the
/// queue so consumers can weight or quarantine suspect flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthFlags {
    /// Payload came from a transport we control end to end
    Trusted,
    /// Payload parsed cleanly but its origin is unattested
    Unverified,
    /// Payload required repair or partial parsing
    Malformed,
    /// Payload tripped an integrity or replay heuristic
    Suspicious,
}

impl AuthFlags {
    /// Wire string used in feed files and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthFlags::Trusted => "TRUSTED",
            AuthFlags::Unverified => "UNVERIFIED",
            AuthFlags::Malformed => "MALFORMED",
            AuthFlags::Suspicious => "SUSPICIOUS",
        }
    }
}

impl fmt::Display for AuthFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthFlags {
    type Err = AuthFlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRUSTED" => Ok(AuthFlags::Trusted),
            "UNVERIFIED" => Ok(AuthFlags::Unverified),
            "MALFORMED" => Ok(AuthFlags::Malformed),
            "SUSPICIOUS" => Ok(AuthFlags::Suspicious),
            other => Err(AuthFlagError(other.to_string())),
        }
    }
}
