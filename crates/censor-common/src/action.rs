//! Actions returned to the host
//!
//! Every packet handed to the engine yields exactly one action. The host
//! speaks a string protocol: nothing for pass, `"drop"` or `"reset"`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Enforcement action for a packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Allow the packet and stop inspecting the flow
    #[default]
    #[serde(alias = "allow", alias = "none")]
    Pass,
    /// Discard this packet; the flow keeps being observed
    Drop,
    /// Tear the connection down and forget the flow
    Reset,
}

/// Unrecognized action string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized action: {0:?}")]
pub struct ActionParseError(pub String);

impl Action {
    /// Whether the flow needs no further decisions
    #[inline(always)]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Reset)
    }

    /// Stable lowercase name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Drop => "drop",
            Self::Reset => "reset",
        }
    }

    /// Host wire form: `None` means let the packet through
    pub const fn as_host_str(&self) -> Option<&'static str> {
        match self {
            Self::Pass => None,
            Self::Drop => Some("drop"),
            Self::Reset => Some("reset"),
        }
    }

    /// Parse a host action string (case-insensitive)
    pub fn from_host_str(s: &str) -> Result<Self, ActionParseError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "reset" => Ok(Self::Reset),
            "pass" | "allow" | "none" | "" => Ok(Self::Pass),
            _ => Err(ActionParseError(s.to_string())),
        }
    }

    /// Interpret whatever a host callback returned
    ///
    /// Absent or unrecognized responses mean Pass.
    pub fn from_host_response(response: Option<&str>) -> Self {
        match response {
            None => Self::Pass,
            Some(s) => Self::from_host_str(s).unwrap_or_else(|e| {
                warn!(response = %e.0, "unrecognized host action, passing");
                Self::Pass
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ActionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_host_str(s)
    }
}
