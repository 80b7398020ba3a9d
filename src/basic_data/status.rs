use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a transportable row.
///
/// Rows are created PENDING by the mark-changed-rows procedure, claimed
/// RUNNING by a transport cycle, and settle to SUCCESS or ERROR once the
/// remote call resolves. ERROR rows get exactly one automatic single-row
/// retry; after that only an operator-triggered rescan moves them again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }

    /// Settled states; nothing moves them without operator action.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Row is claimed by an in-flight transport call.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "ERROR" => Ok(Self::Error),
            _ => Err(format!("invalid process status: {s}")),
        }
    }
}
