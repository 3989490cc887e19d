// 🏷️ Status Codes - closed lookup of invoice states
//
// The store keeps a status_codes table for referential integrity, but the
// set is fixed, so the core works with this enum and matches exhaustively.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Nothing allocated, not yet due
    Unpaid,

    /// Some money allocated, less than the total
    Partial,

    /// Allocations cover the total (or exceed it)
    Paid,

    /// Nothing allocated and the due date has passed
    Overdue,

    /// In collections - only ever set manually
    Dunning,

    /// Terminal - never auto-transitioned
    Cancelled,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Unpaid,
        StatusCode::Partial,
        StatusCode::Paid,
        StatusCode::Overdue,
        StatusCode::Dunning,
        StatusCode::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Unpaid => "UNPAID",
            StatusCode::Partial => "PARTIAL",
            StatusCode::Paid => "PAID",
            StatusCode::Overdue => "OVERDUE",
            StatusCode::Dunning => "DUNNING",
            StatusCode::Cancelled => "CANCELLED",
        }
    }

    /// Human-readable label seeded into the lookup table
    pub fn label(&self) -> &'static str {
        match self {
            StatusCode::Unpaid => "Unpaid",
            StatusCode::Partial => "Partially paid",
            StatusCode::Paid => "Paid",
            StatusCode::Overdue => "Overdue",
            StatusCode::Dunning => "In collections",
            StatusCode::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusCode::Cancelled)
    }

    /// States that only an administrator can enter
    pub fn is_manual(&self) -> bool {
        matches!(self, StatusCode::Dunning | StatusCode::Cancelled)
    }

    /// Line items may no longer change
    pub fn locks_line_items(&self) -> bool {
        matches!(self, StatusCode::Paid | StatusCode::Cancelled)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UNPAID" => Ok(StatusCode::Unpaid),
            "PARTIAL" => Ok(StatusCode::Partial),
            "PAID" => Ok(StatusCode::Paid),
            "OVERDUE" => Ok(StatusCode::Overdue),
            "DUNNING" => Ok(StatusCode::Dunning),
            "CANCELLED" => Ok(StatusCode::Cancelled),
            other => Err(format!("Unknown status code: {}", other)),
        }
    }
}
