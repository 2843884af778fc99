//! Core domain types for the review gate.

pub mod ids;

pub use ids::{PrNumber, RepoId, Sha, UserId};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A commit status state, as published to the GitHub Status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    /// The gate has not decided yet (published while a delivery is processed).
    Pending,
    /// The gate passed: the PR may be merged.
    Success,
    /// The gate failed: the PR is blocked.
    Failure,
}

impl StatusState {
    /// Returns the GitHub API string for this state.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_api_str())
    }
}

/// A reviewer's verdict, derived from an exact `"+1"` or `"-1"` comment body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewScore {
    /// The reviewer approved (`"+1"`).
    Approve,
    /// The reviewer rejected (`"-1"`).
    Reject,
}

impl ReviewScore {
    /// Parses a comment body into a score.
    ///
    /// Only bodies exactly equal to `"+1"` or `"-1"` carry a score; anything
    /// else (including surrounding whitespace) is not a verdict and leaves
    /// any previously stored score untouched.
    pub fn parse(body: &str) -> Option<Self> {
        match body {
            "+1" => Some(ReviewScore::Approve),
            "-1" => Some(ReviewScore::Reject),
            _ => None,
        }
    }

    /// Returns the signed integer stored in the review table.
    pub fn as_i64(&self) -> i64 {
        match self {
            ReviewScore::Approve => 1,
            ReviewScore::Reject => -1,
        }
    }
}

impl fmt::Display for ReviewScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewScore::Approve => write!(f, "+1"),
            ReviewScore::Reject => write!(f, "-1"),
        }
    }
}
