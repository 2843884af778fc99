//! crhub - a webhook-driven review gate for GitHub pull requests.
//!
//! crhub tracks reviewer verdicts (`+1` / `-1` comments) per pull request and
//! publishes a commit status under the `crhub` context reflecting whether the
//! current assignee has approved. Branch protection on the status then blocks
//! unreviewed merges.

pub mod config;
pub mod gate;
pub mod github;
pub mod poller;
pub mod server;
pub mod store;
pub mod types;
pub mod webhooks;
