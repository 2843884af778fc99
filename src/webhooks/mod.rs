//! Webhook delivery handling: signature verification, payload parsing, and
//! the typed events the gate consumes.

mod events;
mod parser;
mod signature;

pub use events::{GitHubEvent, IssueCommentEvent, PrAction, PullRequestEvent};
pub use parser::{ParseError, parse_webhook};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};
