//! The review gate: per-PR serialization, policy evaluation, and the engine
//! that ties webhook events to the store and the Status API.

mod engine;
mod locks;
mod policy;

pub use engine::{GateError, Outcome, ReviewGate};
pub use locks::{LockRegistry, PrGuard, UntrackedRepo};
pub use policy::{Decision, evaluate};
