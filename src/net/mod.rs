//! Admission pipeline and the TCP front door

pub mod admission;
pub mod attack;
pub mod blacklist;
pub mod event;
pub mod listener;
pub mod queue;
pub mod verified;

pub use admission::{Admission, AdmissionGate, SessionOutcome};
pub use attack::AttackTracker;
pub use blacklist::Blacklist;
pub use event::{EventSink, LogSink, NullSink};
pub use listener::Gateway;
pub use queue::{AdmissionQueue, EnqueueResult};
pub use verified::VerifiedStore;
