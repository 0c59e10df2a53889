//! Bounded row channels ("row sets").
//!
//! A [`Channel`] connects exactly one producing node copy to exactly one
//! consuming node copy. It is the only shared mutable resource between node
//! threads.

mod id;
mod rowset;

pub use id::ChannelId;
pub use rowset::{Channel, ChannelStats, PopOutcome};
