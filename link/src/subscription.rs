//! Live subscriptions to server publications.
//!
//! Every subscription shares the session's single transport. The dispatcher
//! task routes `added` / `addedBefore` / `changed` / `removed` /
//! `movedBefore` messages to each subscription whose collection set contains
//! the message's collection, and `ready` / `nosub` by subscription id.

mod manager;

pub use manager::Subscription;
