//! Optimistic sync engine
//!
//! Pending mutation sets, the merge and reconcile functions over them, their
//! durable log, and the mailbox that coordinates user actions with the
//! remote source.

pub mod db;
pub mod engine;
pub mod merge;
pub mod monitor;
pub mod mutations;
pub mod reconcile;
