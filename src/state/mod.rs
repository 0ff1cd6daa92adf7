//! Application state management

mod mailbox_manager;

pub use mailbox_manager::*;
