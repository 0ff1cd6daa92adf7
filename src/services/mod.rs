//! Presentation-facing services
//!
//! Pure functions over the merged view that a UI layer calls on every
//! render. They never see pending mutations directly.

pub mod view;

pub use view::{compose, folder_counts, FolderCounts};
