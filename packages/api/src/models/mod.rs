//! Data models for the application.

mod identity;

pub use identity::{Identity, Session};
