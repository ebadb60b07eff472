//! This crate contains the app-shell state shared by every front end.
//!
//! Nothing here renders. Front ends read [`AuthState`] from an
//! [`AuthProvider`] and draw the screen named by its [`Route`].

mod auth;
pub use auth::{AuthProvider, AuthState, RoleWrite, RoleWriteStatus};

mod completion;
pub use completion::CompletionChecker;

mod error;
pub use error::AppError;

mod profile;
pub use profile::{ProfileLookup, ProfileResolver};

pub mod route;
pub use route::{resolve_route, CompletionState, ProfileState, Route, SessionStatus};
