//! # API crate: backend access for the marketplace app
//!
//! Everything that talks to the hosted backend lives here: the identity
//! provider, the session it hands out, and the REST tables guarded by
//! row-level security. The `ui` crate builds its state machine on top of these
//! types and never issues a request itself.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`auth`] | [`IdentityProvider`] seam with the HTTP ([`GoTrueClient`]) and in-memory implementations, the [`SessionTracker`], session persistence, reset deep links, env-based [`BackendConfig`] |
//! | [`db`] | [`RestStore`], the `store::ProfileStore` / `store::DetailStore` implementation over the REST endpoint |
//! | [`models`] | [`Identity`] and [`Session`] |
//! | [`error`] | [`AuthError`] |

pub mod auth;
pub mod db;
pub mod error;
pub mod models;

pub use auth::{
    AuthEvent, BackendConfig, DeepLink, GoTrueClient, IdentityProvider, MemoryIdentityProvider,
    SessionTracker, SignUpOutcome, Subscription,
};
pub use db::{AccessTokenSource, RestStore};
pub use error::AuthError;
pub use models::{Identity, Session};
